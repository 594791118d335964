//! 把 NNAPI 风格的模型翻译为 hexagon_nn 运行时的图并执行。

mod check;
mod compile;
mod desc;
mod error;
mod execute;
mod layout;
mod model;
mod operand;
mod prepare;
mod registry;
mod shape;
mod window;

pub use compile::CompileState;
pub use desc::{
    DataLocation, Element, FusedActivation, ModelBuilder, ModelDesc, Operand, OperandLifeTime,
    OperandType, Operation, OperationType, Request, RequestArgument, from_bytes, to_bytes,
};
pub use error::{HvxError, HvxResult};
pub use execute::{OutputShape, RunTimePool};
pub use model::Model;
pub use operand::Operands;
pub use registry::{Check, Emit, Registry, global as global_registry};
pub use shape::{Shape, implicit_padding, padding_scheme};

#[cfg(test)]
mod test;

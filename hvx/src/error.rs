use crate::desc::{OperandType, OperationType};
use nnlib::{NnError, OpType};
use thiserror::Error;

#[derive(Error, Clone, PartialEq, Debug)]
pub enum HvxError {
    #[error("{op} takes {expected} inputs, got {actual}")]
    Arity {
        op: OperationType,
        expected: String,
        actual: usize,
    },
    #[error("{op}: {reason}")]
    Shape { op: OperationType, reason: String },
    #[error("{op} needs operand {operand} to be constant")]
    NotConstant { op: OperationType, operand: u32 },
    #[error("{op} uses padding that maps to no scheme")]
    UnknownPadding { op: OperationType },
    #[error("{0} is not supported")]
    Unsupported(OperationType),
    #[error("no emitter for {op} on {ty:?}")]
    NoEmitter { op: OperationType, ty: OperandType },
    #[error("operand {0} is already bound")]
    AlreadyBound(u32),
    #[error("operand {0} is not bound to any node")]
    Unbound(u32),
    #[error("{op} has an unbound input")]
    Unwired { op: OpType },
    #[error("operand {0} has a zero dimension")]
    ZeroDimension(u32),
    #[error("operand index {0} out of range")]
    OperandIndex(u32),
    #[error("operand {operand}: {reason}")]
    Data { operand: u32, reason: String },
    #[error("unknown fused activation {0}")]
    Activation(i32),
    #[error("bad request: {0}")]
    Request(String),
    #[error(transparent)]
    Runtime(#[from] NnError),
}

pub type HvxResult<T> = Result<T, HvxError>;

/// 检查输入个数。
pub(crate) fn arity(op: OperationType, ins: &[u32], expected: usize) -> HvxResult<()> {
    if ins.len() == expected {
        Ok(())
    } else {
        Err(HvxError::Arity {
            op,
            expected: expected.to_string(),
            actual: ins.len(),
        })
    }
}

/// 检查显式或隐式两种形式之一的输入个数，返回是否为显式形式。
pub(crate) fn arity_either(
    op: OperationType,
    ins: &[u32],
    explicit: usize,
    implicit: usize,
) -> HvxResult<bool> {
    match ins.len() {
        n if n == explicit => Ok(true),
        n if n == implicit => Ok(false),
        actual => Err(HvxError::Arity {
            op,
            expected: format!("{explicit} or {implicit}"),
            actual,
        }),
    }
}

pub(crate) fn shape_err(op: OperationType, reason: impl Into<String>) -> HvxError {
    HvxError::Shape {
        op,
        reason: reason.into(),
    }
}

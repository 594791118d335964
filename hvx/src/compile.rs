//! 模型到运行时图的两阶段编译：先推导形状，再逐个翻译为节点。

use crate::{
    HvxError, HvxResult,
    desc::Operation,
    model::Model,
    operand::Operands,
    registry::{self, Registry},
};
use log::{error, info};
use nnlib::{NodeInput, NodeOutput, OpType, Padding};
use std::fmt;

/// 编译状态，失败后下一次编译从头开始。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompileState {
    Unbuilt,
    Validated,
    InputsEmitted,
    OperationsEmitted,
    OutputsEmitted,
    Prepared,
    Failed,
}

impl fmt::Display for CompileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unbuilt => "unbuilt",
            Self::Validated => "validated",
            Self::InputsEmitted => "inputs emitted",
            Self::OperationsEmitted => "operations emitted",
            Self::OutputsEmitted => "outputs emitted",
            Self::Prepared => "prepared",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 推导一个算子的输出形状。
fn check(registry: &Registry, op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    registry
        .check(op.ty)
        .ok_or(HvxError::Unsupported(op.ty))?
        .check(op, operands)
}

impl Model<'_> {
    /// 构建并准备运行时图，已准备的模型直接返回。
    pub fn compile(&mut self) -> HvxResult<()> {
        if self.state == CompileState::Prepared {
            return Ok(());
        }
        if self.next_node > 0 {
            self.reset()?
        }
        info!("compile {} operations into {}", self.operations.len(), self.graph);

        if let Err(e) = self.build(registry::global()) {
            error!("{} failed after {}: {e}", self.graph, self.state);
            self.reset()?;
            self.state = CompileState::Failed;
            return Err(e);
        }

        info!("{} prepared with {} nodes", self.graph, self.next_node);
        if log::log_enabled!(log::Level::Info) {
            match self.graph_dump() {
                Ok(dump) => info!("{}:\n{dump}", self.graph),
                Err(e) => info!("{} has no dump: {e}", self.graph),
            }
        }
        Ok(())
    }

    /// 逐个算子给出当前表是否能翻译，不影响模型与图。
    pub fn supported_operations(&self) -> Vec<bool> {
        let registry = registry::global();
        let mut operands = self.operands.detached();
        self.operations
            .iter()
            .map(|op| {
                let emitter = op
                    .inputs
                    .first()
                    .and_then(|&i| operands.shape(i).ok())
                    .is_some_and(|shape| registry.emitter(op.ty, shape.ty).is_some());
                emitter && check(registry, op, &mut operands).is_ok()
            })
            .collect()
    }

    /// 运行时对图结构的文本转储。
    pub fn graph_dump(&self) -> HvxResult<String> {
        let mut buf = vec![0; self.config.log_capacity];
        self.lib.snpprint(self.graph, &mut buf)?;
        Ok(nnlib::c_str(&buf))
    }

    /// 运行时为图记录的调试日志。
    pub fn debug_log(&self) -> HvxResult<String> {
        let mut buf = vec![0; self.config.log_capacity];
        self.lib.getlog(self.graph, &mut buf)?;
        Ok(nnlib::c_str(&buf))
    }

    fn build(&mut self, registry: &Registry) -> HvxResult<()> {
        self.validate(registry)?;
        self.state = CompileState::Validated;
        self.emit_inputs()?;
        self.state = CompileState::InputsEmitted;
        self.emit_operations(registry)?;
        self.state = CompileState::OperationsEmitted;
        self.emit_outputs()?;
        self.state = CompileState::OutputsEmitted;
        self.lib.prepare(self.graph)?;
        self.state = CompileState::Prepared;
        Ok(())
    }

    fn validate(&mut self, registry: &Registry) -> HvxResult<()> {
        let operations = self.operations.clone();
        for op in operations.iter() {
            check(registry, op, &mut self.operands)?
        }
        self.operands.verify_dimensions()
    }

    fn emit_inputs(&mut self) -> HvxResult<()> {
        let inputs = self.inputs.clone();
        let outputs = inputs
            .iter()
            .map(|&i| {
                let info = self.operands.get(i)?;
                Ok(NodeOutput::new(&info.dimensions, info.ty.size() as _)?)
            })
            .collect::<HvxResult<Vec<_>>>()?;
        let node = self.append(OpType::INPUT, Padding::Na, &[], &outputs)?;
        for (k, &i) in inputs.iter().enumerate() {
            self.operands.bind(i, NodeInput::new(node, k as _))?
        }
        Ok(())
    }

    fn emit_operations(&mut self, registry: &Registry) -> HvxResult<()> {
        let operations = self.operations.clone();
        for op in operations.iter() {
            let &first = op.inputs.first().ok_or(HvxError::Arity {
                op: op.ty,
                expected: "at least 1".into(),
                actual: 0,
            })?;
            let ty = self.operands.get(first)?.ty;
            registry
                .emitter(op.ty, ty)
                .ok_or(HvxError::NoEmitter { op: op.ty, ty })?
                .emit(op, self)?
        }
        Ok(())
    }

    fn emit_outputs(&mut self) -> HvxResult<()> {
        let inputs = self
            .outputs
            .iter()
            .map(|&i| {
                let tensor = self.operands.get(i)?.tensor;
                if tensor.is_bound() {
                    Ok(tensor)
                } else {
                    Err(HvxError::Unbound(i))
                }
            })
            .collect::<HvxResult<Vec<_>>>()?;
        self.append(OpType::OUTPUT, Padding::Na, &inputs, &[])?;
        Ok(())
    }
}

use crate::{
    HvxResult,
    check,
    desc::{OperandType, OperationType, Operation},
    model::Model,
    operand::Operands,
    prepare,
};
use std::{collections::HashMap, sync::LazyLock};

/// 检查算子输入并推导输出形状。
pub trait Check: Send + Sync {
    fn check(&self, op: &Operation, operands: &mut Operands) -> HvxResult<()>;
}

impl<F> Check for F
where
    F: Fn(&Operation, &mut Operands) -> HvxResult<()> + Send + Sync,
{
    fn check(&self, op: &Operation, operands: &mut Operands) -> HvxResult<()> {
        self(op, operands)
    }
}

/// 把算子翻译为运行时节点。
pub trait Emit: Send + Sync {
    fn emit(&self, op: &Operation, model: &mut Model<'_>) -> HvxResult<()>;
}

impl<F> Emit for F
where
    F: Fn(&Operation, &mut Model<'_>) -> HvxResult<()> + Send + Sync,
{
    fn emit(&self, op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
        self(op, model)
    }
}

/// 按算子类型索引的检查表与按 (算子类型, 元素类型) 索引的翻译表。
#[derive(Default)]
pub struct Registry {
    checks: HashMap<OperationType, Box<dyn Check>>,
    emitters: HashMap<(OperationType, OperandType), Box<dyn Emit>>,
}

impl Registry {
    /// 包含所有内置算子的表。
    pub fn builtin() -> Self {
        let mut ans = Self::default();
        check::register(&mut ans);
        prepare::register(&mut ans);
        ans
    }

    pub fn with_check(&mut self, op: OperationType, check: impl Check + 'static) -> &mut Self {
        self.checks.insert(op, Box::new(check));
        self
    }

    pub fn with_emit(
        &mut self,
        op: OperationType,
        ty: OperandType,
        emit: impl Emit + 'static,
    ) -> &mut Self {
        self.emitters.insert((op, ty), Box::new(emit));
        self
    }

    pub fn check(&self, op: OperationType) -> Option<&dyn Check> {
        self.checks.get(&op).map(Box::as_ref)
    }

    pub fn emitter(&self, op: OperationType, ty: OperandType) -> Option<&dyn Emit> {
        self.emitters.get(&(op, ty)).map(Box::as_ref)
    }
}

/// 全局共享的内置表。
pub fn global() -> &'static Registry {
    static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::builtin);
    &GLOBAL
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builtin() {
        use OperationType as Ty;
        let registry = global();
        assert!(registry.check(Ty::Conv2d).is_some());
        assert!(registry.check(Ty::Lstm).is_none());

        let float = OperandType::TensorFloat32;
        let quant = OperandType::TensorQuant8Asymm;
        assert!(registry.emitter(Ty::Conv2d, float).is_some());
        assert!(registry.emitter(Ty::Conv2d, quant).is_some());
        assert!(registry.emitter(Ty::Dequantize, quant).is_some());
        assert!(registry.emitter(Ty::Dequantize, float).is_none());
        assert!(registry.emitter(Ty::Tanh, quant).is_none());
        assert!(registry.emitter(Ty::LocalResponseNormalization, float).is_some());
        assert!(registry.emitter(Ty::Add, OperandType::TensorInt32).is_none());
    }
}

use crate::{
    HvxError, HvxResult,
    desc::{Element, ModelDesc, Operand, OperandLifeTime, OperandType, from_bytes},
    shape::Shape,
};
use nnlib::NodeInput;
use std::sync::Arc;

/// 操作数表中的一项。
#[derive(Clone, Debug)]
pub(crate) struct OperandInfo {
    pub ty: OperandType,
    pub dimensions: Vec<u32>,
    pub scale: f32,
    pub zero_point: i32,
    pub lifetime: OperandLifeTime,
    /// 常量数据，构造时从模型值区或内存池复制。
    pub data: Option<Arc<[u8]>>,
    pub tensor: NodeInput,
    pub min: NodeInput,
    pub max: NodeInput,
}

impl OperandInfo {
    fn new(operand: &Operand, data: Option<Arc<[u8]>>) -> Self {
        Self {
            ty: operand.ty,
            dimensions: operand.dimensions.clone(),
            scale: operand.scale,
            zero_point: operand.zero_point,
            lifetime: operand.lifetime,
            data,
            tensor: NodeInput::default(),
            min: NodeInput::default(),
            max: NodeInput::default(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self.lifetime,
            OperandLifeTime::ConstantCopy | OperandLifeTime::ConstantReference
        )
    }

    /// 反量化 `q`。
    pub fn dequantize(&self, q: i32) -> f32 {
        (q as i64 - self.zero_point as i64) as f32 * self.scale
    }
}

/// 操作数表。
#[derive(Clone, Debug)]
pub struct Operands(Vec<OperandInfo>);

impl Operands {
    pub(crate) fn from_desc(desc: &ModelDesc) -> HvxResult<Self> {
        desc.operands
            .iter()
            .enumerate()
            .map(|(i, operand)| -> HvxResult<OperandInfo> {
                let i = i as u32;
                let loc = operand.location;
                let start = loc.offset as usize;
                let range = start..start.saturating_add(loc.length as usize);
                let data = match operand.lifetime {
                    OperandLifeTime::ConstantCopy => Some(
                        desc.operand_values
                            .get(range)
                            .ok_or_else(|| data_err(i, "value out of model values"))?,
                    ),
                    OperandLifeTime::ConstantReference => Some(
                        desc.pools
                            .get(loc.pool_index as usize)
                            .and_then(|pool| pool.get(range))
                            .ok_or_else(|| data_err(i, "value out of memory pool"))?,
                    ),
                    _ => None,
                };
                Ok(OperandInfo::new(operand, data.map(Arc::from)))
            })
            .collect::<HvxResult<_>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn get(&self, i: u32) -> HvxResult<&OperandInfo> {
        self.0.get(i as usize).ok_or(HvxError::OperandIndex(i))
    }

    pub(crate) fn get_mut(&mut self, i: u32) -> HvxResult<&mut OperandInfo> {
        self.0.get_mut(i as usize).ok_or(HvxError::OperandIndex(i))
    }

    pub fn shape(&self, i: u32) -> HvxResult<Shape> {
        let info = self.get(i)?;
        Ok(Shape {
            ty: info.ty,
            dimensions: info.dimensions.clone(),
            scale: info.scale,
            zero_point: info.zero_point,
        })
    }

    /// 写回推导出的形状，已绑定到图节点的操作数不可再改。
    pub fn set_shape(&mut self, i: u32, dimensions: Vec<u32>) -> HvxResult<()> {
        let info = self.get_mut(i)?;
        if info.tensor.is_bound() {
            return Err(HvxError::AlreadyBound(i));
        }
        info.dimensions = dimensions;
        Ok(())
    }

    pub fn is_constant(&self, i: u32) -> HvxResult<bool> {
        self.get(i).map(OperandInfo::is_constant)
    }

    pub fn data(&self, i: u32) -> HvxResult<&[u8]> {
        self.get(i)?
            .data
            .as_deref()
            .ok_or_else(|| data_err(i, "not a constant"))
    }

    /// 读取常量标量，数据长度必须恰好是一个元素。
    pub fn scalar<T: Element>(&self, i: u32) -> HvxResult<T> {
        let data = self.data(i)?;
        if data.len() != T::SIZE {
            return Err(data_err(
                i,
                format!("scalar of {} bytes holds {} bytes", T::SIZE, data.len()),
            ));
        }
        Ok(T::read(data))
    }

    pub fn values<T: Element>(&self, i: u32) -> HvxResult<Vec<T>> {
        let data = self.data(i)?;
        if data.len() % T::SIZE != 0 {
            return Err(data_err(
                i,
                format!("{} bytes are not {}-byte elements", data.len(), T::SIZE),
            ));
        }
        Ok(from_bytes(data))
    }

    /// 按类型与形状应有的字节数，溢出时报错。
    pub fn byte_len(&self, i: u32) -> HvxResult<usize> {
        let info = self.get(i)?;
        info.dimensions
            .iter()
            .try_fold(info.ty.size(), |acc, &d| acc.checked_mul(d as usize))
            .ok_or_else(|| data_err(i, format!("{:?} overflows", info.dimensions)))
    }

    /// 把操作数改为常量。
    pub fn set_constant(&mut self, i: u32, data: impl Into<Arc<[u8]>>) -> HvxResult<()> {
        let info = self.get_mut(i)?;
        info.lifetime = OperandLifeTime::ConstantCopy;
        info.data = Some(data.into());
        info.tensor = NodeInput::default();
        Ok(())
    }

    pub(crate) fn bind(&mut self, i: u32, tensor: NodeInput) -> HvxResult<()> {
        let info = self.get_mut(i)?;
        if info.tensor.is_bound() {
            return Err(HvxError::AlreadyBound(i));
        }
        info.tensor = tensor;
        Ok(())
    }

    /// 覆盖量化范围的记忆。
    pub(crate) fn bind_range(&mut self, i: u32, min: NodeInput, max: NodeInput) -> HvxResult<()> {
        let info = self.get_mut(i)?;
        info.min = min;
        info.max = max;
        Ok(())
    }

    pub(crate) fn clear_handles(&mut self) {
        for info in &mut self.0 {
            info.tensor = NodeInput::default();
            info.min = NodeInput::default();
            info.max = NodeInput::default();
        }
    }

    /// 清除所有图句柄的副本，用于不影响原表的试推导。
    pub(crate) fn detached(&self) -> Self {
        let mut ans = self.clone();
        ans.clear_handles();
        ans
    }

    /// 形状推导后不应再有为 0 的维度。
    pub(crate) fn verify_dimensions(&self) -> HvxResult<()> {
        match self.0.iter().position(|info| info.dimensions.contains(&0)) {
            Some(i) => Err(HvxError::ZeroDimension(i as _)),
            None => Ok(()),
        }
    }
}

fn data_err(operand: u32, reason: impl Into<String>) -> HvxError {
    HvxError::Data {
        operand,
        reason: reason.into(),
    }
}

//! 与硬件无关的模型描述。

use digit_layout::{DigitLayout, types};
use std::{array::from_fn, fmt, mem::size_of};

/// 操作数的元素类型。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum OperandType {
    Float32 = 0,
    Int32 = 1,
    UInt32 = 2,
    TensorFloat32 = 3,
    TensorInt32 = 4,
    TensorQuant8Asymm = 5,
}

impl OperandType {
    pub fn digit_layout(self) -> DigitLayout {
        match self {
            Self::Float32 | Self::TensorFloat32 => types::F32,
            Self::Int32 | Self::TensorInt32 => types::I32,
            Self::UInt32 => types::U32,
            Self::TensorQuant8Asymm => types::U8,
        }
    }

    /// 元素字节数。
    pub fn size(self) -> usize {
        self.digit_layout().nbytes()
    }

    pub const fn is_quant8(self) -> bool {
        matches!(self, Self::TensorQuant8Asymm)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum OperandLifeTime {
    TemporaryVariable,
    ModelInput,
    ModelOutput,
    ConstantCopy,
    ConstantReference,
    NoValue,
}

/// 数据在某个内存池中的位置。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct DataLocation {
    pub pool_index: u32,
    pub offset: u32,
    pub length: u32,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Operand {
    pub ty: OperandType,
    pub dimensions: Vec<u32>,
    pub scale: f32,
    pub zero_point: i32,
    pub lifetime: OperandLifeTime,
    pub location: DataLocation,
}

impl Operand {
    pub fn new(ty: OperandType, dimensions: impl Into<Vec<u32>>) -> Self {
        Self {
            ty,
            dimensions: dimensions.into(),
            scale: 0.,
            zero_point: 0,
            lifetime: OperandLifeTime::TemporaryVariable,
            location: DataLocation::default(),
        }
    }

    pub fn quant8(dimensions: impl Into<Vec<u32>>, scale: f32, zero_point: i32) -> Self {
        Self {
            scale,
            zero_point,
            ..Self::new(OperandType::TensorQuant8Asymm, dimensions)
        }
    }

    pub fn with_quant(self, scale: f32, zero_point: i32) -> Self {
        Self {
            scale,
            zero_point,
            ..self
        }
    }
}

macro_rules! operation_types {
    ($($name:ident = $code:literal => $text:literal,)+) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u32)]
        pub enum OperationType {
            $($name = $code,)+
        }

        impl OperationType {
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => $text,)+
                }
            }

            pub const fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$name),)+
                    _ => None,
                }
            }
        }
    };
}

operation_types! {
    Add                        =  0 => "ADD",
    AveragePool2d              =  1 => "AVERAGE_POOL_2D",
    Concatenation              =  2 => "CONCATENATION",
    Conv2d                     =  3 => "CONV_2D",
    DepthwiseConv2d            =  4 => "DEPTHWISE_CONV_2D",
    DepthToSpace               =  5 => "DEPTH_TO_SPACE",
    Dequantize                 =  6 => "DEQUANTIZE",
    EmbeddingLookup            =  7 => "EMBEDDING_LOOKUP",
    Floor                      =  8 => "FLOOR",
    FullyConnected             =  9 => "FULLY_CONNECTED",
    HashtableLookup            = 10 => "HASHTABLE_LOOKUP",
    L2Normalization            = 11 => "L2_NORMALIZATION",
    L2Pool2d                   = 12 => "L2_POOL_2D",
    LocalResponseNormalization = 13 => "LOCAL_RESPONSE_NORMALIZATION",
    Logistic                   = 14 => "LOGISTIC",
    LshProjection              = 15 => "LSH_PROJECTION",
    Lstm                       = 16 => "LSTM",
    MaxPool2d                  = 17 => "MAX_POOL_2D",
    Mul                        = 18 => "MUL",
    Relu                       = 19 => "RELU",
    Relu1                      = 20 => "RELU1",
    Relu6                      = 21 => "RELU6",
    Reshape                    = 22 => "RESHAPE",
    ResizeBilinear             = 23 => "RESIZE_BILINEAR",
    Rnn                        = 24 => "RNN",
    Softmax                    = 25 => "SOFTMAX",
    SpaceToDepth               = 26 => "SPACE_TO_DEPTH",
    Svdf                       = 27 => "SVDF",
    Tanh                       = 28 => "TANH",
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 融合在算子末尾的激活函数。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(i32)]
pub enum FusedActivation {
    None = 0,
    Relu = 1,
    Relu1 = 2,
    Relu6 = 3,
}

impl TryFrom<i32> for FusedActivation {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Relu),
            2 => Ok(Self::Relu1),
            3 => Ok(Self::Relu6),
            _ => Err(code),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Operation {
    pub ty: OperationType,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

/// 完整的模型描述。
#[derive(Clone, Default, Debug)]
pub struct ModelDesc {
    pub operands: Vec<Operand>,
    pub operations: Vec<Operation>,
    pub input_indexes: Vec<u32>,
    pub output_indexes: Vec<u32>,
    /// `ConstantCopy` 操作数的数据。
    pub operand_values: Vec<u8>,
    /// `ConstantReference` 操作数引用的内存池。
    pub pools: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct RequestArgument {
    pub location: DataLocation,
    /// 为空表示沿用模型中声明的形状。
    pub dimensions: Vec<u32>,
}

impl RequestArgument {
    pub fn new(pool_index: u32, offset: u32, length: u32) -> Self {
        Self {
            location: DataLocation {
                pool_index,
                offset,
                length,
            },
            dimensions: Vec::new(),
        }
    }

    pub fn with_dims(self, dimensions: impl Into<Vec<u32>>) -> Self {
        Self {
            dimensions: dimensions.into(),
            ..self
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct Request {
    pub inputs: Vec<RequestArgument>,
    pub outputs: Vec<RequestArgument>,
}

/// 可以按小端字节读写的标量元素。
pub trait Element: Copy {
    const SIZE: usize;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, out: &mut Vec<u8>);
}

macro_rules! element {
    ($($ty:ty)+) => {
        $(
            impl Element for $ty {
                const SIZE: usize = size_of::<$ty>();

                fn read(bytes: &[u8]) -> Self {
                    Self::from_le_bytes(from_fn(|i| bytes[i]))
                }

                fn write(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes())
                }
            }
        )+
    };
}

element!(u8 i32 u32 f32);

pub fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut ans = Vec::with_capacity(values.len() * T::SIZE);
    for v in values {
        v.write(&mut ans)
    }
    ans
}

pub fn from_bytes<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::SIZE).map(T::read).collect()
}

/// 逐个添加操作数与算子来构造 [`ModelDesc`]。
#[derive(Default)]
pub struct ModelBuilder(ModelDesc);

impl ModelBuilder {
    pub fn operand(&mut self, operand: Operand) -> u32 {
        let idx = self.0.operands.len() as u32;
        self.0.operands.push(operand);
        idx
    }

    pub fn temporary(&mut self, operand: Operand) -> u32 {
        self.with_lifetime(operand, OperandLifeTime::TemporaryVariable)
    }

    pub fn input(&mut self, operand: Operand) -> u32 {
        let idx = self.with_lifetime(operand, OperandLifeTime::ModelInput);
        self.0.input_indexes.push(idx);
        idx
    }

    pub fn output(&mut self, operand: Operand) -> u32 {
        let idx = self.with_lifetime(operand, OperandLifeTime::ModelOutput);
        self.0.output_indexes.push(idx);
        idx
    }

    /// 省略的可选操作数。
    pub fn no_value(&mut self, ty: OperandType) -> u32 {
        self.with_lifetime(Operand::new(ty, []), OperandLifeTime::NoValue)
    }

    /// 数据复制进模型的常量。
    pub fn constant<T: Element>(&mut self, operand: Operand, values: &[T]) -> u32 {
        let values_ = &mut self.0.operand_values;
        while values_.len() % 4 != 0 {
            values_.push(0)
        }
        let offset = values_.len() as u32;
        for v in values {
            v.write(values_)
        }
        let length = values_.len() as u32 - offset;
        self.operand(Operand {
            lifetime: OperandLifeTime::ConstantCopy,
            location: DataLocation {
                pool_index: 0,
                offset,
                length,
            },
            ..operand
        })
    }

    pub fn scalar_i32(&mut self, value: i32) -> u32 {
        self.constant(Operand::new(OperandType::Int32, []), &[value])
    }

    pub fn scalar_f32(&mut self, value: f32) -> u32 {
        self.constant(Operand::new(OperandType::Float32, []), &[value])
    }

    pub fn pool(&mut self, data: Vec<u8>) -> u32 {
        self.0.pools.push(data);
        self.0.pools.len() as u32 - 1
    }

    /// 引用内存池数据的常量。
    pub fn reference(&mut self, operand: Operand, location: DataLocation) -> u32 {
        self.operand(Operand {
            lifetime: OperandLifeTime::ConstantReference,
            location,
            ..operand
        })
    }

    pub fn operation(&mut self, ty: OperationType, inputs: &[u32], outputs: &[u32]) -> &mut Self {
        self.0.operations.push(Operation {
            ty,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        self
    }

    pub fn build(self) -> ModelDesc {
        self.0
    }

    fn with_lifetime(&mut self, operand: Operand, lifetime: OperandLifeTime) -> u32 {
        self.operand(Operand { lifetime, ..operand })
    }
}

use std::fmt;

macro_rules! op_types {
    ($($name:ident)+) => {
        /// 运行时节点类型，顺序与运行时的编号一致。
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u32)]
        pub enum OpType {
            $($name,)+
        }

        impl OpType {
            pub const ALL: &'static [Self] = &[$(Self::$name,)+];

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => concat!("OP_", stringify!($name)),)+
                }
            }
        }
    };
}

op_types! {
    INPUT OUTPUT Nop Const Check Close_f Close_quint8 Close_q_quint8 Close_int32 Close_qint32
    PPrint_8 PPrint_32 PPrint_f PreFree Flatten
    QuantizedConv2d_8x8to32 QuantizedConv2d_8x8to32_ref
    QuantizedMatMul_8x8to32 QuantizedMatMul_8x8to32_ref
    QuantizeDownAndShrinkRange_32to8 QuantizeDownAndShrinkRange_32to8_ref
    QuantizedRelu_8 QuantizedRelu_8_ref QuantizedReluX_8 QuantizedReluX_8_ref
    QuantizedMaxPool_8 QuantizedMaxPool_8_ref QuantizedAvgPool_8 QuantizedAvgPool_8_ref
    QuantizedConcat_8 QuantizedConcat_8_ref
    QuantizedBiasAdd_8p8to32 QuantizedBiasAdd_8p8to32_ref
    Min_f Min_f_ref Max_f Max_f_ref Quantize Quantize_ref Dequantize Dequantize_ref
    Supernode_8x8p8to8 Supernode_8x8p8to8_ref QuantizedFlatten
    Softmax_f Conv2d_f MatMul_f Relu_f ReluX_f AvgPool_f MaxPool_f Concat_f BiasAdd_f LRN_f
    Variable Assign Reshape QuantizedReshape Tanh_f Sigmoid_f
    Slice_8 Slice_f QuantizedSlice_8 Add_f Mul_f Minimum_f Maximum_f
    Requantize_32to8 Requantize_32to8_ref RequantizationRange_32 RequantizationRange_32_ref
    Neg_f Sub_f AddN_f Range_int32 Rank_int32 Transpose_int32 Transpose_f
    InstanceNorm_f QuantizedInstanceNorm_8 QuantizedInstanceNorm_8_ref
    Sub_int32 Add_int32 Split_f Dequantize_qint32_f
    PRelu_f QuantizedPRelu_8 QuantizedPRelu_8_ref Sum_f Prod_f Mul_int32
    LogicalAnd_int32 LogicalOr_int32 LogicalXor_int32 Shape_int32 Pack_int32
    MirrorPad_f ResizeNearestNeighbor_f StridedSlice_int32 StridedSlice_f
    ExpandDims_int32 ExpandDims_f LogSoftmax_f Split_int32 QuantizedSplit_8
    Deconv_f QuantizedDeconv_8x8to32 QuantizedDeconv_8x8to32_ref
    QuantizedMul_8x8to32 QuantizedMul_8x8to32_ref QuantizedAdd_8p8to32 QuantizedAdd_8p8to32_ref
    QuantizedSigmoid_8 QuantizedSigmoid_8_ref QuantizedTanh_8 QuantizedTanh_8_ref
    QuantizedSoftmax_8 QuantizedSoftmax_8_ref QuantizedLRN_8 QuantizedLRN_8_ref
    Quantizedpad2d_frame_8p Quantizedpad2d_frame_8p_ref
    QuantizedSub_8p8to32 QuantizedSub_8p8to32_ref
    QuantizedMaximum_8 QuantizedMaximum_8_ref QuantizedMinimum_8 QuantizedMinimum_8_ref
    Pad_f SpaceToBatchND_f BatchToSpaceND_f QuantizedPad_8 ResizeBilinear_f
    ConcatV2_f ConcatV2_int32 Prod_int32 Slice_int32
    QuantizedAdd_8p8to8 QuantizedResizeBilinear_8 Supernode_8x8p8to8_d32
    Convert_to_d32 Convert_from_d32
    QuantizedMaxPool_8_d32 QuantizedMaxPool_8_d32_ref
    QuantizedConcat_8_d32 QuantizedConcat_8_d32_ref
    QuantizedAvgPool_8_d32 QuantizedAvgPool_8_d32_ref Sink
    QuantizedPRelu_8_d32 QuantizedPRelu_8_d32_ref AutoQuantize AutoQuantize_ref
    QuantizedDepthwiseConv2d_8x8to32 QuantizedDepthwiseConv2d_8x8to32_ref DepthwiseConv2d_f
    DepthwiseSupernode_8x8p8to8 DepthwiseSupernode_8x8p8to8_d32
    QuantizedMul_8x8to8_d32 QuantizedMul_8x8to8_d32_ref FullyConnected_u8
    QuantizedAdd_8x8to8_d32 QuantizedAdd_8x8to8_d32_ref
    QuantizedClamp_8 QuantizedClamp_8_ref Clamp_f QuantizeForTest_d32
    L2Pool_f
}

impl OpType {
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub const fn id(self) -> u32 {
        self as _
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 窗口类节点的填充方式。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
#[repr(u32)]
pub enum Padding {
    #[default]
    Na = 0,
    Same,
    Valid,
    MirrorReflect,
    MirrorSymmetric,
    SameCaffe,
}

impl Padding {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Na => "NN_PAD_NA",
            Self::Same => "NN_PAD_SAME",
            Self::Valid => "NN_PAD_VALID",
            Self::MirrorReflect => "NN_PAD_MIRROR_REFLECT",
            Self::MirrorSymmetric => "NN_PAD_MIRROR_SYMMETRIC",
            Self::SameCaffe => "NN_PAD_SAME_CAFFE",
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

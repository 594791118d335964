//! 把算子翻译为运行时节点。

mod float32;
mod quant8_asym;

use crate::{
    HvxError, HvxResult,
    desc::{OperandType, Operation, OperationType},
    model::Model,
    registry::Registry,
    window::Window,
};
use nnlib::NodeInput;

/// 登记所有翻译函数。
pub(crate) fn register(registry: &mut Registry) {
    use OperationType as Ty;
    let f = OperandType::TensorFloat32;
    registry
        .with_emit(Ty::Add, f, float32::add)
        .with_emit(Ty::AveragePool2d, f, float32::average_pool_2d)
        .with_emit(Ty::Concatenation, f, float32::concatenation)
        .with_emit(Ty::Conv2d, f, float32::conv_2d)
        .with_emit(Ty::DepthwiseConv2d, f, float32::depthwise_conv_2d)
        .with_emit(Ty::FullyConnected, f, float32::fully_connected)
        .with_emit(Ty::L2Pool2d, f, float32::l2_pool_2d)
        .with_emit(Ty::LocalResponseNormalization, f, float32::local_response_normalization)
        .with_emit(Ty::Logistic, f, float32::logistic)
        .with_emit(Ty::MaxPool2d, f, float32::max_pool_2d)
        .with_emit(Ty::Mul, f, float32::mul)
        .with_emit(Ty::Relu, f, float32::relu)
        .with_emit(Ty::Relu1, f, float32::relu1)
        .with_emit(Ty::Relu6, f, float32::relu6)
        .with_emit(Ty::Reshape, f, float32::reshape)
        .with_emit(Ty::ResizeBilinear, f, float32::resize_bilinear)
        .with_emit(Ty::Softmax, f, float32::softmax)
        .with_emit(Ty::Tanh, f, float32::tanh);

    let q = OperandType::TensorQuant8Asymm;
    registry
        .with_emit(Ty::Add, q, quant8_asym::add)
        .with_emit(Ty::AveragePool2d, q, quant8_asym::average_pool_2d)
        .with_emit(Ty::Concatenation, q, quant8_asym::concatenation)
        .with_emit(Ty::Conv2d, q, quant8_asym::conv_2d)
        .with_emit(Ty::DepthwiseConv2d, q, quant8_asym::depthwise_conv_2d)
        .with_emit(Ty::Dequantize, q, quant8_asym::dequantize)
        .with_emit(Ty::FullyConnected, q, quant8_asym::fully_connected)
        .with_emit(Ty::Logistic, q, quant8_asym::logistic)
        .with_emit(Ty::MaxPool2d, q, quant8_asym::max_pool_2d)
        .with_emit(Ty::Mul, q, quant8_asym::mul)
        .with_emit(Ty::Relu, q, quant8_asym::relu)
        .with_emit(Ty::Relu1, q, quant8_asym::relu1)
        .with_emit(Ty::Relu6, q, quant8_asym::relu6)
        .with_emit(Ty::Reshape, q, quant8_asym::reshape)
        .with_emit(Ty::Softmax, q, quant8_asym::softmax);
}

/// 窗口与步长都以形状常量传给运行时。
fn window_nodes(model: &mut Model<'_>, window: &Window) -> HvxResult<[NodeInput; 2]> {
    Ok([
        model.shape_node([1, window.filter_h, window.filter_w, 1])?,
        stride_node(model, window)?,
    ])
}

fn stride_node(model: &mut Model<'_>, window: &Window) -> HvxResult<NodeInput> {
    model.shape_node([1, window.stride_h, window.stride_w, 1])
}

/// 拼接的张量个数，最后一个输入是轴。
fn concat_count(op: &Operation) -> HvxResult<usize> {
    match op.inputs.len() {
        n if n >= 3 => Ok(n - 1),
        actual => Err(HvxError::Arity {
            op: op.ty,
            expected: "at least 3".into(),
            actual,
        }),
    }
}

/// 拼接轴按 4 维对齐后的位置。
fn concat_axis(op: &Operation, model: &mut Model<'_>) -> HvxResult<NodeInput> {
    let n = concat_count(op)?;
    let axis = model.operands.scalar::<i32>(op.inputs[n])?;
    let rank = model.shape(op.inputs[0])?.rank() as i32;
    model.scalar(axis + (4 - rank))
}

use super::{concat_axis, concat_count, stride_node, window_nodes};
use crate::{
    HvxResult,
    desc::Operation,
    error::{arity, shape_err},
    model::Model,
    window,
};
use nnlib::{NodeInput, OpType, Padding};

/// 量化张量的值与范围。
fn quantized(model: &mut Model<'_>, i: u32) -> HvxResult<[NodeInput; 3]> {
    Ok([
        model.tensor(i)?,
        model.quantization_min(i)?,
        model.quantization_max(i)?,
    ])
}

fn output(op: &Operation) -> HvxResult<u32> {
    op.outputs
        .first()
        .copied()
        .ok_or_else(|| shape_err(op.ty, "missing output"))
}

fn elementwise(ty: OpType, op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 3)?;
    let act = model.quant8_activation(op.inputs[2], output(op)?)?;
    let [a, a_min, a_max] = quantized(model, op.inputs[0])?;
    let [b, b_min, b_max] = quantized(model, op.inputs[1])?;
    model.fused_quant8(
        ty,
        Padding::Na,
        &[a, a_min, a_max, b, b_min, b_max],
        NodeInput::default(),
        act,
        &op.outputs,
    )
}

fn pool(ty: OpType, op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, &model.operands)?;
    let act = model.quant8_activation(parsed.activation, output(op)?)?;
    let [input, min, max] = quantized(model, op.inputs[0])?;
    let [window, stride] = window_nodes(model, &parsed.window)?;
    model.with_activation(
        ty,
        parsed.window.padding,
        &[input, min, max, window, stride],
        act,
        &op.outputs,
    )
}

pub(super) fn add(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    elementwise(OpType::QuantizedAdd_8p8to32, op, model)
}

pub(super) fn mul(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    elementwise(OpType::QuantizedMul_8x8to32, op, model)
}

pub(super) fn average_pool_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    pool(OpType::QuantizedAvgPool_8, op, model)
}

pub(super) fn max_pool_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    pool(OpType::QuantizedMaxPool_8, op, model)
}

/// 输入依次为轴、所有值、所有最小值、所有最大值。
pub(super) fn concatenation(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let n = concat_count(op)?;
    let mut inputs = vec![NodeInput::default(); n * 3 + 1];
    for (k, &i) in op.inputs[..n].iter().enumerate() {
        let [value, min, max] = quantized(model, i)?;
        inputs[1 + k] = value;
        inputs[1 + k + n] = min;
        inputs[1 + k + n * 2] = max;
    }
    inputs[0] = concat_axis(op, model)?;
    model.basic(OpType::QuantizedConcat_8, Padding::Na, &inputs, &op.outputs)
}

pub(super) fn conv_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, &model.operands)?;
    let input = model.tensor(op.inputs[0])?;
    let filter = model.conv_filter(op.inputs[1])?;
    let bias = model.tensor(op.inputs[2])?;
    let act = model.quant8_activation(parsed.activation, output(op)?)?;
    let in_min = model.quantization_min(op.inputs[0])?;
    let in_max = model.quantization_max(op.inputs[0])?;
    let filter_min = model.quantization_min(op.inputs[1])?;
    let filter_max = model.quantization_max(op.inputs[1])?;
    let stride = stride_node(model, &parsed.window)?;
    model.fused_quant8(
        OpType::QuantizedConv2d_8x8to32,
        parsed.window.padding,
        &[input, filter, in_min, in_max, filter_min, filter_max, stride],
        bias,
        act,
        &op.outputs,
    )
}

pub(super) fn depthwise_conv_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, &model.operands)?;
    let input = model.tensor(op.inputs[0])?;
    let bias = model.tensor(op.inputs[2])?;
    let act = model.quant8_activation(parsed.activation, output(op)?)?;
    let in_min = model.quantization_min(op.inputs[0])?;
    let in_max = model.quantization_max(op.inputs[0])?;
    let filter_min = model.quantization_min(op.inputs[1])?;
    let filter_max = model.quantization_max(op.inputs[1])?;
    let filter = model.depthwise_filter(op.inputs[1], parsed.depth_multiplier)?;
    let stride = stride_node(model, &parsed.window)?;
    model.fused_quant8(
        OpType::QuantizedDepthwiseConv2d_8x8to32,
        parsed.window.padding,
        &[input, filter, in_min, in_max, filter_min, filter_max, stride],
        bias,
        act,
        &op.outputs,
    )
}

pub(super) fn dequantize(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let inputs = quantized(model, op.inputs[0])?;
    model.basic(OpType::Dequantize, Padding::Na, &inputs, &op.outputs)
}

pub(super) fn fully_connected(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 4)?;
    let input = model.tensor(op.inputs[0])?;
    let weights = model.fc_weights(op.inputs[1])?;
    let bias = model.tensor(op.inputs[2])?;
    let act = model.quant8_activation(op.inputs[3], output(op)?)?;
    let in_min = model.quantization_min(op.inputs[0])?;
    let in_max = model.quantization_max(op.inputs[0])?;
    let w_min = model.quantization_min(op.inputs[1])?;
    let w_max = model.quantization_max(op.inputs[1])?;
    model.fused_quant8(
        OpType::QuantizedMatMul_8x8to32,
        Padding::Na,
        &[input, weights, in_min, in_max, w_min, w_max],
        bias,
        act,
        &op.outputs,
    )
}

pub(super) fn logistic(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let input = model.tensor(op.inputs[0])?;
    let min = model.quantization_min(op.inputs[0])?;
    // 上界取 256 而非 255
    let max = model.quantization_value(op.inputs[0], 256)?;
    model.basic(OpType::QuantizedSigmoid_8, Padding::Na, &[input, min, max], &op.outputs)
}

pub(super) fn relu(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let inputs = quantized(model, op.inputs[0])?;
    model.basic(OpType::QuantizedRelu_8, Padding::Na, &inputs, &op.outputs)
}

pub(super) fn relu1(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let [input, in_min, in_max] = quantized(model, op.inputs[0])?;
    let min = model.scalar(-1f32)?;
    let max = model.scalar(1f32)?;
    model.basic(
        OpType::QuantizedClamp_8,
        Padding::Na,
        &[input, in_min, in_max, min, max],
        &op.outputs,
    )
}

pub(super) fn relu6(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let [input, in_min, in_max] = quantized(model, op.inputs[0])?;
    let max = model.scalar(6f32)?;
    model.basic(
        OpType::QuantizedReluX_8,
        Padding::Na,
        &[input, in_min, in_max, max],
        &op.outputs,
    )
}

pub(super) fn reshape(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 2)?;
    let input = model.tensor(op.inputs[0])?;
    let dims = model.tensor(op.inputs[1])?;
    let min = model.quantization_min(op.inputs[0])?;
    let max = model.quantization_max(op.inputs[0])?;
    model.basic(
        OpType::QuantizedReshape,
        Padding::Na,
        &[input, dims, min, max],
        &op.outputs,
    )
}

pub(super) fn softmax(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 2)?;
    let [input, min, max] = quantized(model, op.inputs[0])?;
    let beta = model.tensor(op.inputs[1])?;
    model.basic(
        OpType::QuantizedSoftmax_8,
        Padding::Na,
        &[input, min, max, beta],
        &op.outputs,
    )
}

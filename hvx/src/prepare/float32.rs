use super::{concat_axis, concat_count, stride_node, window_nodes};
use crate::{
    HvxResult, check,
    desc::Operation,
    error::arity,
    model::Model,
    window,
};
use nnlib::{NodeInput, OpType, Padding};

fn elementwise(ty: OpType, op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 3)?;
    let a = model.tensor(op.inputs[0])?;
    let b = model.tensor(op.inputs[1])?;
    let act = model.float_activation(op.inputs[2])?;
    model.fused_float(ty, Padding::Na, &[a, b], NodeInput::default(), act, &op.outputs)
}

fn pool(ty: OpType, op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, &model.operands)?;
    let input = model.tensor(op.inputs[0])?;
    let act = model.float_activation(parsed.activation)?;
    let [window, stride] = window_nodes(model, &parsed.window)?;
    model.with_activation(
        ty,
        parsed.window.padding,
        &[input, window, stride],
        act,
        &op.outputs,
    )
}

pub(super) fn add(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    elementwise(OpType::Add_f, op, model)
}

pub(super) fn mul(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    elementwise(OpType::Mul_f, op, model)
}

pub(super) fn average_pool_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    pool(OpType::AvgPool_f, op, model)
}

pub(super) fn l2_pool_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    pool(OpType::L2Pool_f, op, model)
}

pub(super) fn max_pool_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    pool(OpType::MaxPool_f, op, model)
}

pub(super) fn concatenation(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let n = concat_count(op)?;
    let mut inputs = vec![NodeInput::default(); n + 1];
    for (k, &i) in op.inputs[..n].iter().enumerate() {
        inputs[k + 1] = model.tensor(i)?
    }
    inputs[0] = concat_axis(op, model)?;
    model.basic(OpType::Concat_f, Padding::Na, &inputs, &op.outputs)
}

pub(super) fn conv_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, &model.operands)?;
    let input = model.tensor(op.inputs[0])?;
    let filter = model.conv_filter(op.inputs[1])?;
    let bias = model.tensor(op.inputs[2])?;
    let act = model.float_activation(parsed.activation)?;
    let stride = stride_node(model, &parsed.window)?;
    model.fused_float(
        OpType::Conv2d_f,
        parsed.window.padding,
        &[input, filter, stride],
        bias,
        act,
        &op.outputs,
    )
}

pub(super) fn depthwise_conv_2d(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, &model.operands)?;
    let input = model.tensor(op.inputs[0])?;
    let bias = model.tensor(op.inputs[2])?;
    let act = model.float_activation(parsed.activation)?;
    let filter = model.depthwise_filter(op.inputs[1], parsed.depth_multiplier)?;
    let stride = stride_node(model, &parsed.window)?;
    model.fused_float(
        OpType::DepthwiseConv2d_f,
        parsed.window.padding,
        &[input, filter, stride],
        bias,
        act,
        &op.outputs,
    )
}

pub(super) fn fully_connected(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 4)?;
    let input = model.tensor(op.inputs[0])?;
    let weights = model.fc_weights(op.inputs[1])?;
    let bias = model.tensor(op.inputs[2])?;
    let act = model.float_activation(op.inputs[3])?;
    model.fused_float(
        OpType::MatMul_f,
        Padding::Na,
        &[input, weights],
        bias,
        act,
        &op.outputs,
    )
}

pub(super) fn local_response_normalization(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 5)?;
    let n = check::lrn_window(op, &model.operands)?;
    let input = model.tensor(op.inputs[0])?;
    let bias = model.tensor(op.inputs[2])?;
    let alpha = model.tensor(op.inputs[3])?;
    let beta = model.tensor(op.inputs[4])?;
    let window = model.values([1, 1, 1, n], &vec![1f32; n as usize])?;
    model.basic(
        OpType::LRN_f,
        Padding::Na,
        &[input, window, bias, alpha, beta],
        &op.outputs,
    )
}

fn unary(ty: OpType, op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let input = model.tensor(op.inputs[0])?;
    model.basic(ty, Padding::Na, &[input], &op.outputs)
}

pub(super) fn logistic(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    unary(OpType::Sigmoid_f, op, model)
}

pub(super) fn relu(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    unary(OpType::Relu_f, op, model)
}

pub(super) fn tanh(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    unary(OpType::Tanh_f, op, model)
}

pub(super) fn relu1(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let input = model.tensor(op.inputs[0])?;
    let min = model.scalar(-1f32)?;
    let max = model.scalar(1f32)?;
    model.basic(OpType::Clamp_f, Padding::Na, &[input, min, max], &op.outputs)
}

pub(super) fn relu6(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let input = model.tensor(op.inputs[0])?;
    let max = model.scalar(6f32)?;
    model.basic(OpType::ReluX_f, Padding::Na, &[input, max], &op.outputs)
}

pub(super) fn reshape(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 2)?;
    let input = model.tensor(op.inputs[0])?;
    let dims = model.tensor(op.inputs[1])?;
    model.basic(OpType::Reshape, Padding::Na, &[input, dims], &op.outputs)
}

pub(super) fn resize_bilinear(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 3)?;
    let input = model.tensor(op.inputs[0])?;
    let width = model.operands.scalar::<i32>(op.inputs[1])?;
    let height = model.operands.scalar::<i32>(op.inputs[2])?;
    let size = model.values([1, 1, 1, 2], &[height, width])?;
    model.basic(OpType::ResizeBilinear_f, Padding::Na, &[input, size], &op.outputs)
}

pub(super) fn softmax(op: &Operation, model: &mut Model<'_>) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 2)?;
    let input = model.tensor(op.inputs[0])?;
    let beta = model.tensor(op.inputs[1])?;
    model.basic(OpType::Softmax_f, Padding::Na, &[input, beta], &op.outputs)
}

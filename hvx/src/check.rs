//! 各算子的输入检查与输出形状推导。

use crate::{
    HvxError, HvxResult,
    desc::{Operation, OperationType},
    error::{arity, shape_err},
    operand::Operands,
    registry::Registry,
    shape::Shape,
    window,
};
use itertools::izip;

fn single_output(op: &Operation) -> HvxResult<u32> {
    match op.outputs[..] {
        [out] => Ok(out),
        _ => Err(shape_err(
            op.ty,
            format!("expect 1 output, got {}", op.outputs.len()),
        )),
    }
}

fn rank4(op: &Operation, shape: &Shape) -> HvxResult<[u32; 4]> {
    match shape.dimensions[..] {
        [n, h, w, c] => Ok([n, h, w, c]),
        _ => Err(shape_err(
            op.ty,
            format!("{:?} is not NHWC", shape.dimensions),
        )),
    }
}

fn max_rank4(op: &Operation, shape: &Shape) -> HvxResult<()> {
    if shape.rank() > 4 {
        Err(shape_err(op.ty, format!("rank {} exceeds 4", shape.rank())))
    } else {
        Ok(())
    }
}

/// 常量的数据必须恰好覆盖声明的形状。
fn constant(op: &Operation, operands: &Operands, i: u32) -> HvxResult<()> {
    if !operands.is_constant(i)? {
        return Err(HvxError::NotConstant {
            op: op.ty,
            operand: i,
        });
    }
    let expected = operands.byte_len(i)?;
    let actual = operands.data(i)?.len();
    if actual != expected {
        return Err(HvxError::Data {
            operand: i,
            reason: format!("expect {expected} bytes, got {actual}"),
        });
    }
    Ok(())
}

/// 按尾部对齐规则广播两个形状。
pub(crate) fn broadcast(a: &[u32], b: &[u32]) -> Option<Vec<u32>> {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut ans = long.to_vec();
    let offset = long.len() - short.len();
    for (dst, &d) in izip!(&mut ans[offset..], short) {
        match (*dst, d) {
            (x, y) if x == y => {}
            (1, y) => *dst = y,
            (_, 1) => {}
            _ => return None,
        }
    }
    Some(ans)
}

pub(crate) fn elementwise(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 3)?;
    let out = single_output(op)?;
    let a = operands.shape(op.inputs[0])?;
    let b = operands.shape(op.inputs[1])?;
    if a.ty != b.ty {
        return Err(shape_err(op.ty, format!("{:?} with {:?}", a.ty, b.ty)));
    }
    max_rank4(op, &a)?;
    max_rank4(op, &b)?;
    let dims = broadcast(&a.dimensions, &b.dimensions).ok_or_else(|| {
        shape_err(
            op.ty,
            format!("cannot broadcast {:?} with {:?}", a.dimensions, b.dimensions),
        )
    })?;
    operands.set_shape(out, dims)
}

pub(crate) fn pool(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, operands)?;
    let out = single_output(op)?;
    let [n, h, w, c] = rank4(op, &operands.shape(op.inputs[0])?)?;
    let [oh, ow] = parsed.window.out_hw(op.ty, h, w)?;
    operands.set_shape(out, vec![n, oh, ow, c])
}

pub(crate) fn concatenation(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    let n = op.inputs.len();
    if n < 3 {
        return Err(HvxError::Arity {
            op: op.ty,
            expected: "at least 3".into(),
            actual: n,
        });
    }
    let out = single_output(op)?;
    let axis = operands.scalar::<i32>(op.inputs[n - 1])?;
    let first = operands.shape(op.inputs[0])?;
    max_rank4(op, &first)?;
    let axis = usize::try_from(axis)
        .ok()
        .filter(|&axis| axis < first.rank())
        .ok_or_else(|| shape_err(op.ty, format!("axis {axis} out of rank {}", first.rank())))?;

    let mut dims = first.dimensions.clone();
    for &i in &op.inputs[1..n - 1] {
        let shape = operands.shape(i)?;
        if shape.ty != first.ty || shape.rank() != first.rank() {
            return Err(shape_err(op.ty, format!("operand {i} mismatches the first input")));
        }
        if first.ty.is_quant8() && !shape.same_quant(&first) {
            return Err(shape_err(op.ty, format!("operand {i} is quantized differently")));
        }
        for (k, (&a, &b)) in izip!(&first.dimensions, &shape.dimensions).enumerate() {
            if k != axis && a != b {
                return Err(shape_err(
                    op.ty,
                    format!("{:?} cannot join {:?}", first.dimensions, shape.dimensions),
                ));
            }
        }
        dims[axis] = dims[axis]
            .checked_add(shape.dimensions[axis])
            .ok_or_else(|| shape_err(op.ty, format!("axis {axis} overflows")))?
    }
    operands.set_shape(out, dims)
}

pub(crate) fn conv(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, operands)?;
    let out = single_output(op)?;
    constant(op, operands, op.inputs[1])?;
    let [n, h, w, c] = rank4(op, &operands.shape(op.inputs[0])?)?;
    let [o, _, _, ci] = rank4(op, &operands.shape(op.inputs[1])?)?;
    if ci != c {
        return Err(shape_err(op.ty, format!("filter depth {ci} mismatches input {c}")));
    }
    let [oh, ow] = parsed.window.out_hw(op.ty, h, w)?;
    operands.set_shape(out, vec![n, oh, ow, o])
}

pub(crate) fn depthwise_conv(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    let parsed = window::parse(op.ty, &op.inputs, operands)?;
    let out = single_output(op)?;
    constant(op, operands, op.inputs[1])?;
    let [n, h, w, c] = rank4(op, &operands.shape(op.inputs[0])?)?;
    let [_, _, _, o] = rank4(op, &operands.shape(op.inputs[1])?)?;
    if c.checked_mul(parsed.depth_multiplier) != Some(o) {
        return Err(shape_err(
            op.ty,
            format!("depth {c} x {} is not {o}", parsed.depth_multiplier),
        ));
    }
    let [oh, ow] = parsed.window.out_hw(op.ty, h, w)?;
    operands.set_shape(out, vec![n, oh, ow, o])
}

pub(crate) fn dequantize(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let out = single_output(op)?;
    let input = operands.shape(op.inputs[0])?;
    max_rank4(op, &input)?;
    if !input.ty.is_quant8() {
        return Err(shape_err(op.ty, format!("{:?} is not quantized", input.ty)));
    }
    operands.set_shape(out, input.dimensions)
}

pub(crate) fn fully_connected(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 4)?;
    let out = single_output(op)?;
    constant(op, operands, op.inputs[1])?;
    let input = operands.shape(op.inputs[0])?;
    let weights = operands.shape(op.inputs[1])?;
    let &[units, input_size] = &weights.dimensions[..] else {
        return Err(shape_err(op.ty, "weights are not 2D"));
    };
    let rows = input
        .numel()
        .filter(|&n| input_size != 0 && n % input_size as u64 == 0)
        .and_then(|n| u32::try_from(n / input_size as u64).ok())
        .ok_or_else(|| {
            shape_err(
                op.ty,
                format!("{:?} cannot be split into rows of {input_size}", input.dimensions),
            )
        })?;
    operands.set_shape(out, vec![rows, units])
}

/// LRN 的全 1 窗口长度 `2 * radius + 1`。
///
/// 半径达到通道数时窗口已覆盖所有通道，因此按通道数截断。
pub(crate) fn lrn_window(op: &Operation, operands: &Operands) -> HvxResult<u32> {
    let [_, _, _, c] = rank4(op, &operands.shape(op.inputs[0])?)?;
    let radius = operands.scalar::<i32>(op.inputs[1])?;
    let radius =
        u32::try_from(radius).map_err(|_| shape_err(op.ty, format!("negative radius {radius}")))?;
    Ok(radius.min(c.saturating_sub(1)) * 2 + 1)
}

pub(crate) fn local_response_normalization(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 5)?;
    let out = single_output(op)?;
    lrn_window(op, operands)?;
    let input = operands.shape(op.inputs[0])?;
    operands.set_shape(out, input.dimensions)
}

/// 输出与输入同形的单输入算子。
pub(crate) fn unary(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 1)?;
    let out = single_output(op)?;
    let input = operands.shape(op.inputs[0])?;
    max_rank4(op, &input)?;
    operands.set_shape(out, input.dimensions)
}

pub(crate) fn softmax(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 2)?;
    let out = single_output(op)?;
    let input = operands.shape(op.inputs[0])?;
    max_rank4(op, &input)?;
    operands.set_shape(out, input.dimensions)
}

pub(crate) fn reshape(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 2)?;
    let out = single_output(op)?;
    let input = operands.shape(op.inputs[0])?;
    let target = operands.values::<i32>(op.inputs[1])?;
    let bad = || shape_err(op.ty, format!("bad target shape {target:?}"));
    if target.len() > 4 {
        return Err(bad());
    }

    let total = input
        .numel()
        .ok_or_else(|| shape_err(op.ty, format!("{:?} is too large", input.dimensions)))?;
    let mut wildcard = None;
    let mut known = 1u64;
    for (k, &d) in target.iter().enumerate() {
        match d {
            -1 if wildcard.is_none() => wildcard = Some(k),
            d if d > 0 => known = known.checked_mul(d as u64).ok_or_else(bad)?,
            _ => return Err(bad()),
        }
    }
    let mut dims = target.iter().map(|&d| d.max(0) as u32).collect::<Vec<_>>();
    if let Some(k) = wildcard {
        dims[k] = Some(total / known)
            .filter(|_| total % known == 0)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| shape_err(op.ty, format!("cannot infer {target:?} from {total}")))?
    }
    let numel = dims
        .iter()
        .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64));
    if numel != Some(total) {
        return Err(shape_err(
            op.ty,
            format!("cannot reshape {:?} to {target:?}", input.dimensions),
        ));
    }
    operands.set_shape(out, dims)
}

pub(crate) fn resize_bilinear(op: &Operation, operands: &mut Operands) -> HvxResult<()> {
    arity(op.ty, &op.inputs, 3)?;
    let out = single_output(op)?;
    let [n, _, _, c] = rank4(op, &operands.shape(op.inputs[0])?)?;
    let size = |i: u32| -> HvxResult<u32> {
        let v = operands.scalar::<i32>(i)?;
        u32::try_from(v)
            .ok()
            .filter(|&v| v > 0)
            .ok_or_else(|| shape_err(op.ty, format!("bad size {v}")))
    };
    let width = size(op.inputs[1])?;
    let height = size(op.inputs[2])?;
    operands.set_shape(out, vec![n, height, width, c])
}

/// 登记所有检查函数。
pub(crate) fn register(registry: &mut Registry) {
    use OperationType as Ty;
    registry
        .with_check(Ty::Add, elementwise)
        .with_check(Ty::Mul, elementwise)
        .with_check(Ty::AveragePool2d, pool)
        .with_check(Ty::L2Pool2d, pool)
        .with_check(Ty::MaxPool2d, pool)
        .with_check(Ty::Concatenation, concatenation)
        .with_check(Ty::Conv2d, conv)
        .with_check(Ty::DepthwiseConv2d, depthwise_conv)
        .with_check(Ty::Dequantize, dequantize)
        .with_check(Ty::FullyConnected, fully_connected)
        .with_check(Ty::LocalResponseNormalization, local_response_normalization)
        .with_check(Ty::Logistic, unary)
        .with_check(Ty::Relu, unary)
        .with_check(Ty::Relu1, unary)
        .with_check(Ty::Relu6, unary)
        .with_check(Ty::Tanh, unary)
        .with_check(Ty::Softmax, softmax)
        .with_check(Ty::Reshape, reshape)
        .with_check(Ty::ResizeBilinear, resize_bilinear);
}

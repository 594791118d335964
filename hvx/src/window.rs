//! 池化与卷积类算子共享的窗口参数解析。

use crate::{
    HvxError, HvxResult,
    desc::OperationType,
    error::{arity_either, shape_err},
    operand::Operands,
    shape::{implicit_padding, out_size, padding_scheme, same_padding},
};
use nnlib::Padding;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Window {
    pub filter_w: u32,
    pub filter_h: u32,
    pub stride_w: u32,
    pub stride_h: u32,
    /// 左右上下四边的补齐。
    pub pads: [u32; 4],
    pub padding: Padding,
}

impl Window {
    /// NHWC 输入经过窗口后的 `[out_h, out_w]`。
    pub fn out_hw(&self, op: OperationType, in_h: u32, in_w: u32) -> HvxResult<[u32; 2]> {
        let [l, r, t, b] = self.pads;
        let w = out_size(in_w, self.filter_w, self.stride_w, l, r);
        let h = out_size(in_h, self.filter_h, self.stride_h, t, b);
        match (h, w) {
            (Some(h), Some(w)) => Ok([h, w]),
            _ => Err(shape_err(
                op,
                format!(
                    "window {}x{} stride {}x{} does not fit {in_h}x{in_w}",
                    self.filter_h, self.filter_w, self.stride_h, self.stride_w
                ),
            )),
        }
    }
}

/// 解析后的窗口类算子参数。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct WindowOp {
    pub window: Window,
    pub depth_multiplier: u32,
    /// 融合激活函数所在的操作数。
    pub activation: u32,
}

/// 按算子类型解析显式或隐式补齐形式的参数。
///
/// 池化：`input, [l, r, t, b | code], sw, sh, fw, fh, act`；
/// 卷积：`input, filter, bias, [l, r, t, b | code], sw, sh, act`；
/// 深度卷积在 `act` 前多一个通道倍数。
pub(crate) fn parse(op: OperationType, ins: &[u32], operands: &Operands) -> HvxResult<WindowOp> {
    use OperationType as Ty;
    let (base, explicit) = match op {
        Ty::AveragePool2d | Ty::L2Pool2d | Ty::MaxPool2d => (1, arity_either(op, ins, 10, 7)?),
        Ty::Conv2d => (3, arity_either(op, ins, 10, 7)?),
        Ty::DepthwiseConv2d => (3, arity_either(op, ins, 11, 8)?),
        _ => return Err(HvxError::Unsupported(op)),
    };

    let input = operands.shape(ins[0])?;
    let &[_, in_h, in_w, _] = &input.dimensions[..] else {
        return Err(shape_err(op, format!("input {:?} is not NHWC", input.dimensions)));
    };
    let int = |k: usize| -> HvxResult<u32> {
        let v = operands.scalar::<i32>(ins[k])?;
        u32::try_from(v).map_err(|_| shape_err(op, format!("negative parameter {v}")))
    };

    let n_pads = if explicit { 4 } else { 1 };
    let stride_w = int(base + n_pads)?;
    let stride_h = int(base + n_pads + 1)?;
    let next = base + n_pads + 2;
    let (filter_w, filter_h, depth_multiplier) = match op {
        Ty::Conv2d => {
            let filter = operands.shape(ins[1])?;
            let &[_, fh, fw, _] = &filter.dimensions[..] else {
                return Err(shape_err(op, "filter is not 4D"));
            };
            (fw, fh, 1)
        }
        Ty::DepthwiseConv2d => {
            let filter = operands.shape(ins[1])?;
            let &[_, fh, fw, _] = &filter.dimensions[..] else {
                return Err(shape_err(op, "filter is not 4D"));
            };
            (fw, fh, int(next)?)
        }
        _ => (int(next)?, int(next + 1)?, 1),
    };
    if stride_w == 0 || stride_h == 0 || filter_w == 0 || filter_h == 0 {
        return Err(shape_err(op, "zero stride or window"));
    }

    let (pads, padding) = if explicit {
        let pads = [int(base)?, int(base + 1)?, int(base + 2)?, int(base + 3)?];
        let padding = padding_scheme(in_w, in_h, stride_w, stride_h, filter_w, filter_h, pads);
        if padding == Padding::Na {
            return Err(HvxError::UnknownPadding { op });
        }
        (pads, padding)
    } else {
        let code = operands.scalar::<i32>(ins[base])?;
        match implicit_padding(code) {
            Some(Padding::Same) => {
                let (l, r) = same_padding(in_w, stride_w, filter_w);
                let (t, b) = same_padding(in_h, stride_h, filter_h);
                ([l, r, t, b], Padding::Same)
            }
            Some(padding) => ([0; 4], padding),
            None => return Err(HvxError::UnknownPadding { op }),
        }
    };

    Ok(WindowOp {
        window: Window {
            filter_w,
            filter_h,
            stride_w,
            stride_h,
            pads,
            padding,
        },
        depth_multiplier,
        activation: ins[ins.len() - 1],
    })
}

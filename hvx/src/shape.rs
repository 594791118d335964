use crate::desc::OperandType;
use nnlib::Padding;

/// 操作数的类型、形状与量化参数。
#[derive(Clone, PartialEq, Debug)]
pub struct Shape {
    pub ty: OperandType,
    pub dimensions: Vec<u32>,
    pub scale: f32,
    pub zero_point: i32,
}

impl Shape {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// 元素个数，超出 `u64` 时为 `None`。
    pub fn numel(&self) -> Option<u64> {
        self.dimensions
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
    }

    pub fn same_quant(&self, other: &Self) -> bool {
        self.scale == other.scale && self.zero_point == other.zero_point
    }
}

/// 按 SAME 方案在一条轴上计算首尾补齐。
pub fn same_padding(input: u32, stride: u32, filter: u32) -> (u32, u32) {
    if stride == 0 {
        return (0, 0);
    }
    let output = input.div_ceil(stride) as u64;
    let needed = (output.saturating_sub(1) * stride as u64 + filter as u64)
        .saturating_sub(input as u64);
    // 不超过 filter
    let needed = needed as u32;
    let head = needed / 2;
    (head, needed - head)
}

/// 一条轴上的输出长度，窗口超出补齐后的输入时为 `None`。
pub fn out_size(input: u32, filter: u32, stride: u32, head: u32, tail: u32) -> Option<u32> {
    if stride == 0 {
        return None;
    }
    let padded = input.checked_add(head)?.checked_add(tail)?;
    padded.checked_sub(filter).map(|n| n / stride + 1)
}

/// 由显式补齐反推补齐方案，无法对应到 SAME 或 VALID 时为 [`Padding::Na`]。
#[allow(clippy::too_many_arguments)]
pub fn padding_scheme(
    in_w: u32,
    in_h: u32,
    stride_w: u32,
    stride_h: u32,
    filter_w: u32,
    filter_h: u32,
    [left, right, top, bottom]: [u32; 4],
) -> Padding {
    if left == 0 && right == 0 && top == 0 && bottom == 0 {
        return Padding::Valid;
    }
    let w = same_padding(in_w, stride_w, filter_w);
    let h = same_padding(in_h, stride_h, filter_h);
    if w == (left, right) && h == (top, bottom) {
        Padding::Same
    } else {
        Padding::Na
    }
}

/// 隐式补齐代码：1 为 SAME，2 为 VALID。
pub fn implicit_padding(code: i32) -> Option<Padding> {
    match code {
        1 => Some(Padding::Same),
        2 => Some(Padding::Valid),
        _ => None,
    }
}

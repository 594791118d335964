use ndarray_layout::{ArrayLayout, Endian::BigEndian};

/// 把 `data` 看作 `[rows, cols]` 的行主序矩阵，按元素宽 `size` 转置。
pub(crate) fn transpose(data: &[u8], rows: usize, cols: usize, size: usize) -> Vec<u8> {
    let layout = ArrayLayout::<2>::new_contiguous(&[rows, cols], BigEndian, size).transpose(&[1, 0]);
    let &[s0, s1] = layout.strides() else {
        return data.to_vec();
    };
    let base = layout.offset();

    let mut ans = Vec::with_capacity(data.len());
    for i in 0..cols as isize {
        for j in 0..rows as isize {
            let offset = (base + i * s0 + j * s1) as usize;
            ans.extend_from_slice(&data[offset..][..size])
        }
    }
    ans
}

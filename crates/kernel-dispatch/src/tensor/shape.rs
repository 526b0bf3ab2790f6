//! Dimension bookkeeping shared by tensor handles and kernels.

use smallvec::SmallVec;

/// Inline-allocated dimension list; most tensors have rank four or less.
pub type Dims = SmallVec<[usize; 4]>;

/// Row-major strides (in elements) for a contiguous tensor of `shape`.
pub fn contiguous_strides(shape: &[usize]) -> Dims {
    let mut strides: Dims = SmallVec::from_elem(1, shape.len());
    let mut running = 1usize;
    for (axis, &extent) in shape.iter().enumerate().rev() {
        strides[axis] = running;
        running = running.saturating_mul(extent.max(1));
    }
    strides
}

pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Whether `strides` describe a row-major layout for `shape`. Axes of extent one are ignored.
pub fn is_contiguous(shape: &[usize], strides: &[usize]) -> bool {
    let mut expected = 1usize;
    for (&extent, &stride) in shape.iter().zip(strides.iter()).rev() {
        if extent == 1 {
            continue;
        }
        if stride != expected {
            return false;
        }
        expected *= extent;
    }
    true
}

/// Number of storage elements a layout addresses: one past its largest offset, or zero when
/// the layout holds no elements. `None` if the offset arithmetic overflows.
pub fn storage_extent(shape: &[usize], strides: &[usize], offset: usize) -> Option<usize> {
    if numel(shape) == 0 {
        return Some(0);
    }
    shape
        .iter()
        .zip(strides.iter())
        .try_fold(offset, |last, (&extent, &stride)| {
            (extent - 1)
                .checked_mul(stride)
                .and_then(|span| last.checked_add(span))
        })
        .and_then(|last| last.checked_add(1))
}

/// Visits the element offset of every logical index in row-major order.
pub(crate) fn for_each_offset(
    shape: &[usize],
    strides: &[usize],
    base: usize,
    mut f: impl FnMut(usize),
) {
    let total = numel(shape);
    if total == 0 {
        return;
    }
    if is_contiguous(shape, strides) {
        (base..base + total).for_each(f);
        return;
    }
    let rank = shape.len();
    let mut index: Dims = SmallVec::from_elem(0, rank);
    let mut offset = base;
    for _ in 0..total {
        f(offset);
        for axis in (0..rank).rev() {
            index[axis] += 1;
            offset += strides[axis];
            if index[axis] < shape[axis] {
                break;
            }
            offset -= strides[axis] * shape[axis];
            index[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_strides_are_row_major() {
        assert_eq!(contiguous_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
        assert_eq!(contiguous_strides(&[0]).as_slice(), &[1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn offsets_follow_transposed_strides() {
        let mut seen = Vec::new();
        for_each_offset(&[2, 3], &[1, 2], 0, |offset| seen.push(offset));
        assert_eq!(seen, vec![0, 2, 4, 1, 3, 5]);
        assert!(!is_contiguous(&[2, 3], &[1, 2]));
        assert!(is_contiguous(&[1, 3], &[7, 1]));
    }
}

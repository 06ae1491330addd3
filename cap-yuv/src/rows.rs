// SPDX-License-Identifier: MIT
// Row helpers for GPU readbacks. GL returns rows bottom-up.

/// Reverses the order of `rows` rows of `stride` bytes in place.
///
/// Only the first `stride * rows` bytes are touched. Returns `false` without
/// modifying anything if the buffer is shorter than that.
pub fn flip_rows(buf: &mut [u8], stride: usize, rows: usize) -> bool {
    if buf.len() < stride * rows {
        return false;
    }
    for y in 0..(rows / 2) {
        let top_start = y * stride;
        let bottom_start = (rows - y - 1) * stride;
        let (head, tail) = buf.split_at_mut(bottom_start);
        head[top_start..top_start + stride].swap_with_slice(&mut tail[..stride]);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_even_rows() {
        let mut buf = vec![1, 1, 2, 2, 3, 3, 4, 4];
        assert!(flip_rows(&mut buf, 2, 4));
        assert_eq!(buf, vec![4, 4, 3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn test_flip_odd_rows_keeps_middle() {
        let mut buf = vec![1, 2, 3, 9];
        assert!(flip_rows(&mut buf, 1, 3));
        assert_eq!(buf, vec![3, 2, 1, 9]);
    }

    #[test]
    fn test_flip_rejects_short_buffer() {
        let mut buf = vec![1, 2, 3];
        assert!(!flip_rows(&mut buf, 2, 2));
        assert_eq!(buf, vec![1, 2, 3]);
    }
}

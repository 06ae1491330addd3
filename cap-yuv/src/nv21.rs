// SPDX-License-Identifier: MIT
// Integer BT.601 RGBA8 → NV21 converter.
// Luma per pixel, chroma per 2×2 block (block average), VU-interleaved chroma plane.

/// Bytes per RGBA pixel.
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    InputTooSmall { expected: usize, actual: usize },
    OutputTooSmall { expected: usize, actual: usize },
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::InputTooSmall { expected, actual } => {
                write!(f, "RGBA input too small: expected {} bytes, got {}", expected, actual)
            }
            ConvertError::OutputTooSmall { expected, actual } => {
                write!(f, "NV21 output too small: expected {} bytes, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for ConvertError {}

/// Size in bytes of a tightly packed RGBA frame.
#[inline]
pub fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGBA_BYTES_PER_PIXEL
}

/// Size in bytes of an NV21 frame.
///
/// The chroma plane holds one `V,U` pair per 2×2 block, rounding partial
/// blocks up, so this is exactly `width * height * 3 / 2` whenever both
/// dimensions are even.
#[inline]
pub fn nv21_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Studio-range luma for one pixel.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

/// Blue-difference chroma. `>>` on `i32` is an arithmetic shift.
#[inline]
pub fn chroma_u(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128)
}

/// Red-difference chroma.
#[inline]
pub fn chroma_v(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128)
}

/// Converts `width × height` tightly packed RGBA pixels into NV21.
///
/// `rgba` must hold at least [`rgba_len`] bytes and `out` at least
/// [`nv21_len`] bytes; extra trailing bytes in either are left untouched, which
/// lets callers pass pooled buffers sized for a larger resolution bound.
/// Alpha is ignored.
pub fn rgba_to_nv21(
    rgba: &[u8],
    width: u32,
    height: u32,
    out: &mut [u8],
) -> Result<(), ConvertError> {
    let needed_in = rgba_len(width, height);
    if rgba.len() < needed_in {
        return Err(ConvertError::InputTooSmall { expected: needed_in, actual: rgba.len() });
    }
    let needed_out = nv21_len(width, height);
    if out.len() < needed_out {
        return Err(ConvertError::OutputTooSmall { expected: needed_out, actual: out.len() });
    }

    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Ok(());
    }

    let stride = w * RGBA_BYTES_PER_PIXEL;
    let (y_plane, vu_plane) = out[..needed_out].split_at_mut(w * h);

    for (row, y_row) in y_plane.chunks_exact_mut(w).enumerate() {
        let src = &rgba[row * stride..(row + 1) * stride];
        for (dst, px) in y_row.iter_mut().zip(src.chunks_exact(RGBA_BYTES_PER_PIXEL)) {
            *dst = luma(px[0], px[1], px[2]);
        }
    }

    let blocks_x = w.div_ceil(2);
    let blocks_y = h.div_ceil(2);
    let pixel = |x: usize, y: usize| -> [i32; 3] {
        let i = y * stride + x * RGBA_BYTES_PER_PIXEL;
        [rgba[i] as i32, rgba[i + 1] as i32, rgba[i + 2] as i32]
    };

    for by in 0..blocks_y {
        let y0 = by * 2;
        let y1 = (y0 + 1).min(h - 1);
        for bx in 0..blocks_x {
            let x0 = bx * 2;
            let x1 = (x0 + 1).min(w - 1);

            let mut sum = [0i32; 3];
            for [r, g, b] in [pixel(x0, y0), pixel(x1, y0), pixel(x0, y1), pixel(x1, y1)] {
                sum[0] += r;
                sum[1] += g;
                sum[2] += b;
            }
            let (r, g, b) = ((sum[0] / 4) as u8, (sum[1] / 4) as u8, (sum[2] / 4) as u8);

            let i = (by * blocks_x + bx) * 2;
            vu_plane[i] = chroma_v(r, g, b);
            vu_plane[i + 1] = chroma_u(r, g, b);
        }
    }

    Ok(())
}

/// Allocating variant of [`rgba_to_nv21`].
pub fn rgba_to_nv21_vec(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let mut out = vec![0u8; nv21_len(width, height)];
    rgba_to_nv21(rgba, width, height, &mut out)?;
    Ok(out)
}

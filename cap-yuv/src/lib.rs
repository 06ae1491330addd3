// SPDX-License-Identifier: MIT
//! # cap-yuv: RGBA → NV21 Conversion for Live Capture
//!
//! This crate turns interleaved 8-bit RGBA pixels (as read back from a GPU color
//! buffer) into NV21: a full-resolution luma plane followed by one interleaved
//! `V,U` pair per 2×2 block. It is the CPU stage of the dualcam capture pipeline
//! and runs on the conversion worker, off the render thread.
//!
//! ## Key Components
//!
//! - [`nv21`]: integer BT.601 conversion (`rgba_to_nv21`, plane size helpers)
//! - [`rows`]: row-level helpers for bottom-up readbacks (`flip_rows`)
//!
//! ## Conversion Rules
//!
//! - **Luma**: `Y = ((66R + 129G + 25B + 128) >> 8) + 16`
//! - **Chroma**: `U = ((-38R - 74G + 112B + 128) >> 8) + 128`,
//!   `V = ((112R - 94G - 18B + 128) >> 8) + 128`
//! - **Sampling**: chroma is computed from the average of the four pixels of
//!   each 2×2 block. Blocks hanging over an odd right or bottom edge repeat the
//!   last valid column/row.
//! - **Layout**: `V` is stored before `U`. Downstream sinks depend on this order.
//!
//! Every function here only touches the slices it is given, so conversions can
//! run on any thread without synchronisation.
//!
//! ## Usage Example
//!
//! ```rust
//! use cap_yuv::nv21::{nv21_len, rgba_to_nv21};
//!
//! let (w, h) = (4u32, 4u32);
//! let red = [255u8, 0, 0, 255].repeat((w * h) as usize);
//! let mut out = vec![0u8; nv21_len(w, h)];
//! rgba_to_nv21(&red, w, h, &mut out).unwrap();
//! assert_eq!(out.len(), (w * h * 3 / 2) as usize);
//! assert!(out[..16].iter().all(|&y| y == 82));
//! ```

pub mod nv21;
pub mod rows;

pub use nv21::{nv21_len, rgba_len, rgba_to_nv21, rgba_to_nv21_vec, ConvertError};
pub use rows::flip_rows;

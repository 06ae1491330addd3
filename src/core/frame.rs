//! Frame dimensions and the converted frame value passed from the conversion
//! worker to the transmission thread.

use std::fmt;

/// Pixel dimensions of a rendered surface or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Bytes needed for a tightly packed RGBA readback of this size.
    pub fn rgba_len(&self) -> usize {
        cap_yuv::rgba_len(self.w, self.h)
    }

    /// Bytes of the NV21 frame produced from this size.
    pub fn nv21_len(&self) -> usize {
        cap_yuv::nv21_len(self.w, self.h)
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// True if a frame of `other` fits in buffers sized for `self`.
    pub fn contains(&self, other: Size) -> bool {
        other.w <= self.w && other.h <= self.h
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// A converted NV21 frame.
///
/// Produced once by the conversion worker and consumed at most once by the
/// sink. `data` may be longer than [`Size::nv21_len`] when it came from a pool
/// sized for a larger resolution bound; use [`Nv21Frame::bytes`] for the
/// frame's own bytes.
#[derive(Debug)]
pub struct Nv21Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture timestamp in nanoseconds since the pipeline started.
    pub pts_ns: u64,
}

impl Nv21Frame {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// The luma plane followed by the VU plane, without any pool padding.
    pub fn bytes(&self) -> &[u8] {
        let len = self.size().nv21_len().min(self.data.len());
        &self.data[..len]
    }

    /// Gives the backing buffer back, e.g. to return it to a pool.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_lengths() {
        let size = Size::new(1280, 720);
        assert_eq!(size.rgba_len(), 1280 * 720 * 4);
        assert_eq!(size.nv21_len(), 1280 * 720 * 3 / 2);
        assert_eq!(size.to_string(), "1280x720");
        assert!(Size::new(1920, 1080).contains(size));
        assert!(!size.contains(Size::new(1920, 1080)));
        assert!(Size::new(0, 10).is_empty());
    }

    #[test]
    fn test_frame_bytes_trims_pool_padding() {
        let frame = Nv21Frame {
            data: vec![1u8; 64],
            width: 2,
            height: 2,
            pts_ns: 5,
        };
        assert_eq!(frame.bytes().len(), 6);
        assert_eq!(frame.into_data().len(), 64);
    }
}

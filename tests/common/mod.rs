//! Common test utilities and helpers for the capture pipeline tests
//!
//! This module provides shared utilities for testing various components
//! of the capture library.
#![allow(dead_code)]

/// Test frame utilities and constants
pub mod test_frames {
    use dualcam_capture::Size;

    /// Standard test sizes
    pub const TINY_SIZE: Size = Size { w: 4, h: 4 };
    pub const SMALL_SIZE: Size = Size { w: 16, h: 12 };
    pub const ODD_SIZE: Size = Size { w: 5, h: 3 };
    pub const HD_SIZE: Size = Size { w: 1280, h: 720 };

    pub const RED: [u8; 4] = [255, 0, 0, 255];
    pub const WHITE: [u8; 4] = [255, 255, 255, 255];
    pub const BLACK: [u8; 4] = [0, 0, 0, 255];

    /// Create a solid color RGBA frame
    pub fn create_solid_frame(size: Size, rgba: [u8; 4]) -> Vec<u8> {
        let mut data = vec![0u8; size.rgba_len()];
        for pixel in data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        data
    }

    /// Create a gradient frame: red follows x, green follows y
    pub fn create_gradient_frame(size: Size) -> Vec<u8> {
        let mut data = vec![0u8; size.rgba_len()];
        for y in 0..size.h {
            for x in 0..size.w {
                let i = ((y * size.w + x) * 4) as usize;
                let r = (x * 255 / size.w.max(2).saturating_sub(1).max(1)) as u8;
                let g = (y * 255 / size.h.max(2).saturating_sub(1).max(1)) as u8;
                data[i..i + 4].copy_from_slice(&[r, g, 128, 255]);
            }
        }
        data
    }
}

/// Sinks recording what the transmission thread delivered
pub mod sinks {
    use std::sync::{Arc, Mutex};

    /// One delivered frame
    #[derive(Debug, Clone)]
    pub struct SentFrame {
        pub nv21: Vec<u8>,
        pub width: u32,
        pub height: u32,
        pub pts_ns: u64,
    }

    /// Sink that copies every frame into a shared list
    #[derive(Clone, Default)]
    pub struct CollectingSink {
        frames: Arc<Mutex<Vec<SentFrame>>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Closure form accepted by `CapturePipelineBuilder::with_sink`
        pub fn sink(
            &self,
        ) -> impl FnMut(&[u8], u32, u32, u64) -> anyhow::Result<()> + Send + 'static {
            let frames = Arc::clone(&self.frames);
            move |nv21: &[u8], width: u32, height: u32, pts_ns: u64| -> anyhow::Result<()> {
                frames.lock().unwrap().push(SentFrame {
                    nv21: nv21.to_vec(),
                    width,
                    height,
                    pts_ns,
                });
                Ok(())
            }
        }

        pub fn frames(&self) -> Vec<SentFrame> {
            self.frames.lock().unwrap().clone()
        }

        pub fn len(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }
}

/// Custom assertions for testing
pub mod assertions {
    use super::sinks::SentFrame;
    use dualcam_capture::Size;

    /// Assert that a delivered frame has the expected size and NV21 length
    pub fn assert_frame_size(frame: &SentFrame, expected: Size) {
        assert_eq!(
            (frame.width, frame.height),
            (expected.w, expected.h),
            "Frame size mismatch: expected {}, got {}x{}",
            expected,
            frame.width,
            frame.height
        );
        assert_eq!(
            frame.nv21.len(),
            expected.nv21_len(),
            "NV21 length mismatch for {}",
            expected
        );
    }

    /// Assert that a frame is one flat color: every luma sample `y`, every
    /// chroma pair `v, u`
    pub fn assert_solid_nv21(frame: &SentFrame, y: u8, v: u8, u: u8) {
        let luma_len = (frame.width * frame.height) as usize;
        let (luma, chroma) = frame.nv21.split_at(luma_len);
        assert!(luma.iter().all(|&s| s == y), "Luma mismatch, expected {}", y);
        for pair in chroma.chunks_exact(2) {
            assert_eq!(pair, &[v, u], "Chroma mismatch, expected V={} U={}", v, u);
        }
    }

    /// Assert that timestamps strictly increase
    pub fn assert_monotonic(frames: &[SentFrame]) {
        for pair in frames.windows(2) {
            assert!(
                pair[0].pts_ns < pair[1].pts_ns,
                "Timestamps out of order: {} then {}",
                pair[0].pts_ns,
                pair[1].pts_ns
            );
        }
    }
}

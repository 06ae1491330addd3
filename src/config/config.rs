//! # Configuration Module
//!
//! Tuning parameters of the capture pipeline, shared by the library and the
//! `dualcam` CLI.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Default | Constraint | Description |
//! |-----------|------|---------|------------|-------------|
//! | `max_size` | `Size` | 1920x1080 | non-zero | Resolution bound the buffer pools are sized for |
//! | `initial_size` | `Size` | 1280x720 | non-zero | Render size the transfer slots start at |
//! | `slot_count` | `usize` | 2 | >= 2 | GPU transfer slots in the readback ring |
//! | `pool_capacity` | `usize` | 3 | >= 1 | Buffers per pool (RGBA and NV21) |
//! | `queue_capacity` | `usize` | 5 | >= 1 | Converted frames awaiting transmission |
//! | `worker_backlog` | `usize` | 2 | >= 1 | Readbacks waiting for the conversion worker |
//! | `poll_interval` | `Duration` | 2 ms | > 0 | Transmitter back-off when the queue is empty |
//! | `flip_vertical` | `bool` | false | | Flip bottom-up readbacks before conversion |
//! | `target_fps` | `u32` | 30 | 1-120 | Render tick rate of the driving loop |
//!
//! ## Examples
//!
//! ```rust
//! use dualcam_capture::config::config::PipelineConfig;
//! use dualcam_capture::core::frame::Size;
//!
//! let config = PipelineConfig {
//!     initial_size: Size::new(640, 480),
//!     queue_capacity: 3,
//!     ..PipelineConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::core::frame::Size;
use crate::error::{CaptureError, CaptureResult};

/// Configuration of a [`CapturePipeline`](crate::pipeline::capture::CapturePipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Largest render size expected. Pool buffers are allocated for this bound
    /// rather than the live size, and grow if a resize exceeds it.
    pub max_size: Size,

    /// Size of the rendered surface when the pipeline starts.
    pub initial_size: Size,

    /// Number of transfer slots. Frames arrive `slot_count - 1` ticks late.
    pub slot_count: usize,

    /// Pre-allocated buffers in each of the RGBA and NV21 pools.
    pub pool_capacity: usize,

    /// Depth of the drop-oldest frame queue.
    pub queue_capacity: usize,

    /// Readbacks that may wait for the conversion worker before new ones are
    /// dropped.
    pub worker_backlog: usize,

    /// How long the transmission thread sleeps when the queue is empty.
    pub poll_interval: Duration,

    /// Reverse row order before conversion, for bottom-left-origin readbacks.
    pub flip_vertical: bool,

    /// Ticks per second of the render loop driving the pipeline.
    pub target_fps: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_size: Size::new(1920, 1080),
            initial_size: Size::new(1280, 720),
            slot_count: 2,
            pool_capacity: 3,
            queue_capacity: 5,
            worker_backlog: 2,
            poll_interval: Duration::from_millis(2),
            flip_vertical: false,
            target_fps: 30,
        }
    }
}

impl PipelineConfig {
    /// Validates every field against its documented constraint.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.max_size.is_empty() {
            return Err(CaptureError::config(
                "max_size",
                self.max_size.to_string(),
                "dimensions must be non-zero",
            ));
        }
        if self.initial_size.is_empty() {
            return Err(CaptureError::config(
                "initial_size",
                self.initial_size.to_string(),
                "dimensions must be non-zero",
            ));
        }
        if self.slot_count < 2 {
            return Err(CaptureError::config(
                "slot_count",
                self.slot_count.to_string(),
                "must be at least 2",
            ));
        }
        if self.pool_capacity == 0 {
            return Err(CaptureError::config("pool_capacity", "0", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(CaptureError::config("queue_capacity", "0", "must be at least 1"));
        }
        if self.worker_backlog == 0 {
            return Err(CaptureError::config("worker_backlog", "0", "must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(CaptureError::config(
                "poll_interval",
                "0ms",
                "must be greater than zero",
            ));
        }
        if !(1..=120).contains(&self.target_fps) {
            return Err(CaptureError::config(
                "target_fps",
                self.target_fps.to_string(),
                "must be between 1 and 120",
            ));
        }
        Ok(())
    }

    /// Time between render ticks at `target_fps`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }

    /// Size the pools are allocated for: the larger of `max_size` and
    /// `initial_size` in each dimension.
    pub fn pool_size(&self) -> Size {
        Size::new(
            self.max_size.w.max(self.initial_size.w),
            self.max_size.h.max(self.initial_size.h),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_size, Size::new(1920, 1080));
        assert_eq!(config.slot_count, 2);
        assert_eq!(config.pool_capacity, 3);
        assert_eq!(config.queue_capacity, 5);
        assert!(!config.flip_vertical);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();

        config.slot_count = 1;
        assert!(config.validate().is_err());
        config.slot_count = 2; // Reset

        config.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("queue_capacity"));
        config.queue_capacity = 5;

        config.initial_size = Size::new(0, 720);
        assert!(config.validate().is_err());
        config.initial_size = Size::new(1280, 720);

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = Duration::from_millis(2);

        config.target_fps = 0;
        assert!(config.validate().is_err());
        config.target_fps = 121;
        assert!(config.validate().is_err());
        config.target_fps = 60;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_size_covers_initial_size() {
        let config = PipelineConfig {
            max_size: Size::new(640, 480),
            initial_size: Size::new(800, 400),
            ..PipelineConfig::default()
        };
        assert_eq!(config.pool_size(), Size::new(800, 480));
        assert_eq!(config.frame_interval(), Duration::from_secs(1) / 30);
    }
}

//! # Dual-Camera Capture Library
//!
//! Asynchronous capture-and-convert pipeline for a composited two-camera
//! surface: rendered RGBA pixels are read back from the GPU without stalling
//! the render thread, converted to NV21 on a worker thread, and handed to a
//! transport sink from a transmission thread.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `readback`: GPU transfer slots in a round-robin ring, behind the
//!   `ReadbackDevice` capability (software and OpenGL backends)
//! - `pipeline`: per-tick orchestration, the conversion worker, the
//!   transmission thread and shared counters
//! - `core`: frame types, the buffer pool and the drop-oldest frame queue
//! - `config`: pipeline configuration and validation
//! - `error`: error types and classification
//!
//! Colorspace conversion lives in the `cap-yuv` workspace crate.
//!
//! ## Features
//!
//! - **No render stalls**: reads are issued on one tick and mapped on the next
//! - **Bounded memory**: pooled buffers and a fixed-depth queue that drops the
//!   oldest frame under backpressure
//! - **Live-first**: frames arrive in capture order with monotonic timestamps;
//!   stale frames are dropped, never delayed
//! - **`gl` feature**: pixel-pack-buffer readback over `glow`
//!
//! ## Example
//!
//! ```rust
//! use dualcam_capture::{CapturePipeline, PipelineConfig, RenderedFrameHandler, Size};
//! use dualcam_capture::readback::software::{SoftwareDevice, SoftwareFramebuffer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let size = Size::new(320, 240);
//! let framebuffer = SoftwareFramebuffer::new(size);
//! let mut pipeline = CapturePipeline::builder()
//!     .with_config(PipelineConfig {
//!         initial_size: size,
//!         ..PipelineConfig::default()
//!     })
//!     .with_device(SoftwareDevice::new(framebuffer.clone()))
//!     .with_sink(|_nv21: &[u8], _w: u32, _h: u32, _pts: u64| -> anyhow::Result<()> { Ok(()) })
//!     .build()?;
//!
//! framebuffer.fill([0, 128, 255, 255]);
//! pipeline.on_frame_rendered(size);
//! pipeline.on_frame_rendered(size);
//! pipeline.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod readback;

/// Re-export error types for convenience
pub use crate::error::{CaptureError, CaptureResult, ErrorSeverity};

pub use crate::config::config::PipelineConfig;
pub use crate::core::buffer_pool::{BufferPool, PoolExhausted};
pub use crate::core::frame::{Nv21Frame, Size};
pub use crate::core::frame_queue::FrameQueue;
pub use crate::pipeline::capture::{CapturePipeline, CapturePipelineBuilder, RenderedFrameHandler};
pub use crate::pipeline::stats::StatsSnapshot;
pub use crate::pipeline::transmit::{FrameSink, WriterSink};
pub use crate::readback::device::ReadbackDevice;
pub use crate::readback::ring::{ReadbackRing, SkipReason, TickOutcome};

/// Re-export the conversion crate
pub use cap_yuv;

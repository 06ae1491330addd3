//! # Capture Pipeline
//!
//! Orchestrates the capture-and-convert path for one rendered surface.
//!
//! ## Per-Tick Flow
//!
//! ```text
//!  render thread                  conversion worker          transmission thread
//!  ─────────────                  ─────────────────          ───────────────────
//!  on_frame_rendered(size)
//!   ├─ resize if size changed
//!   ├─ ring.tick: issue read N,
//!   │  map read N-1 ─▶ copy into
//!   │  RGBA pool buffer
//!   ├─ stamp pts
//!   └─ try_send ───────────────▶ flip? → NV21 convert
//!                                 → FrameQueue::push ─────▶ pop → sink.send_frame
//!                                 (evicted → NV21 pool)     → NV21 pool
//! ```
//!
//! Nothing on the render thread returns an error or blocks on the other
//! threads: failed maps, exhausted pools and a saturated worker are counted in
//! [`PipelineStats`] and the tick carries on.
//!
//! ## Example
//!
//! ```rust
//! use dualcam_capture::config::config::PipelineConfig;
//! use dualcam_capture::core::frame::Size;
//! use dualcam_capture::pipeline::capture::{CapturePipeline, RenderedFrameHandler};
//! use dualcam_capture::readback::software::{SoftwareDevice, SoftwareFramebuffer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let size = Size::new(64, 48);
//! let framebuffer = SoftwareFramebuffer::new(size);
//! let mut pipeline = CapturePipeline::builder()
//!     .with_config(PipelineConfig {
//!         initial_size: size,
//!         max_size: size,
//!         ..PipelineConfig::default()
//!     })
//!     .with_device(SoftwareDevice::new(framebuffer.clone()))
//!     .with_sink(|nv21: &[u8], _w: u32, _h: u32, _pts: u64| -> anyhow::Result<()> {
//!         assert_eq!(nv21.len(), 64 * 48 * 3 / 2);
//!         Ok(())
//!     })
//!     .build()?;
//!
//! for _ in 0..3 {
//!     framebuffer.fill([255, 0, 0, 255]);
//!     pipeline.on_frame_rendered(size);
//! }
//! pipeline.shutdown();
//! assert_eq!(pipeline.stats().harvested, 2);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::stats::{PipelineStats, StatsSnapshot, bump};
use super::transmit::{FrameSink, Transmitter};
use super::worker::{ConvertJob, ConvertWorker, WorkerContext};
use crate::config::config::PipelineConfig;
use crate::core::buffer_pool::BufferPool;
use crate::core::frame::Size;
use crate::core::frame_queue::FrameQueue;
use crate::error::{CaptureError, CaptureResult, classify};
use crate::readback::device::ReadbackDevice;
use crate::readback::ring::{ReadbackRing, SkipReason, TickOutcome};

/// Callbacks the rendering front-end drives, once per rendered frame and on
/// every surface size change, always from the render thread.
pub trait RenderedFrameHandler {
    /// A frame of `size` has been composited into the current color buffer.
    fn on_frame_rendered(&mut self, size: Size);

    fn on_surface_resized(&mut self, size: Size);
}

/// Double-buffered readback, conversion and transmission of rendered frames.
pub struct CapturePipeline<D: ReadbackDevice> {
    config: PipelineConfig,
    ring: ReadbackRing<D>,
    worker: ConvertWorker,
    transmitter: Transmitter,
    rgba_pool: Arc<BufferPool>,
    nv21_pool: Arc<BufferPool>,
    queue: Arc<FrameQueue>,
    stats: Arc<PipelineStats>,
    started: Instant,
    shut_down: bool,
}

impl<D: ReadbackDevice> CapturePipeline<D> {
    pub fn builder() -> CapturePipelineBuilder<D> {
        CapturePipelineBuilder::new()
    }

    fn start(config: PipelineConfig, device: D, sink: Box<dyn FrameSink>) -> CaptureResult<Self> {
        config.validate()?;

        let pool_size = config.pool_size();
        let rgba_pool = Arc::new(BufferPool::new(pool_size.rgba_len(), config.pool_capacity));
        let nv21_pool = Arc::new(BufferPool::new(pool_size.nv21_len(), config.pool_capacity));
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        let stats = Arc::new(PipelineStats::default());

        let ring = ReadbackRing::new(device, config.initial_size, config.slot_count)?;
        let worker = ConvertWorker::spawn(
            WorkerContext {
                rgba_pool: Arc::clone(&rgba_pool),
                nv21_pool: Arc::clone(&nv21_pool),
                queue: Arc::clone(&queue),
                stats: Arc::clone(&stats),
                flip_vertical: config.flip_vertical,
            },
            config.worker_backlog,
        )?;
        let transmitter = Transmitter::spawn(
            Arc::clone(&queue),
            Arc::clone(&nv21_pool),
            Arc::clone(&stats),
            sink,
            config.poll_interval,
        )?;

        info!(
            size = %config.initial_size,
            pool_bound = %pool_size,
            slots = config.slot_count,
            queue = config.queue_capacity,
            "capture pipeline started"
        );
        Ok(Self {
            config,
            ring,
            worker,
            transmitter,
            rgba_pool,
            nv21_pool,
            queue,
            stats,
            started: Instant::now(),
            shut_down: false,
        })
    }

    fn tick(&mut self, size: Size) {
        bump(&self.stats.ticks);
        if self.shut_down {
            return;
        }
        if size.is_empty() {
            debug!(%size, "ignoring empty frame");
            return;
        }
        if size != self.ring.size() {
            self.resize(size);
        }

        let rgba_pool = &self.rgba_pool;
        let stats = &self.stats;
        let mut harvested = None;
        let read_failures = self.ring.read_failures();

        let outcome = self.ring.tick(|bytes, read_size| {
            let len = read_size.rgba_len();
            let mut rgba = match rgba_pool.acquire() {
                Ok(buf) if buf.len() >= len => buf,
                Ok(small) => {
                    rgba_pool.release(small);
                    bump(&stats.rgba_pool_fallbacks);
                    vec![0u8; len]
                }
                Err(e) => {
                    bump(&stats.rgba_pool_fallbacks);
                    let e = CaptureError::from(e).with_context("rgba pool");
                    classify::report(&e, "allocating readback copy");
                    vec![0u8; len]
                }
            };
            rgba[..len].copy_from_slice(&bytes[..len]);
            harvested = Some((rgba, read_size));
        });

        if self.ring.read_failures() > read_failures {
            bump(&self.stats.read_failures);
        }
        match outcome {
            TickOutcome::Harvested(_) => bump(&self.stats.harvested),
            TickOutcome::Skipped(SkipReason::NothingPending) => bump(&self.stats.nothing_pending),
            TickOutcome::Skipped(SkipReason::Stale) => bump(&self.stats.stale_discarded),
            TickOutcome::Skipped(SkipReason::MapFailed) => bump(&self.stats.map_failures),
            TickOutcome::Skipped(SkipReason::Released) => {}
        }

        if let Some((rgba, size)) = harvested {
            let pts_ns = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.worker.submit(ConvertJob { rgba, size, pts_ns });
        }
    }

    fn resize(&mut self, size: Size) {
        if size.is_empty() || self.shut_down {
            return;
        }
        if size != self.ring.size() {
            if let Err(e) = self.ring.resize(size) {
                classify::report(&e, "failed to resize transfer slots");
                return;
            }
        }

        if size.rgba_len() > self.rgba_pool.buffer_size() {
            self.rgba_pool.resize(size.rgba_len());
            info!(%size, bytes = size.rgba_len(), "RGBA pool grown past configured bound");
        }
        if size.nv21_len() > self.nv21_pool.buffer_size() {
            self.nv21_pool.resize(size.nv21_len());
            info!(%size, bytes = size.nv21_len(), "NV21 pool grown past configured bound");
        }
        info!(%size, "surface resized");
    }

    /// Ordered teardown: transfer slots first, then the conversion worker, then
    /// the transmission thread. Safe to call more than once.
    ///
    /// Must run on the render thread while the device's context is alive.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.ring.release();
        self.worker.shutdown();
        self.transmitter.stop();

        let snapshot = self.stats.snapshot();
        info!(
            ticks = snapshot.ticks,
            converted = snapshot.converted,
            sent = snapshot.sent,
            evicted = snapshot.queue_evictions,
            "capture pipeline stopped"
        );
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    pub fn rgba_pool(&self) -> &Arc<BufferPool> {
        &self.rgba_pool
    }

    pub fn nv21_pool(&self) -> &Arc<BufferPool> {
        &self.nv21_pool
    }

    pub fn ring(&self) -> &ReadbackRing<D> {
        &self.ring
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current render size the transfer slots are allocated for.
    pub fn size(&self) -> Size {
        self.ring.size()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<D: ReadbackDevice> RenderedFrameHandler for CapturePipeline<D> {
    fn on_frame_rendered(&mut self, size: Size) {
        self.tick(size);
    }

    fn on_surface_resized(&mut self, size: Size) {
        self.resize(size);
    }
}

impl<D: ReadbackDevice> Drop for CapturePipeline<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`CapturePipeline`].
pub struct CapturePipelineBuilder<D: ReadbackDevice> {
    config: PipelineConfig,
    device: Option<D>,
    sink: Option<Box<dyn FrameSink>>,
}

impl<D: ReadbackDevice> CapturePipelineBuilder<D> {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            device: None,
            sink: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Device bound to the front-end's color buffer.
    pub fn with_device(mut self, device: D) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn with_flip_vertical(mut self, flip: bool) -> Self {
        self.config.flip_vertical = flip;
        self
    }

    /// Validates the configuration, allocates transfer slots and pools, and
    /// starts the worker and transmission threads.
    pub fn build(self) -> CaptureResult<CapturePipeline<D>> {
        let device = self.device.ok_or_else(|| {
            CaptureError::config("device", "none", "a readback device is required")
        })?;
        let sink = self
            .sink
            .ok_or_else(|| CaptureError::config("sink", "none", "a frame sink is required"))?;
        CapturePipeline::start(self.config, device, sink)
    }
}

impl<D: ReadbackDevice> Default for CapturePipelineBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readback::software::{SoftwareDevice, SoftwareFramebuffer};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    type Sent = Arc<Mutex<Vec<(usize, u32, u32, u64)>>>;

    fn pipeline(size: Size) -> (CapturePipeline<SoftwareDevice>, SoftwareDevice, Sent) {
        let device = SoftwareDevice::new(SoftwareFramebuffer::new(size));
        let handle = device.clone();
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let sent = Arc::clone(&sent);
            move |nv21: &[u8], w: u32, h: u32, pts: u64| -> anyhow::Result<()> {
                sent.lock().unwrap().push((nv21.len(), w, h, pts));
                Ok(())
            }
        };
        let pipeline = CapturePipeline::builder()
            .with_config(PipelineConfig {
                max_size: size,
                initial_size: size,
                poll_interval: Duration::from_millis(1),
                ..PipelineConfig::default()
            })
            .with_device(device)
            .with_sink(sink)
            .build()
            .unwrap();
        (pipeline, handle, sent)
    }

    #[test]
    fn test_builder_requires_device_and_sink() {
        let missing_device = CapturePipeline::<SoftwareDevice>::builder()
            .with_sink(|_: &[u8], _: u32, _: u32, _: u64| -> anyhow::Result<()> { Ok(()) })
            .build();
        assert!(missing_device.is_err());

        let fb = SoftwareFramebuffer::new(Size::new(2, 2));
        let missing_sink = CapturePipeline::builder()
            .with_device(SoftwareDevice::new(fb))
            .build();
        assert!(missing_sink.is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let fb = SoftwareFramebuffer::new(Size::new(2, 2));
        let result = CapturePipeline::builder()
            .with_config(PipelineConfig {
                queue_capacity: 0,
                ..PipelineConfig::default()
            })
            .with_device(SoftwareDevice::new(fb))
            .with_sink(|_: &[u8], _: u32, _: u32, _: u64| -> anyhow::Result<()> { Ok(()) })
            .build();
        assert_eq!(result.err().map(|e| e.category()), Some("config"));
    }

    #[test]
    fn test_first_tick_has_nothing_pending() {
        let size = Size::new(4, 4);
        let (mut pipeline, _, _) = pipeline(size);
        pipeline.on_frame_rendered(size);

        let snap = pipeline.stats();
        assert_eq!(snap.ticks, 1);
        assert_eq!(snap.nothing_pending, 1);
        assert_eq!(snap.harvested, 0);
    }

    #[test]
    fn test_frames_reach_sink_with_increasing_pts() {
        let size = Size::new(4, 4);
        let (mut pipeline, _, sent) = pipeline(size);
        for _ in 0..4 {
            pipeline.on_frame_rendered(size);
            thread::sleep(Duration::from_millis(5));
        }
        pipeline.shutdown();

        let snap = pipeline.stats();
        assert_eq!(snap.harvested, 3);
        assert_eq!(snap.converted + snap.worker_drops, 3);

        let sent = sent.lock().unwrap();
        assert!(sent.iter().all(|&(len, w, h, _)| (len, w, h) == (24, 4, 4)));
        assert!(sent.windows(2).all(|pair| pair[0].3 < pair[1].3));
    }

    #[test]
    fn test_map_failure_is_counted_and_skipped() {
        let size = Size::new(2, 2);
        let (mut pipeline, device, _) = pipeline(size);
        pipeline.on_frame_rendered(size);
        device.fail_next_maps(1);
        pipeline.on_frame_rendered(size);
        pipeline.on_frame_rendered(size);

        let snap = pipeline.stats();
        assert_eq!(snap.map_failures, 1);
        assert_eq!(snap.harvested, 1);
    }

    #[test]
    fn test_size_change_triggers_resize() {
        let size = Size::new(8, 8);
        let (mut pipeline, device, _) = pipeline(size);
        pipeline.on_frame_rendered(size);

        let small = Size::new(4, 4);
        device.framebuffer().resize(small);
        pipeline.on_frame_rendered(small);
        pipeline.on_frame_rendered(small);

        assert_eq!(pipeline.size(), small);
        let snap = pipeline.stats();
        assert_eq!(snap.stale_discarded, 1);
        assert_eq!(snap.harvested, 1);
    }

    #[test]
    fn test_growing_past_bound_resizes_pools() {
        let size = Size::new(4, 4);
        let (mut pipeline, device, _) = pipeline(size);
        let big = Size::new(16, 16);
        device.framebuffer().resize(big);
        pipeline.on_surface_resized(big);

        assert_eq!(pipeline.size(), big);
        assert_eq!(pipeline.rgba_pool().buffer_size(), big.rgba_len());
        assert_eq!(pipeline.nv21_pool().buffer_size(), big.nv21_len());
    }

    #[test]
    fn test_shutdown_is_idempotent_and_releases_slots() {
        let size = Size::new(2, 2);
        let (mut pipeline, device, _) = pipeline(size);
        pipeline.on_frame_rendered(size);
        pipeline.shutdown();
        pipeline.shutdown();

        assert!(pipeline.is_shut_down());
        assert!(pipeline.ring().is_released());
        assert_eq!(device.live_buffers(), 0);

        // Ticks after shutdown are ignored.
        pipeline.on_frame_rendered(size);
        assert_eq!(pipeline.stats().harvested, 0);
    }

    #[test]
    fn test_resize_grows_nv21_pool_on_its_own() {
        let bound = Size::new(2, 2);
        let (mut pipeline, device, _) = pipeline(bound);
        let narrow = Size::new(1, 3);
        device.framebuffer().resize(narrow);
        pipeline.on_surface_resized(narrow);

        assert_eq!(pipeline.rgba_pool().buffer_size(), bound.rgba_len());
        assert_eq!(pipeline.nv21_pool().buffer_size(), narrow.nv21_len());
    }
}

//! Persistent conversion worker.
//!
//! One thread, fed through a bounded channel, turns RGBA readbacks into NV21
//! frames and pushes them onto the [`FrameQueue`]. The render thread submits
//! with `try_send`, so a saturated worker costs a dropped frame, never a
//! stalled render tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{debug, warn};

use super::stats::{PipelineStats, bump};
use crate::core::buffer_pool::BufferPool;
use crate::core::frame::{Nv21Frame, Size};
use crate::core::frame_queue::FrameQueue;
use crate::error::{CaptureError, CaptureResult, classify};

/// One RGBA readback waiting for conversion.
#[derive(Debug)]
pub struct ConvertJob {
    /// Pixels in the first `size.rgba_len()` bytes; may be longer if pooled
    pub rgba: Vec<u8>,
    pub size: Size,
    pub pts_ns: u64,
}

/// Everything the worker touches besides its job.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub rgba_pool: Arc<BufferPool>,
    pub nv21_pool: Arc<BufferPool>,
    pub queue: Arc<FrameQueue>,
    pub stats: Arc<PipelineStats>,
    pub flip_vertical: bool,
}

impl WorkerContext {
    /// Converts one job and queues the result. Both buffers always end up back
    /// in their pool, in the queue, or dropped.
    pub fn process(&self, job: ConvertJob) {
        let ConvertJob {
            mut rgba,
            size,
            pts_ns,
        } = job;

        if self.flip_vertical {
            cap_yuv::flip_rows(&mut rgba, size.w as usize * 4, size.h as usize);
        }

        let nv21_len = size.nv21_len();
        let mut nv21 = match self.nv21_pool.acquire() {
            Ok(buf) if buf.len() >= nv21_len => buf,
            Ok(small) => {
                // Pool bound smaller than this frame's chroma grid.
                self.nv21_pool.release(small);
                bump(&self.stats.nv21_pool_fallbacks);
                vec![0u8; nv21_len]
            }
            Err(e) => {
                bump(&self.stats.nv21_pool_fallbacks);
                let e = CaptureError::from(e).with_context("nv21 pool");
                classify::report(&e, "allocating output buffer");
                vec![0u8; nv21_len]
            }
        };

        let converted = cap_yuv::rgba_to_nv21(&rgba, size.w, size.h, &mut nv21);
        self.rgba_pool.release(rgba);

        if let Err(e) = converted {
            bump(&self.stats.convert_failures);
            let e = CaptureError::from(e).with_context(size.to_string());
            classify::report(&e, "conversion failed, frame dropped");
            self.nv21_pool.release(nv21);
            return;
        }
        bump(&self.stats.converted);

        let frame = Nv21Frame {
            data: nv21,
            width: size.w,
            height: size.h,
            pts_ns,
        };
        if let Some(evicted) = self.queue.push(frame) {
            bump(&self.stats.queue_evictions);
            self.nv21_pool.release(evicted.into_data());
        }
    }
}

/// Handle to the conversion thread.
#[derive(Debug)]
pub struct ConvertWorker {
    tx: Option<Sender<ConvertJob>>,
    handle: Option<JoinHandle<()>>,
    ctx: WorkerContext,
}

impl ConvertWorker {
    /// Starts the worker with room for `backlog` waiting jobs.
    pub fn spawn(ctx: WorkerContext, backlog: usize) -> CaptureResult<Self> {
        let (tx, rx) = bounded::<ConvertJob>(backlog.max(1));
        let thread_ctx = ctx.clone();

        let handle = thread::Builder::new()
            .name("dualcam-convert".to_string())
            .spawn(move || {
                debug!("conversion worker started");
                for job in rx.iter() {
                    thread_ctx.process(job);
                }
                debug!("conversion worker stopped");
            })
            .map_err(|e| CaptureError::worker("dualcam-convert", e.to_string()))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            ctx,
        })
    }

    /// Hands a job to the worker without blocking.
    ///
    /// Returns `false` if the job was dropped because the worker is saturated
    /// or gone; its buffer goes back to the RGBA pool.
    pub fn submit(&self, job: ConvertJob) -> bool {
        let Some(tx) = &self.tx else {
            self.drop_job(job);
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                debug!(pts_ns = job.pts_ns, "conversion worker saturated, frame dropped");
                self.drop_job(job);
                false
            }
            Err(TrySendError::Disconnected(job)) => {
                let e = CaptureError::worker("dualcam-convert", "channel disconnected");
                classify::report(&e, "frame dropped");
                self.drop_job(job);
                false
            }
        }
    }

    fn drop_job(&self, job: ConvertJob) {
        bump(&self.ctx.stats.worker_drops);
        self.ctx.rgba_pool.release(job.rgba);
    }

    /// Closes the channel and waits for queued jobs to finish. Idempotent.
    pub fn shutdown(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("conversion worker panicked");
            }
        }
    }
}

impl Drop for ConvertWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(size: Size, queue_capacity: usize) -> WorkerContext {
        WorkerContext {
            rgba_pool: Arc::new(BufferPool::new(size.rgba_len(), 2)),
            nv21_pool: Arc::new(BufferPool::new(size.nv21_len(), 2)),
            queue: Arc::new(FrameQueue::new(queue_capacity)),
            stats: Arc::new(PipelineStats::default()),
            flip_vertical: false,
        }
    }

    fn solid(size: Size, rgba: [u8; 4]) -> Vec<u8> {
        rgba.iter().copied().cycle().take(size.rgba_len()).collect()
    }

    #[test]
    fn test_process_queues_converted_frame() {
        let size = Size::new(4, 4);
        let ctx = context(size, 5);
        let rgba = ctx.rgba_pool.acquire().unwrap();
        let mut rgba = rgba;
        rgba.copy_from_slice(&solid(size, [255, 0, 0, 255]));

        ctx.process(ConvertJob {
            rgba,
            size,
            pts_ns: 42,
        });

        let frame = ctx.queue.pop().unwrap();
        assert_eq!(frame.pts_ns, 42);
        assert_eq!(frame.size(), size);
        assert!(frame.bytes()[..16].iter().all(|&y| y == 82));
        assert_eq!(&frame.bytes()[16..18], &[240, 90]);
        assert_eq!(ctx.rgba_pool.stats(), (2, 2));
        assert_eq!(ctx.stats.snapshot().converted, 1);
    }

    #[test]
    fn test_flip_vertical_reverses_rows() {
        let size = Size::new(2, 2);
        let mut ctx = context(size, 5);
        ctx.flip_vertical = true;
        // Top row white, bottom row black.
        let mut rgba = solid(size, [0, 0, 0, 255]);
        rgba[..8].copy_from_slice(&[255, 255, 255, 255, 255, 255, 255, 255]);

        ctx.process(ConvertJob {
            rgba,
            size,
            pts_ns: 0,
        });

        let frame = ctx.queue.pop().unwrap();
        assert_eq!(&frame.bytes()[..4], &[16, 16, 235, 235]);
    }

    #[test]
    fn test_eviction_recycles_buffer() {
        let size = Size::new(2, 2);
        let ctx = context(size, 1);
        for pts in 0..3 {
            ctx.process(ConvertJob {
                rgba: solid(size, [0, 0, 0, 255]),
                size,
                pts_ns: pts,
            });
        }
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(ctx.stats.snapshot().queue_evictions, 2);
        assert_eq!(ctx.nv21_pool.stats().0, 1);
    }

    #[test]
    fn test_short_input_counts_failure() {
        let size = Size::new(4, 4);
        let ctx = context(size, 5);
        ctx.process(ConvertJob {
            rgba: vec![0u8; 8],
            size,
            pts_ns: 0,
        });
        assert!(ctx.queue.is_empty());
        assert_eq!(ctx.stats.snapshot().convert_failures, 1);
        assert_eq!(ctx.nv21_pool.stats(), (2, 2));
    }

    #[test]
    fn test_worker_thread_drains_on_shutdown() {
        let size = Size::new(2, 2);
        let ctx = context(size, 5);
        let mut worker = ConvertWorker::spawn(ctx.clone(), 4).unwrap();
        for pts in 0..3 {
            worker.submit(ConvertJob {
                rgba: solid(size, [0, 255, 0, 255]),
                size,
                pts_ns: pts,
            });
        }
        worker.shutdown();
        worker.shutdown();

        let snap = ctx.stats.snapshot();
        assert_eq!(snap.converted + snap.worker_drops, 3);
        assert!(!worker.submit(ConvertJob {
            rgba: vec![0u8; size.rgba_len()],
            size,
            pts_ns: 9,
        }));
    }

    #[test]
    fn test_narrow_frame_outgrowing_nv21_pool_is_counted() {
        // 2x2 bound: 16 RGBA bytes, 6 NV21 bytes. 1x3 fits the former, not the latter.
        let ctx = context(Size::new(2, 2), 5);
        let narrow = Size::new(1, 3);
        assert!(narrow.rgba_len() <= ctx.rgba_pool.buffer_size());
        assert!(narrow.nv21_len() > ctx.nv21_pool.buffer_size());

        ctx.process(ConvertJob {
            rgba: solid(narrow, [255, 255, 255, 255]),
            size: narrow,
            pts_ns: 0,
        });

        let frame = ctx.queue.pop().unwrap();
        assert_eq!(frame.bytes().len(), 7);
        assert_eq!(ctx.stats.snapshot().nv21_pool_fallbacks, 1);
        assert_eq!(ctx.nv21_pool.stats(), (2, 2));
    }
}

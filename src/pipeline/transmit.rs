//! # Transmission Thread
//!
//! Drains converted frames from the [`FrameQueue`] into a [`FrameSink`] on a
//! dedicated thread.
//!
//! ```text
//! ┌─────────────────┐  push  ┌─────────────────┐  pop  ┌─────────────────┐
//! │ Conversion      │───────▶│   Frame Queue   │──────▶│  Transmitter    │──▶ sink
//! │ worker          │        │  (drop oldest)  │       │  thread         │
//! └─────────────────┘        └─────────────────┘       └────────┬────────┘
//!                                     ▲ recycle buffer          │
//!                                     └──── NV21 pool ◀─────────┘
//! ```
//!
//! The thread polls: when the queue is empty it sleeps for the poll interval
//! and tries again. It stops when its stop flag is set, and hands any frames
//! still queued back to the pool without sending them.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::stats::{PipelineStats, bump};
use crate::core::buffer_pool::BufferPool;
use crate::core::frame_queue::FrameQueue;
use crate::error::{CaptureError, CaptureResult, classify};

/// Receives converted frames on the transmission thread.
///
/// `nv21` is only valid for the duration of the call; its buffer is recycled
/// afterwards. Errors are logged and counted by the caller, never retried.
pub trait FrameSink: Send {
    fn send_frame(&mut self, nv21: &[u8], width: u32, height: u32, pts_ns: u64)
    -> anyhow::Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(&[u8], u32, u32, u64) -> anyhow::Result<()> + Send,
{
    fn send_frame(
        &mut self,
        nv21: &[u8],
        width: u32,
        height: u32,
        pts_ns: u64,
    ) -> anyhow::Result<()> {
        self(nv21, width, height, pts_ns)
    }
}

/// Sink writing raw NV21 frames back to back, e.g. into a `.nv21` file.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    writer: W,
    frames: u64,
    bytes: u64,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames: 0,
            bytes: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FrameSink for WriterSink<W> {
    fn send_frame(&mut self, nv21: &[u8], _: u32, _: u32, _: u64) -> anyhow::Result<()> {
        self.writer.write_all(nv21)?;
        self.frames += 1;
        self.bytes += nv21.len() as u64;
        Ok(())
    }
}

/// Handle to the running transmission thread.
#[derive(Debug)]
pub struct Transmitter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Transmitter {
    /// Starts the transmission thread.
    pub fn spawn(
        queue: Arc<FrameQueue>,
        pool: Arc<BufferPool>,
        stats: Arc<PipelineStats>,
        mut sink: Box<dyn FrameSink>,
        poll_interval: Duration,
    ) -> CaptureResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("dualcam-transmit".to_string())
            .spawn(move || {
                debug!("transmission thread started");
                while !stop_flag.load(Ordering::Acquire) {
                    let Some(frame) = queue.pop() else {
                        thread::sleep(poll_interval);
                        continue;
                    };

                    match sink.send_frame(frame.bytes(), frame.width, frame.height, frame.pts_ns) {
                        Ok(()) => bump(&stats.sent),
                        Err(e) => {
                            bump(&stats.sink_errors);
                            let e = CaptureError::sink(format!("{:#}", e))
                                .with_context(format!("pts {}", frame.pts_ns));
                            classify::report(&e, "frame not transmitted");
                        }
                    }
                    pool.release(frame.into_data());
                }

                let leftover = queue.drain();
                let dropped = leftover.len();
                for frame in leftover {
                    pool.release(frame.into_data());
                }
                debug!(dropped, "transmission thread stopped");
            })
            .map_err(|e| CaptureError::worker("dualcam-transmit", e.to_string()))?;

        info!(?poll_interval, "transmitter started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the thread to stop and waits for it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("transmission thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

//! # Frame Queue Module
//!
//! Bounded FIFO of converted frames between the conversion worker (producer)
//! and the transmission thread (consumer).
//!
//! ## Backpressure
//!
//! The queue never blocks and never rejects. When a push finds the queue full,
//! the oldest frame is evicted first and handed back to the caller so its
//! buffer can go back to the pool:
//!
//! ```text
//!  push(6) at capacity 5
//!
//!  before: [1][2][3][4][5]
//!  evict:   1 ──▶ returned to the caller
//!  after:  [2][3][4][5][6]
//! ```
//!
//! Stale frames are worthless for live transmission, so freshness wins over
//! completeness.
//!
//! ## Example
//!
//! ```rust
//! use dualcam_capture::core::frame::Nv21Frame;
//! use dualcam_capture::core::frame_queue::FrameQueue;
//!
//! let queue = FrameQueue::new(1);
//! let frame = |pts_ns| Nv21Frame { data: vec![0; 6], width: 2, height: 2, pts_ns };
//!
//! assert!(queue.push(frame(1)).is_none());
//! let evicted = queue.push(frame(2)).unwrap();
//! assert_eq!(evicted.pts_ns, 1);
//! assert_eq!(queue.pop().unwrap().pts_ns, 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::frame::Nv21Frame;

/// Default queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Drop-oldest bounded queue of [`Nv21Frame`]s.
///
/// Intended for one producer and one consumer, but every method is safe to
/// call from any thread.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<Nv21Frame>>,
    capacity: usize,
    pushed: AtomicU64,
    evicted: AtomicU64,
}

impl FrameQueue {
    /// Creates an empty queue. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            pushed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Nv21Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `frame`, evicting and returning the oldest frame if the queue
    /// was full.
    pub fn push(&self, frame: Nv21Frame) -> Option<Nv21Frame> {
        let evicted = {
            let mut frames = self.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };

        self.pushed.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = &evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            trace!(pts_ns = old.pts_ns, "frame queue full, evicted oldest frame");
        }
        evicted
    }

    /// Removes and returns the oldest frame, if any.
    pub fn pop(&self) -> Option<Nv21Frame> {
        self.lock().pop_front()
    }

    /// Removes every queued frame, oldest first.
    pub fn drain(&self) -> Vec<Nv21Frame> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of frames ever pushed.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total number of frames dropped to make room.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

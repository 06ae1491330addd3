//! # Buffer Pool Module
//!
//! Fixed-capacity pool of equally sized byte buffers, used for the RGBA readback
//! copies and the NV21 output frames so the per-frame path does not allocate.
//!
//! ## Overview
//!
//! - The pool is filled with `capacity` zeroed buffers of `buffer_size` bytes up
//!   front. The size comes from a resolution bound, not the live render size.
//! - [`BufferPool::acquire`] hands out any free buffer, or [`PoolExhausted`] when
//!   none is left. Exhaustion is not an error: the caller allocates a buffer of
//!   exactly the size it needs and carries on.
//! - [`BufferPool::release`] only takes back buffers of the pool's current size.
//!   Anything else (a fallback allocation, a buffer from before a resize) is
//!   dropped, so the pool never fills up with wrong-sized buffers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐ acquire ┌─────────────────┐ release ┌─────────────────┐
//! │  Render thread  │◀────────│   Buffer Pool   │◀────────│  Worker thread  │
//! │  (readback)     │         │  free list (C)  │         │  (after convert)│
//! └─────────────────┘         └─────────────────┘         └─────────────────┘
//! ```
//!
//! Access goes through one short mutex-guarded critical section per call; the
//! lock is never held while copying or converting.
//!
//! ## Example
//!
//! ```rust
//! use dualcam_capture::core::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(1920 * 1080 * 4, 3);
//! let buffer = pool
//!     .acquire()
//!     .unwrap_or_else(|_| vec![0u8; 1280 * 720 * 4]);
//! // ... fill and use the buffer ...
//! pool.release(buffer);
//!
//! let (available, capacity) = pool.stats();
//! assert_eq!((available, capacity), (3, 3));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Returned by [`BufferPool::acquire`] when every pooled buffer is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted {
    pub capacity: usize,
}

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} pooled buffers are in use", self.capacity)
    }
}

impl std::error::Error for PoolExhausted {}

impl From<PoolExhausted> for crate::error::CaptureError {
    fn from(e: PoolExhausted) -> Self {
        crate::error::CaptureError::pool_exhausted(e.capacity)
    }
}

#[derive(Debug)]
struct PoolInner {
    /// Free buffers, used as a stack
    buffers: Vec<Vec<u8>>,
    /// Size of every buffer the pool accepts
    buffer_size: usize,
}

/// Thread-safe pool of reusable fixed-size buffers.
///
/// # Examples
///
/// ```rust
/// # use dualcam_capture::core::buffer_pool::BufferPool;
/// let pool = BufferPool::new(1024, 2);
/// let a = pool.acquire().unwrap();
/// let b = pool.acquire().unwrap();
/// assert!(pool.acquire().is_err());
///
/// pool.release(a);
/// pool.release(vec![0u8; 16]); // wrong size, dropped
/// assert_eq!(pool.stats(), (1, 2));
/// # drop(b);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    /// Maximum number of buffers the pool holds
    capacity: usize,
    exhausted: AtomicU64,
    discarded: AtomicU64,
}

impl BufferPool {
    /// Creates a pool pre-filled with `capacity` zeroed buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                buffers: Self::fill(buffer_size, capacity),
                buffer_size,
            }),
            capacity,
            exhausted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn fill(buffer_size: usize, capacity: usize) -> Vec<Vec<u8>> {
        (0..capacity).map(|_| vec![0u8; buffer_size]).collect()
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        // A panic while holding the lock cannot leave the free list inconsistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a free buffer out of the pool.
    ///
    /// The buffer's contents are whatever its previous user left there.
    pub fn acquire(&self) -> Result<Vec<u8>, PoolExhausted> {
        let popped = self.lock().buffers.pop();
        popped.ok_or_else(|| {
            let misses = self.exhausted.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(capacity = self.capacity, misses, "buffer pool exhausted");
            PoolExhausted {
                capacity: self.capacity,
            }
        })
    }

    /// Returns a buffer to the pool.
    ///
    /// Buffers whose length differs from the pool's buffer size, or that would
    /// exceed the capacity, are dropped.
    pub fn release(&self, buffer: Vec<u8>) {
        let mut inner = self.lock();
        if buffer.len() == inner.buffer_size && inner.buffers.len() < self.capacity {
            inner.buffers.push(buffer);
            return;
        }
        drop(inner);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `(available_buffers, capacity)`.
    pub fn stats(&self) -> (usize, usize) {
        (self.lock().buffers.len(), self.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.lock().buffer_size
    }

    /// Number of `acquire` calls that found the pool empty.
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Number of released buffers that were dropped instead of pooled.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Switches the pool to a new buffer size.
    ///
    /// The free list is drained and refilled with `capacity` buffers of
    /// `new_size` bytes. Buffers of the old size still in flight are dropped
    /// when released.
    pub fn resize(&self, new_size: usize) {
        let fresh = Self::fill(new_size, self.capacity);
        let mut inner = self.lock();
        inner.buffer_size = new_size;
        inner.buffers = fresh;
    }
}

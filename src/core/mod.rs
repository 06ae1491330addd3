//! # Core Infrastructure Module
//!
//! Shared building blocks of the capture pipeline: frame types, the reusable
//! buffer pool and the drop-oldest frame queue between the conversion worker
//! and the transmission thread.

pub mod buffer_pool;
pub mod frame;
pub mod frame_queue;

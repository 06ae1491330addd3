//! # Pipeline Module
//!
//! The threaded capture-and-convert path: per-tick orchestration on the render
//! thread, the persistent conversion worker, the transmission thread, and the
//! counters all three share.

pub mod capture;
pub mod stats;
pub mod transmit;
pub mod worker;

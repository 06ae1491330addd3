//! # Readback Module
//!
//! Asynchronous transfer of rendered pixels from the GPU color buffer to CPU
//! memory: the [`ReadbackDevice`](device::ReadbackDevice) capability, the
//! [`ReadbackRing`](ring::ReadbackRing) that pipelines it, and its backends.

pub mod device;
#[cfg(feature = "gl")]
pub mod gl;
pub mod ring;
pub mod software;

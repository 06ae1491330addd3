//! The GPU capability the readback ring drives.

use crate::core::frame::Size;
use crate::error::CaptureResult;

/// Asynchronous pixel readback from the current color buffer into
/// device-owned transfer buffers.
///
/// A read is issued with [`request_read`](ReadbackDevice::request_read) and
/// must not block. Its bytes become visible through
/// [`map`](ReadbackDevice::map) once the device has finished the transfer;
/// mapping is the only call allowed to block on the driver, and returning
/// `None` means "no data this time". Every successful map is paired with an
/// [`unmap`](ReadbackDevice::unmap) before the buffer is read into again.
///
/// Implementations that wrap a graphics context must be called on the thread
/// that owns that context, including [`free`](ReadbackDevice::free).
pub trait ReadbackDevice {
    type Buffer;

    /// Creates a transfer buffer able to hold `bytes` bytes.
    fn allocate(&mut self, bytes: usize) -> CaptureResult<Self::Buffer>;

    /// Starts reading a `size` region of the current color buffer into `buffer`.
    fn request_read(&mut self, buffer: &mut Self::Buffer, size: Size) -> CaptureResult<()>;

    /// Maps the first `len` bytes of a completed read for CPU access.
    fn map<'a>(&'a mut self, buffer: &'a mut Self::Buffer, len: usize) -> Option<&'a [u8]>;

    fn unmap(&mut self, buffer: &mut Self::Buffer);

    fn free(&mut self, buffer: Self::Buffer);
}

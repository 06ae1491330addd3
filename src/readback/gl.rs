//! Pixel-pack-buffer readback over an OpenGL (ES) 3 context.
//!
//! Each transfer slot is a `PIXEL_PACK_BUFFER` allocated with `STREAM_READ`.
//! A read binds the slot and calls `glReadPixels` with offset 0, so the copy
//! runs on the GPU timeline, then inserts a fence. Mapping waits on that fence
//! for at most [`DEFAULT_MAP_TIMEOUT`] (see [`GlDevice::with_map_timeout`]); an
//! unsignaled fence or a null mapping is reported as no data and the frame is
//! skipped.
//!
//! With two slots a driver that lags more than one frame behind misses every
//! map. Use `slot_count >= 3` on such drivers, or raise the map timeout.
//!
//! Every call must happen on the thread where the context is current.

use std::sync::Arc;
use std::time::Duration;

use glow::HasContext as _;

use super::device::ReadbackDevice;
use crate::core::frame::Size;
use crate::error::{CaptureError, CaptureResult};

type GlBufferId = <glow::Context as glow::HasContext>::Buffer;
type GlFence = <glow::Context as glow::HasContext>::Fence;

/// How long `map` waits for a read to land before skipping the frame.
pub const DEFAULT_MAP_TIMEOUT: Duration = Duration::from_millis(2);

/// One pixel pack buffer and the fence of the read in flight.
#[derive(Debug)]
pub struct GlBuffer {
    id: GlBufferId,
    capacity: usize,
    fence: Option<GlFence>,
    mapped: bool,
}

impl GlBuffer {
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// [`ReadbackDevice`] reading from the framebuffer currently bound for reading.
pub struct GlDevice {
    gl: Arc<glow::Context>,
    map_timeout_ns: i32,
}

impl GlDevice {
    pub fn new(gl: Arc<glow::Context>) -> Self {
        Self {
            gl,
            map_timeout_ns: timeout_ns(DEFAULT_MAP_TIMEOUT),
        }
    }

    /// Upper bound on the render-thread stall per map. Zero turns the fence
    /// check into a pure poll.
    pub fn with_map_timeout(mut self, timeout: Duration) -> Self {
        self.map_timeout_ns = timeout_ns(timeout);
        self
    }

    fn delete_fence(&self, buffer: &mut GlBuffer) {
        if let Some(fence) = buffer.fence.take() {
            unsafe {
                self.gl.delete_sync(fence);
            }
        }
    }

    fn fence_signaled(&self, fence: GlFence) -> bool {
        let flags = if self.map_timeout_ns > 0 {
            glow::SYNC_FLUSH_COMMANDS_BIT
        } else {
            0
        };
        let status = unsafe { self.gl.client_wait_sync(fence, flags, self.map_timeout_ns) };
        status == glow::ALREADY_SIGNALED || status == glow::CONDITION_SATISFIED
    }
}

impl ReadbackDevice for GlDevice {
    type Buffer = GlBuffer;

    fn allocate(&mut self, bytes: usize) -> CaptureResult<GlBuffer> {
        let size = i32::try_from(bytes).map_err(|_| {
            CaptureError::device("allocate pixel pack buffer", format!("{} bytes is too large", bytes))
        })?;
        unsafe {
            let id = self
                .gl
                .create_buffer()
                .map_err(|e| CaptureError::device("create pixel pack buffer", e))?;
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(id));
            self.gl
                .buffer_data_size(glow::PIXEL_PACK_BUFFER, size, glow::STREAM_READ);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            Ok(GlBuffer {
                id,
                capacity: bytes,
                fence: None,
                mapped: false,
            })
        }
    }

    fn request_read(&mut self, buffer: &mut GlBuffer, size: Size) -> CaptureResult<()> {
        if buffer.mapped {
            return Err(CaptureError::device("read pixels", "buffer is still mapped"));
        }
        if size.rgba_len() > buffer.capacity {
            return Err(CaptureError::device(
                "read pixels",
                format!("{} does not fit in {} bytes", size, buffer.capacity),
            ));
        }
        self.delete_fence(buffer);

        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer.id));
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                0,
                0,
                size.w as i32,
                size.h as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::BufferOffset(0),
            );
            let fence = self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0);
            self.gl.flush();
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);

            let error = self.gl.get_error();
            if error != glow::NO_ERROR {
                if let Ok(fence) = fence {
                    self.gl.delete_sync(fence);
                }
                return Err(CaptureError::device(
                    "read pixels",
                    format!("GL error 0x{:04x}", error),
                ));
            }
            buffer.fence = Some(fence.map_err(|e| CaptureError::device("fence sync", e))?);
        }
        Ok(())
    }

    fn map<'a>(&'a mut self, buffer: &'a mut GlBuffer, len: usize) -> Option<&'a [u8]> {
        let fence = buffer.fence?;
        if len > buffer.capacity || !self.fence_signaled(fence) {
            return None;
        }
        self.delete_fence(buffer);

        let ptr = unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer.id));
            self.gl
                .map_buffer_range(glow::PIXEL_PACK_BUFFER, 0, len as i32, glow::MAP_READ_BIT)
        };
        if ptr.is_null() {
            unsafe {
                self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            }
            return None;
        }
        buffer.mapped = true;
        // SAFETY: the driver mapped `len` readable bytes; the mapping stays valid
        // until `unmap`, which needs `&mut` access to the same buffer.
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    fn unmap(&mut self, buffer: &mut GlBuffer) {
        if !buffer.mapped {
            return;
        }
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer.id));
            self.gl.unmap_buffer(glow::PIXEL_PACK_BUFFER);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        buffer.mapped = false;
    }

    fn free(&mut self, mut buffer: GlBuffer) {
        self.unmap(&mut buffer);
        self.delete_fence(&mut buffer);
        unsafe {
            self.gl.delete_buffer(buffer.id);
        }
    }
}

/// `glClientWaitSync` timeout in nanoseconds, saturated to what the binding takes.
fn timeout_ns(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_nanos()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map_timeout_is_bounded() {
        assert_eq!(timeout_ns(DEFAULT_MAP_TIMEOUT), 2_000_000);
        assert!(DEFAULT_MAP_TIMEOUT < Duration::from_millis(1000 / 60));
    }

    #[test]
    fn test_timeout_saturates() {
        assert_eq!(timeout_ns(Duration::ZERO), 0);
        assert_eq!(timeout_ns(Duration::from_secs(10)), i32::MAX);
    }
}

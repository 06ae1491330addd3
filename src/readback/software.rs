//! CPU readback device.
//!
//! Stands in for a GPU when there is no graphics context: the render front-end
//! draws RGBA pixels into a [`SoftwareFramebuffer`], and a [`SoftwareDevice`]
//! copies them into anonymous memory maps when a read is requested. A read
//! becomes mappable `latency_ticks + 1` read requests later, which matches a
//! driver that finishes a transfer by the next frame when `latency_ticks` is 0.
//!
//! Failures can be injected with [`SoftwareDevice::fail_next_maps`] and
//! [`SoftwareDevice::fail_next_reads`]. The device is a cheap handle: clones
//! share the framebuffer, clock and failure counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use memmap2::{MmapMut, MmapOptions};

use super::device::ReadbackDevice;
use crate::core::frame::Size;
use crate::error::{CaptureError, CaptureResult};

#[derive(Debug)]
struct Framebuffer {
    size: Size,
    pixels: Vec<u8>,
}

/// Shared RGBA framebuffer, the software "current color buffer".
#[derive(Debug, Clone)]
pub struct SoftwareFramebuffer {
    inner: Arc<Mutex<Framebuffer>>,
}

impl SoftwareFramebuffer {
    pub fn new(size: Size) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Framebuffer {
                size,
                pixels: vec![0u8; size.rgba_len()],
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Framebuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> Size {
        self.lock().size
    }

    /// Reallocates the framebuffer, cleared to zero.
    pub fn resize(&self, size: Size) {
        let mut fb = self.lock();
        fb.size = size;
        fb.pixels.clear();
        fb.pixels.resize(size.rgba_len(), 0);
    }

    /// Renders into the framebuffer.
    pub fn draw<R>(&self, render: impl FnOnce(&mut [u8], Size) -> R) -> R {
        let mut fb = self.lock();
        let size = fb.size;
        render(&mut fb.pixels, size)
    }

    /// Fills every pixel with one RGBA value.
    pub fn fill(&self, rgba: [u8; 4]) {
        self.draw(|pixels, _| {
            for px in pixels.chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        });
    }

    /// Copies a whole RGBA frame in. Returns `false` if `rgba` has the wrong length.
    pub fn write(&self, rgba: &[u8]) -> bool {
        let mut fb = self.lock();
        if rgba.len() != fb.pixels.len() {
            return false;
        }
        fb.pixels.copy_from_slice(rgba);
        true
    }
}

#[derive(Debug, Default)]
struct Controls {
    /// Incremented by every read request
    clock: AtomicU64,
    fail_maps: AtomicU32,
    fail_reads: AtomicU32,
    reads: AtomicU64,
    maps: AtomicU64,
    live_buffers: AtomicU64,
    mapped_buffers: AtomicU64,
}

impl Controls {
    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Transfer buffer of a [`SoftwareDevice`].
#[derive(Debug)]
pub struct SoftwareBuffer {
    map: MmapMut,
    /// Clock value from which the pending read may be mapped
    ready_at: Option<u64>,
    mapped: bool,
}

impl SoftwareBuffer {
    pub fn capacity(&self) -> usize {
        self.map.len()
    }
}

/// [`ReadbackDevice`] over a [`SoftwareFramebuffer`].
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    framebuffer: SoftwareFramebuffer,
    latency_ticks: u64,
    controls: Arc<Controls>,
}

impl SoftwareDevice {
    pub fn new(framebuffer: SoftwareFramebuffer) -> Self {
        Self {
            framebuffer,
            latency_ticks: 0,
            controls: Arc::new(Controls::default()),
        }
    }

    /// Extra read requests a transfer needs before it can be mapped.
    pub fn with_latency_ticks(mut self, latency_ticks: u64) -> Self {
        self.latency_ticks = latency_ticks;
        self
    }

    pub fn framebuffer(&self) -> &SoftwareFramebuffer {
        &self.framebuffer
    }

    /// Makes the next `n` map attempts return no data.
    pub fn fail_next_maps(&self, n: u32) {
        self.controls.fail_maps.store(n, Ordering::Release);
    }

    /// Makes the next `n` read requests fail.
    pub fn fail_next_reads(&self, n: u32) {
        self.controls.fail_reads.store(n, Ordering::Release);
    }

    /// Read requests accepted so far.
    pub fn reads(&self) -> u64 {
        self.controls.reads.load(Ordering::Relaxed)
    }

    /// Successful maps so far.
    pub fn maps(&self) -> u64 {
        self.controls.maps.load(Ordering::Relaxed)
    }

    /// Transfer buffers allocated and not yet freed.
    pub fn live_buffers(&self) -> u64 {
        self.controls.live_buffers.load(Ordering::Relaxed)
    }

    /// Buffers mapped and not yet unmapped.
    pub fn mapped_buffers(&self) -> u64 {
        self.controls.mapped_buffers.load(Ordering::Relaxed)
    }
}

impl ReadbackDevice for SoftwareDevice {
    type Buffer = SoftwareBuffer;

    fn allocate(&mut self, bytes: usize) -> CaptureResult<SoftwareBuffer> {
        // Zero-length anonymous maps are rejected by the OS.
        let map = MmapOptions::new()
            .len(bytes.max(1))
            .map_anon()
            .map_err(|e| CaptureError::io("allocate transfer buffer", e))?;
        self.controls.live_buffers.fetch_add(1, Ordering::Relaxed);
        Ok(SoftwareBuffer {
            map,
            ready_at: None,
            mapped: false,
        })
    }

    fn request_read(&mut self, buffer: &mut SoftwareBuffer, size: Size) -> CaptureResult<()> {
        let now = self.controls.clock.fetch_add(1, Ordering::AcqRel) + 1;
        buffer.ready_at = None;

        if Controls::take_failure(&self.controls.fail_reads) {
            return Err(CaptureError::device("read pixels", "injected read failure"));
        }
        if buffer.mapped {
            return Err(CaptureError::device("read pixels", "buffer is still mapped"));
        }
        if size.rgba_len() > buffer.map.len() {
            return Err(CaptureError::device(
                "read pixels",
                format!("{} does not fit in {} bytes", size, buffer.map.len()),
            ));
        }

        // Copy the overlap row by row; anything outside the framebuffer reads as zero.
        let fb = self.framebuffer.lock();
        let dst_stride = size.w as usize * 4;
        let src_stride = fb.size.w as usize * 4;
        let copy = dst_stride.min(src_stride);
        let rows = size.h.min(fb.size.h) as usize;
        buffer.map[..size.rgba_len()].fill(0);
        for y in 0..rows {
            let src = &fb.pixels[y * src_stride..y * src_stride + copy];
            buffer.map[y * dst_stride..y * dst_stride + copy].copy_from_slice(src);
        }
        drop(fb);

        buffer.ready_at = Some(now + 1 + self.latency_ticks);
        self.controls.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn map<'a>(&'a mut self, buffer: &'a mut SoftwareBuffer, len: usize) -> Option<&'a [u8]> {
        let ready_at = buffer.ready_at?;
        if self.controls.clock.load(Ordering::Acquire) < ready_at {
            return None;
        }
        if Controls::take_failure(&self.controls.fail_maps) {
            return None;
        }
        if len > buffer.map.len() {
            return None;
        }
        if !buffer.mapped {
            buffer.mapped = true;
            self.controls.mapped_buffers.fetch_add(1, Ordering::Relaxed);
        }
        self.controls.maps.fetch_add(1, Ordering::Relaxed);
        Some(&buffer.map[..len])
    }

    fn unmap(&mut self, buffer: &mut SoftwareBuffer) {
        if buffer.mapped {
            self.controls.mapped_buffers.fetch_sub(1, Ordering::Relaxed);
        }
        buffer.mapped = false;
        buffer.ready_at = None;
    }

    fn free(&mut self, buffer: SoftwareBuffer) {
        drop(buffer);
        self.controls.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(size: Size) -> SoftwareDevice {
        SoftwareDevice::new(SoftwareFramebuffer::new(size))
    }

    #[test]
    fn test_read_is_mappable_next_tick() {
        let size = Size::new(2, 2);
        let mut dev = device(size);
        dev.framebuffer().fill([1, 2, 3, 4]);
        let mut a = dev.allocate(size.rgba_len()).unwrap();
        let mut b = dev.allocate(size.rgba_len()).unwrap();

        dev.request_read(&mut a, size).unwrap();
        assert!(dev.map(&mut a, size.rgba_len()).is_none());

        dev.request_read(&mut b, size).unwrap();
        let bytes = dev.map(&mut a, size.rgba_len()).unwrap().to_vec();
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        dev.unmap(&mut a);

        dev.free(a);
        dev.free(b);
        assert_eq!(dev.live_buffers(), 0);
    }

    #[test]
    fn test_latency_ticks_delay_map() {
        let size = Size::new(1, 1);
        let mut dev = device(size).with_latency_ticks(1);
        let mut a = dev.allocate(4).unwrap();
        let mut b = dev.allocate(4).unwrap();

        dev.request_read(&mut a, size).unwrap();
        dev.request_read(&mut b, size).unwrap();
        assert!(dev.map(&mut a, 4).is_none());
        dev.request_read(&mut b, size).unwrap();
        assert!(dev.map(&mut a, 4).is_some());
    }

    #[test]
    fn test_injected_failures() {
        let size = Size::new(1, 1);
        let mut dev = device(size);
        let handle = dev.clone();
        let mut a = dev.allocate(4).unwrap();
        let mut b = dev.allocate(4).unwrap();

        handle.fail_next_reads(1);
        assert!(dev.request_read(&mut a, size).is_err());
        dev.request_read(&mut a, size).unwrap();

        handle.fail_next_maps(1);
        dev.request_read(&mut b, size).unwrap();
        assert!(dev.map(&mut a, 4).is_none());
        assert!(dev.map(&mut a, 4).is_some());
        assert_eq!(handle.reads(), 2);
        assert_eq!(handle.maps(), 1);
    }

    #[test]
    fn test_read_larger_than_buffer_fails() {
        let mut dev = device(Size::new(4, 4));
        let mut small = dev.allocate(16).unwrap();
        assert!(dev.request_read(&mut small, Size::new(4, 4)).is_err());
    }

    #[test]
    fn test_framebuffer_smaller_than_read_pads_with_zero() {
        let mut dev = device(Size::new(1, 1));
        dev.framebuffer().fill([9, 9, 9, 9]);
        let read = Size::new(2, 2);
        let mut a = dev.allocate(read.rgba_len()).unwrap();
        let mut b = dev.allocate(read.rgba_len()).unwrap();

        dev.request_read(&mut a, read).unwrap();
        dev.request_read(&mut b, read).unwrap();
        let bytes = dev.map(&mut a, read.rgba_len()).unwrap();
        assert_eq!(&bytes[..4], &[9, 9, 9, 9]);
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }
}

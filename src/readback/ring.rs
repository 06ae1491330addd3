//! # Readback Ring Module
//!
//! Round-robin set of GPU transfer slots that turns a synchronous pixel read
//! into a pipelined one: each tick issues a read into one slot and maps the
//! slot issued on an earlier tick, so the CPU never waits for the transfer it
//! just started.
//!
//! ## Slot Rotation
//!
//! ```text
//!  tick 1:  issue → [A]      map [B] → nothing pending
//!  tick 2:  issue → [B]      map [A] → frame from tick 1
//!  tick 3:  issue → [A]      map [B] → frame from tick 2
//! ```
//!
//! The first frame therefore arrives one tick late, and every later tick
//! delivers the previous tick's pixels. With more than two slots the delay is
//! `slot_count - 1` ticks.
//!
//! ## Resizing
//!
//! A resize frees every slot and allocates it again at the new byte size, then
//! bumps the ring generation. A read that was in flight is abandoned with its
//! buffer; the slot remembers it was issued under the old generation and
//! reports it as [`SkipReason::Stale`] when it comes up for mapping. Pixels
//! read under old dimensions are never delivered.

use tracing::debug;

use super::device::ReadbackDevice;
use crate::core::frame::Size;
use crate::error::{CaptureError, CaptureResult, classify};

/// State of one transfer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    PendingRead,
    /// Held only while the harvest callback runs
    Mapped,
}

/// Why a tick produced no frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The mapped slot had no read in flight (first ticks, or after a failed issue)
    NothingPending,
    /// The slot's read was issued before the last resize
    Stale,
    /// The device could not map the slot
    MapFailed,
    /// The ring has been released
    Released,
}

/// Result of one [`ReadbackRing::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The harvest callback ran with a frame of this size
    Harvested(Size),
    Skipped(SkipReason),
}

impl TickOutcome {
    pub fn is_harvested(&self) -> bool {
        matches!(self, Self::Harvested(_))
    }
}

struct Slot<B> {
    buffer: Option<B>,
    capacity: usize,
    state: SlotState,
    /// Size and ring generation of the last read issued, cleared once harvested
    issued: Option<(Size, u64)>,
}

/// Double (or N-) buffered asynchronous readback.
///
/// Owns the device and every transfer slot. All methods must be called from
/// the thread that owns the device's graphics context; slots are released on
/// drop, so drop the ring before that context goes away.
pub struct ReadbackRing<D: ReadbackDevice> {
    device: D,
    slots: Vec<Slot<D::Buffer>>,
    size: Size,
    current: usize,
    generation: u64,
    released: bool,
    read_failures: u64,
}

impl<D: ReadbackDevice> ReadbackRing<D> {
    /// Allocates `slot_count` transfer slots for frames of `size`.
    pub fn new(mut device: D, size: Size, slot_count: usize) -> CaptureResult<Self> {
        if slot_count < 2 {
            return Err(CaptureError::config(
                "slot_count",
                slot_count.to_string(),
                "at least two transfer slots are needed",
            ));
        }
        if size.is_empty() {
            return Err(CaptureError::config(
                "size",
                size.to_string(),
                "dimensions must be non-zero",
            ));
        }

        let capacity = size.rgba_len();
        let mut slots = Vec::with_capacity(slot_count);
        for index in 0..slot_count {
            match device.allocate(capacity) {
                Ok(buffer) => slots.push(Slot {
                    buffer: Some(buffer),
                    capacity,
                    state: SlotState::Idle,
                    issued: None,
                }),
                Err(e) => {
                    for slot in slots.drain(..) {
                        if let Some(buffer) = slot.buffer {
                            device.free(buffer);
                        }
                    }
                    return Err(e.with_context(format!("transfer slot {}", index)));
                }
            }
        }

        debug!(%size, slot_count, "readback ring allocated");
        Ok(Self {
            device,
            slots,
            size,
            current: 0,
            generation: 0,
            released: false,
            read_failures: 0,
        })
    }

    /// Issues a read into the current slot, then maps the next one.
    ///
    /// `harvest` runs at most once, while the slot is mapped, with the mapped
    /// bytes and the size the read was issued at. The mapped slice is only
    /// valid for the duration of the call.
    pub fn tick<F>(&mut self, harvest: F) -> TickOutcome
    where
        F: FnOnce(&[u8], Size),
    {
        if self.released {
            return TickOutcome::Skipped(SkipReason::Released);
        }

        let current = self.current;
        let next = (current + 1) % self.slots.len();

        self.issue(current);
        let outcome = self.harvest(next, harvest);

        self.current = next;
        outcome
    }

    fn issue(&mut self, index: usize) {
        let size = self.size;
        let generation = self.generation;
        let Self { device, slots, .. } = self;
        let slot = &mut slots[index];

        if slot.state == SlotState::Mapped {
            if let Some(buffer) = slot.buffer.as_mut() {
                device.unmap(buffer);
            }
        }
        slot.state = SlotState::Idle;
        slot.issued = None;

        let Some(buffer) = slot.buffer.as_mut() else {
            return;
        };
        match device.request_read(buffer, size) {
            Ok(()) => {
                slot.state = SlotState::PendingRead;
                slot.issued = Some((size, generation));
            }
            Err(e) => {
                self.read_failures += 1;
                let e = e.with_context(format!("slot {}", index));
                classify::report(&e, "failed to issue pixel read");
            }
        }
    }

    fn harvest<F>(&mut self, index: usize, harvest: F) -> TickOutcome
    where
        F: FnOnce(&[u8], Size),
    {
        let generation = self.generation;
        let Self { device, slots, .. } = self;
        let slot = &mut slots[index];

        let size = match (slot.state, slot.issued) {
            (SlotState::PendingRead, Some((size, issued))) if issued == generation => size,
            (_, Some((_, issued))) if issued != generation => {
                slot.state = SlotState::Idle;
                slot.issued = None;
                classify::report(
                    &CaptureError::stale_slot(index, issued),
                    "discarding transfer from before resize",
                );
                return TickOutcome::Skipped(SkipReason::Stale);
            }
            _ => return TickOutcome::Skipped(SkipReason::NothingPending),
        };
        let Some(buffer) = slot.buffer.as_mut() else {
            return TickOutcome::Skipped(SkipReason::NothingPending);
        };
        slot.issued = None;

        let Some(bytes) = device.map(buffer, size.rgba_len()) else {
            slot.state = SlotState::Idle;
            classify::report(&CaptureError::map_failed(index), "skipping frame");
            return TickOutcome::Skipped(SkipReason::MapFailed);
        };
        // Stays Mapped if the callback unwinds; issue and release unmap it.
        slot.state = SlotState::Mapped;
        harvest(bytes, size);
        device.unmap(buffer);
        slot.state = SlotState::Idle;
        TickOutcome::Harvested(size)
    }

    /// Switches the ring to frames of `size`.
    ///
    /// Every slot is unmapped if needed, freed and allocated again at
    /// `size.rgba_len()` bytes. Transfers in flight are abandoned. Runs between
    /// ticks on the render thread, so no transfer straddles the change.
    pub fn resize(&mut self, size: Size) -> CaptureResult<()> {
        if self.released {
            return Err(CaptureError::device("resize", "readback ring already released"));
        }
        if size.is_empty() {
            return Err(CaptureError::config(
                "size",
                size.to_string(),
                "dimensions must be non-zero",
            ));
        }

        self.generation += 1;

        let needed = size.rgba_len();
        let Self { device, slots, .. } = self;
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(mut buffer) = slot.buffer.take() {
                if slot.state == SlotState::Mapped {
                    device.unmap(&mut buffer);
                }
                device.free(buffer);
            }
            slot.state = SlotState::Idle;
            slot.capacity = 0;
            let buffer = device
                .allocate(needed)
                .map_err(|e| e.with_context(format!("resize transfer slot {}", index)))?;
            slot.buffer = Some(buffer);
            slot.capacity = needed;
        }

        self.size = size;
        debug!(%size, generation = self.generation, "readback ring resized");
        Ok(())
    }

    /// Unmaps and frees every transfer slot. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let Self { device, slots, .. } = self;
        for slot in slots.iter_mut() {
            if let Some(mut buffer) = slot.buffer.take() {
                if slot.state == SlotState::Mapped {
                    device.unmap(&mut buffer);
                }
                device.free(buffer);
            }
            slot.state = SlotState::Idle;
            slot.issued = None;
        }
        debug!("readback ring released");
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next tick will issue into.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Byte capacity of a slot's transfer buffer, zero if it has none.
    pub fn slot_capacity(&self, index: usize) -> Option<usize> {
        self.slots.get(index).map(|slot| slot.capacity)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Reads that could not be issued so far.
    pub fn read_failures(&self) -> u64 {
        self.read_failures
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: ReadbackDevice> Drop for ReadbackRing<D> {
    fn drop(&mut self) {
        self.release();
    }
}

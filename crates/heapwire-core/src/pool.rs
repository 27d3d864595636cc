//! Packet pool — reusable buffers for the recurring statistics message.
//!
//! The pool is an arena of equally sized byte buffers addressed by slot
//! index. Acquiring moves a slot's buffer into a [`Packet`]; releasing
//! moves it back. A buffer is owned by exactly one place at a time: its
//! slot when free, the packet while checked out.
//!
//! When every slot is checked out and the pool is at capacity, acquire
//! hands out a transient packet that the pool does not track. Releasing a
//! transient packet just drops it. The pool never grows past capacity.

use crate::wire::{Packet, HEADER_LEN};

/// Default number of pooled statistics buffers.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Index of a pool slot. Only the pool creates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSlot(usize);

#[derive(Debug)]
pub struct PacketPool {
    /// `None` while the slot's buffer is checked out.
    slots: Vec<Option<Vec<u8>>>,
    free: Vec<usize>,
    capacity: usize,
    payload_len: usize,
}

impl PacketPool {
    /// A pool of at most `capacity` buffers, each holding `payload_len`
    /// payload bytes. Slots are allocated lazily on first demand.
    pub fn new(capacity: usize, payload_len: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            capacity,
            payload_len,
        }
    }

    /// A zeroed, full-size packet ready to fill.
    pub fn acquire(&mut self) -> Packet {
        if let Some(index) = self.free.pop() {
            if let Some(buf) = self.slots[index].take() {
                return Packet::pooled(buf, PoolSlot(index));
            }
        }

        if self.slots.len() < self.capacity {
            let index = self.slots.len();
            self.slots.push(None);
            tracing::trace!(slot = index, "packet pool slot allocated");
            return Packet::pooled(vec![0u8; HEADER_LEN + self.payload_len], PoolSlot(index));
        }

        tracing::trace!(capacity = self.capacity, "packet pool exhausted, transient packet");
        Packet::new(self.payload_len)
    }

    /// Return a packet. Pooled buffers go back to their slot, restored to
    /// full size and zeroed; transient packets are dropped.
    pub fn release(&mut self, packet: Packet) {
        let (mut buf, slot) = packet.into_parts();
        let Some(PoolSlot(index)) = slot else {
            return;
        };
        match self.slots.get_mut(index) {
            Some(entry) if entry.is_none() => {
                buf.clear();
                buf.resize(HEADER_LEN + self.payload_len, 0);
                *entry = Some(buf);
                self.free.push(index);
            }
            _ => tracing::warn!(slot = index, "release of a packet this pool does not own"),
        }
    }

    /// Slots allocated so far.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }
}

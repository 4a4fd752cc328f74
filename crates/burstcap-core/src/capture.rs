//! Packet Batches
//!
//! One RX poll yields a [`Batch`]: up to `MAX_PKT_BURST` descriptors over
//! frames still sitting in pool memory. The batch borrows the engine, so the
//! next capture cannot start while its descriptors are alive; dropping it
//! hands every slot back to the pool.
//!
//! Descriptors that must outlive the batch are either copied out
//! ([`OwnedPacket`]) or pinned ([`PinnedPacket`]), which keeps the slot
//! borrowed until the handle is dropped.

use crate::buffer::{BufferPool, SlotHandle};
use crate::device::RxBurst;
use crate::error::PoolError;
use crate::MAX_PKT_BURST;
use arrayvec::ArrayVec;
use bytes::Bytes;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Coarse capture clock: whole seconds since the first reading in this
/// process. Monotonic, never decreases.
#[inline]
pub fn coarse_now() -> u32 {
    let epoch = CLOCK_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs().min(u32::MAX as u64) as u32
}

/// Borrowed view over one received frame
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    data: &'a [u8],
    port: u8,
    timestamp: u32,
}

impl<'a> Packet<'a> {
    /// Frame bytes
    #[inline(always)]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Frame length
    #[inline(always)]
    pub fn len(&self) -> u16 {
        self.data.len() as u16
    }

    /// True for a zero-length frame
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Port the frame arrived on
    #[inline(always)]
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Coarse capture time, see [`coarse_now`]
    #[inline(always)]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Copy into owned storage
    pub fn to_owned_packet(&self) -> OwnedPacket {
        OwnedPacket {
            data: Bytes::copy_from_slice(self.data),
            port: self.port,
            timestamp: self.timestamp,
        }
    }
}

/// Frame copied out of the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedPacket {
    /// Frame bytes
    pub data: Bytes,
    /// Port the frame arrived on
    pub port: u8,
    /// Coarse capture time
    pub timestamp: u32,
}

impl OwnedPacket {
    /// Frame length
    pub fn len(&self) -> u16 {
        self.data.len() as u16
    }

    /// True for a zero-length frame
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Descriptor that keeps its slot out of the pool until dropped.
///
/// Holds a reference to the pool, so it stays valid after the batch and even
/// after the engine is cleaned up. May be sent to and dropped on another
/// thread.
#[derive(Debug)]
pub struct PinnedPacket {
    pool: Arc<BufferPool>,
    slot: Option<SlotHandle>,
    port: u8,
    timestamp: u32,
}

impl PinnedPacket {
    /// Frame bytes
    pub fn data(&self) -> &[u8] {
        match &self.slot {
            Some(slot) => self.pool.data(slot),
            None => &[],
        }
    }

    /// Frame length
    pub fn len(&self) -> u16 {
        self.slot.as_ref().map_or(0, SlotHandle::len)
    }

    /// True for a zero-length frame
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Port the frame arrived on
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Coarse capture time
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Return the slot now, reporting pool errors instead of logging them
    pub fn release(mut self) -> Result<(), PoolError> {
        match self.slot.take() {
            Some(slot) => self.pool.release(slot),
            None => Ok(()),
        }
    }
}

impl Drop for PinnedPacket {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Err(e) = self.pool.release(slot) {
                tracing::error!(error = %e, "pinned packet release failed");
            }
        }
    }
}

/// Descriptors from one RX poll
#[derive(Debug)]
pub struct Batch<'a> {
    pool: &'a Arc<BufferPool>,
    slots: ArrayVec<Option<SlotHandle>, MAX_PKT_BURST>,
    port: u8,
    timestamp: u32,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(pool: &'a Arc<BufferPool>, rx: RxBurst, port: u8, timestamp: u32) -> Self {
        Self {
            pool,
            slots: rx.into_iter().map(Some).collect(),
            port,
            timestamp,
        }
    }

    pub(crate) fn empty(pool: &'a Arc<BufferPool>, port: u8) -> Self {
        Self {
            pool,
            slots: ArrayVec::new(),
            port,
            timestamp: 0,
        }
    }

    /// Descriptors still held by the batch
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// No descriptors
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor at `index` in arrival order; `None` past the end or once
    /// pinned
    pub fn get(&self, index: usize) -> Option<Packet<'_>> {
        let slot = self.slots.get(index)?.as_ref()?;
        Some(self.describe(slot))
    }

    /// Descriptors in arrival order
    pub fn iter(&self) -> impl Iterator<Item = Packet<'_>> + '_ {
        self.slots.iter().flatten().map(move |slot| self.describe(slot))
    }

    /// Coarse capture time shared by every descriptor; 0 for an empty batch
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Port the batch was received on
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Sum of frame lengths
    pub fn total_bytes(&self) -> u64 {
        self.slots.iter().flatten().map(|s| s.len() as u64).sum()
    }

    /// Copy every descriptor into owned storage
    pub fn copy_out(&self) -> Vec<OwnedPacket> {
        self.iter().map(|p| p.to_owned_packet()).collect()
    }

    /// Take the descriptor at `index` out of the batch, keeping its slot
    /// borrowed until the returned handle is dropped
    pub fn pin(&mut self, index: usize) -> Option<PinnedPacket> {
        let slot = self.slots.get_mut(index)?.take()?;
        Some(self.pinned(slot))
    }

    /// Pin every remaining descriptor
    pub fn pin_all(mut self) -> Vec<PinnedPacket> {
        let slots: Vec<SlotHandle> = self.slots.iter_mut().filter_map(Option::take).collect();
        slots.into_iter().map(|slot| self.pinned(slot)).collect()
    }

    #[inline(always)]
    fn describe<'b>(&'b self, slot: &'b SlotHandle) -> Packet<'b> {
        Packet {
            data: self.pool.data(slot),
            port: self.port,
            timestamp: self.timestamp,
        }
    }

    fn pinned(&self, slot: SlotHandle) -> PinnedPacket {
        PinnedPacket {
            pool: Arc::clone(self.pool),
            slot: Some(slot),
            port: self.port,
            timestamp: self.timestamp,
        }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        for slot in self.slots.drain(..).flatten() {
            if let Err(e) = self.pool.release(slot) {
                tracing::error!(error = %e, "batch slot release failed");
            }
        }
    }
}

//! Packet Buffer Pool
//!
//! Fixed-slot arena backing every received frame.
//!
//! # Design
//!
//! - One contiguous, cache-line aligned region reserved at creation
//! - Lock-free free list (bounded queue of slot indices)
//! - Per-slot sequence word (odd while borrowed) so a slot is released at
//!   most once per borrow, even through a stale raw record
//! - Move-only slot handles; no allocation after creation

use crate::error::PoolError;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Cache line size
pub const CACHE_LINE: usize = 64;

/// Bytes reserved in front of the data room of every slot
pub const SLOT_HEADROOM: usize = 128;

/// Largest data room a slot may have (frame lengths are `u16`)
pub const MAX_SLOT_CAPACITY: u32 = u16::MAX as u32;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// NUMA placement hint for pool memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    /// No preference
    #[default]
    Any,
    /// Memory local to the given socket
    Socket(u32),
}

impl Locality {
    /// Build from a driver-style socket id (negative means "any")
    pub fn from_socket_id(id: i32) -> Self {
        if id < 0 {
            Locality::Any
        } else {
            Locality::Socket(id as u32)
        }
    }

    /// Driver-style socket id (-1 for [`Locality::Any`])
    pub fn socket_id(&self) -> i32 {
        match self {
            Locality::Any => -1,
            Locality::Socket(id) => *id as i32,
        }
    }
}

/// Exclusive claim on one pool slot.
///
/// Handles are move-only. A handle that is dropped without being released
/// keeps its slot in flight for the lifetime of the pool.
#[derive(Debug)]
#[must_use = "a slot handle must be released back to its pool"]
pub struct SlotHandle {
    index: u32,
    pool: u64,
    seq: u32,
    len: u16,
}

impl SlotHandle {
    /// Slot index within the pool
    #[inline(always)]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Committed frame length
    #[inline(always)]
    pub fn len(&self) -> u16 {
        self.len
    }

    /// True when no frame bytes are committed
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Give up the handle for an index-only record, e.g. for a hardware ring.
    ///
    /// The slot stays borrowed until [`BufferPool::release_raw`] is called.
    pub fn into_raw(self) -> RawSlot {
        RawSlot {
            index: self.index,
            pool: self.pool,
            seq: self.seq,
        }
    }
}

/// Index-only record of a borrowed slot.
///
/// A record is valid for the borrow it came from only; once the slot has been
/// released, copies of the record are rejected even if the slot is borrowed
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSlot {
    /// Slot index
    pub index: u32,
    pool: u64,
    seq: u32,
}

/// Buffer pool (pre-allocated, lock-free)
pub struct BufferPool {
    id: u64,
    region: NonNull<u8>,
    layout: Layout,
    slot_count: u32,
    slot_capacity: usize,
    stride: usize,
    seqs: Box<[AtomicU32]>,
    free: ArrayQueue<u32>,
    locality: Locality,
    cache_size: u32,
}

// SAFETY: slot memory is only reachable through a `SlotHandle`, and the
// sequence words plus the free queue guarantee at most one live handle per slot.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Reserve `slot_count` slots of `slot_capacity` data bytes each.
    pub fn allocate(
        slot_count: u32,
        slot_capacity: u32,
        locality: Locality,
    ) -> Result<Self, PoolError> {
        if slot_count == 0 {
            return Err(PoolError::ResourceExhausted("pool needs at least one slot".into()));
        }
        if slot_capacity == 0 || slot_capacity > MAX_SLOT_CAPACITY {
            return Err(PoolError::ResourceExhausted(format!(
                "slot capacity {} outside 1..={}",
                slot_capacity, MAX_SLOT_CAPACITY
            )));
        }

        let stride = (SLOT_HEADROOM + slot_capacity as usize).next_multiple_of(CACHE_LINE);
        let total = stride.checked_mul(slot_count as usize).ok_or_else(|| {
            PoolError::ResourceExhausted(format!("{} slots of {} bytes overflow", slot_count, stride))
        })?;
        let layout = Layout::from_size_align(total, CACHE_LINE)
            .map_err(|e| PoolError::ResourceExhausted(e.to_string()))?;

        // SAFETY: layout has non-zero size (slot_count > 0, stride >= 64).
        let ptr = unsafe { alloc_zeroed(layout) };
        let region = NonNull::new(ptr).ok_or_else(|| {
            PoolError::ResourceExhausted(format!("cannot reserve {} bytes", total))
        })?;

        let free = ArrayQueue::new(slot_count as usize);
        for index in 0..slot_count {
            // Capacity equals slot_count, so this never overflows.
            let _ = free.push(index);
        }
        let seqs = (0..slot_count).map(|_| AtomicU32::new(0)).collect();

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            pool = id,
            slots = slot_count,
            slot_capacity,
            bytes = total,
            ?locality,
            "buffer pool allocated"
        );

        Ok(Self {
            id,
            region,
            layout,
            slot_count,
            slot_capacity: slot_capacity as usize,
            stride,
            seqs,
            free,
            locality,
            cache_size: 0,
        })
    }

    /// Record a per-core cache size hint for backends that keep one
    pub fn with_cache_size(mut self, cache_size: u32) -> Self {
        self.cache_size = cache_size.min(self.slot_count);
        self
    }

    /// Take a free slot; `None` when the pool is exhausted
    #[inline]
    pub fn borrow(&self) -> Option<SlotHandle> {
        let index = self.free.pop()?;
        let seq = self.seqs[index as usize].fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        debug_assert!((seq & 1) == 1, "slot {} on free list while borrowed", index);
        Some(SlotHandle {
            index,
            pool: self.id,
            seq,
            len: 0,
        })
    }

    /// Return a slot to the free set
    #[inline]
    pub fn release(&self, slot: SlotHandle) -> Result<(), PoolError> {
        self.release_raw(slot.into_raw())
    }

    /// Return a slot recorded with [`SlotHandle::into_raw`].
    ///
    /// Releasing the same raw slot twice is rejected with
    /// [`PoolError::DoubleRelease`] and leaves the free set untouched, also
    /// when the slot has been borrowed again in between.
    pub fn release_raw(&self, slot: RawSlot) -> Result<(), PoolError> {
        if slot.pool != self.id || slot.index >= self.slot_count {
            return Err(PoolError::ForeignSlot {
                slot: slot.index,
                pool: self.id,
            });
        }
        let released = slot.seq.wrapping_add(1);
        if self.seqs[slot.index as usize]
            .compare_exchange(slot.seq, released, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::DoubleRelease(slot.index));
        }
        if self.free.push(slot.index).is_err() {
            return Err(PoolError::DoubleRelease(slot.index));
        }
        Ok(())
    }

    /// Committed frame bytes of a slot (empty for a handle of another pool)
    #[inline(always)]
    pub fn data<'a>(&'a self, slot: &'a SlotHandle) -> &'a [u8] {
        let Some(start) = self.data_offset(slot) else {
            return &[];
        };
        // SAFETY: offset and len are within the region; the handle proves
        // exclusive ownership of the slot and we only hand out a shared view.
        unsafe {
            std::slice::from_raw_parts(self.region.as_ptr().add(start), slot.len as usize)
        }
    }

    /// Whole data room of a slot, for a device to write a frame into
    #[inline(always)]
    pub fn buffer_mut<'a>(&'a self, slot: &'a mut SlotHandle) -> &'a mut [u8] {
        let Some(start) = self.data_offset(slot) else {
            return &mut [];
        };
        // SAFETY: the mutable borrow of the unique handle guarantees no other
        // reference to this slot's bytes exists.
        unsafe {
            std::slice::from_raw_parts_mut(self.region.as_ptr().add(start), self.slot_capacity)
        }
    }

    /// Set the committed length of a slot, clamped to the data room
    #[inline(always)]
    pub fn commit(&self, slot: &mut SlotHandle, len: usize) -> u16 {
        let room = if slot.pool == self.id { self.slot_capacity } else { 0 };
        slot.len = len.min(room) as u16;
        slot.len
    }

    /// Copy a frame into a slot, truncating to the data room
    #[inline]
    pub fn fill(&self, slot: &mut SlotHandle, frame: &[u8]) -> u16 {
        let len = {
            let buf = self.buffer_mut(slot);
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);
            len
        };
        self.commit(slot, len)
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Slots currently borrowed
    pub fn in_flight(&self) -> usize {
        self.slot_count as usize - self.free.len()
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.slot_count as usize
    }

    /// Data room per slot (bytes)
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Placement hint the pool was created with
    pub fn locality(&self) -> Locality {
        self.locality
    }

    /// Per-core cache hint
    pub fn cache_size(&self) -> u32 {
        self.cache_size
    }

    /// Unique id of this pool
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    fn data_offset(&self, slot: &SlotHandle) -> Option<usize> {
        (slot.pool == self.id).then(|| slot.index as usize * self.stride + SLOT_HEADROOM)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.id)
            .field("slots", &self.slot_count)
            .field("slot_capacity", &self.slot_capacity)
            .field("available", &self.available())
            .field("locality", &self.locality)
            .finish()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // SAFETY: region was allocated with exactly this layout.
        unsafe {
            dealloc(self.region.as_ptr(), self.layout);
        }
    }
}

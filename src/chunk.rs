//! Chunks: the unit of delivery to the user.
//!
//! A [`Chunk`] aggregates many heaps whose counters fall in a contiguous
//! range. Member streams scatter-write heap payloads into the chunk while it
//! sits in the group window; once the chunk has left the window and no
//! producer holds a reference, it is handed to the user exactly once.
//!
//! # Reference counting
//!
//! The producer reference count is embedded in the chunk rather than layered
//! through `Arc`'s strong count. `Arc` keeps the memory alive (including in
//! the graveyard after shutdown), while the embedded counter tracks how many
//! producer-side references are outstanding. The two have different
//! lifecycles: a chunk with zero producer references may still be owned by
//! the window, the data ring, or the user.
//!
//! # Write protocol
//!
//! Payload bytes are written without locks. This is sound because:
//! - each heap slot is written by exactly one stream (the place function
//!   assigns disjoint regions per heap index),
//! - writes happen only between `acquire` and `release` of a producer
//!   reference,
//! - delivery to the user happens only after the count has been observed at
//!   zero under the group mutex, so all writes happen-before any read of the
//!   delivered payload (release decrement + acquire fence + mutex edges).

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering, fence};

use serde::{Deserialize, Serialize};

/// Signed chunk index. Derived from the heap counter by the user-supplied
/// place function; ids never decrease within a group window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub i64);

impl ChunkId {
    /// Sentinel for a chunk that is not currently assigned to any index.
    pub const INVALID: Self = Self(i64::MIN);

    /// Raw index value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for ChunkId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Payload storage written concurrently by member streams.
///
/// Interior mutability without a lock; see the module docs for the protocol
/// that makes this sound.
struct PayloadCell(UnsafeCell<Box<[u8]>>);

// SAFETY: concurrent access is mediated by the write protocol described in
// the module docs: producers write disjoint regions while holding a counted
// reference, and readers only observe the payload after the count has been
// seen at zero under the group mutex.
unsafe impl Sync for PayloadCell {}

/// A fixed-shape buffer aggregating many heaps.
///
/// Constructed by the user's allocate callback (or recycled through a free
/// ring); the group assigns the id when the chunk is installed in a window
/// slot and mutates only the embedded reference count. All payload mutation
/// comes from member streams via [`Chunk::write`].
pub struct Chunk {
    /// Index this chunk currently covers; `ChunkId::INVALID` when idle.
    id: AtomicI64,
    /// Producer references outstanding (streams assembling heaps into this
    /// chunk). Zero is necessary but not sufficient for delivery: the chunk
    /// must also have left the window.
    ref_count: AtomicU32,
    /// One flag per heap slot, set when that heap's payload has been written.
    present: Box<[AtomicBool]>,
    payload: PayloadCell,
}

impl Chunk {
    /// Creates an idle chunk with `heap_slots` presence flags and a
    /// zero-filled payload of `payload_len` bytes.
    #[must_use]
    pub fn new(heap_slots: usize, payload_len: usize) -> Self {
        let present = (0..heap_slots)
            .map(|_| AtomicBool::new(false))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            id: AtomicI64::new(ChunkId::INVALID.as_i64()),
            ref_count: AtomicU32::new(0),
            present,
            payload: PayloadCell(UnsafeCell::new(vec![0u8; payload_len].into_boxed_slice())),
        }
    }

    /// The id this chunk currently covers.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChunkId {
        ChunkId(self.id.load(Ordering::Relaxed))
    }

    pub(crate) fn set_id(&self, id: ChunkId) {
        self.id.store(id.as_i64(), Ordering::Relaxed);
    }

    /// Current producer reference count.
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Takes one producer reference. Only called under the group mutex.
    pub(crate) fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one producer reference. Returns `true` if this was the last
    /// one, in which case the caller must notify the group.
    pub(crate) fn release(&self) -> bool {
        let prev = self.ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "chunk reference count underflow");
        if prev == 1 {
            // Pairs with the Release decrement so the delivering thread
            // observes every producer write made before the final release.
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Number of heap slots in this chunk.
    #[inline]
    #[must_use]
    pub fn heap_slots(&self) -> usize {
        self.present.len()
    }

    /// Payload capacity in bytes.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> usize {
        // SAFETY: reading the box's length does not touch payload bytes and
        // the box itself is never reallocated after construction.
        unsafe { (&*self.payload.0.get()).len() }
    }

    /// Copies `src` into the payload at `offset`.
    ///
    /// Callers must hold a producer reference and must only write regions
    /// assigned to them by the place function.
    ///
    /// # Panics
    ///
    /// Panics if the region is out of bounds. Member streams validate
    /// placements before writing, so external input cannot reach this.
    pub fn write(&self, offset: usize, src: &[u8]) {
        assert!(
            offset.checked_add(src.len()).is_some_and(|end| end <= self.payload_len()),
            "heap write out of chunk bounds"
        );
        // SAFETY: in bounds per the assert above; concurrent writers target
        // disjoint regions and readers are excluded by the reference-count
        // protocol (module docs).
        unsafe {
            let base = (*self.payload.0.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), src.len());
        }
    }

    /// Marks the heap at `index` as received.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; member streams validate placements
    /// before marking.
    pub fn mark_present(&self, index: usize) {
        self.present[index].store(true, Ordering::Relaxed);
    }

    /// Whether the heap at `index` has been written.
    #[inline]
    #[must_use]
    pub fn is_present(&self, index: usize) -> bool {
        self.present[index].load(Ordering::Relaxed)
    }

    /// Number of heaps written so far.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.present
            .iter()
            .filter(|p| p.load(Ordering::Relaxed))
            .count()
    }

    /// Read access to the payload.
    ///
    /// Valid once the chunk has been delivered (or before it is first handed
    /// to a group): at those points no producer holds a reference, so no
    /// concurrent writes exist.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        // SAFETY: per the documented contract there are no concurrent
        // writers when this is called; the final release's Acquire fence and
        // the group mutex order all prior writes before the read.
        unsafe { &*self.payload.0.get() }
    }

    /// Resets presence flags and the id so the chunk can be recycled through
    /// a free ring. The payload is left as-is; heap slots are overwritten on
    /// the next pass.
    pub fn reset(&self) {
        debug_assert_eq!(self.ref_count(), 0, "resetting a chunk with live references");
        for p in &self.present {
            p.store(false, Ordering::Relaxed);
        }
        self.set_id(ChunkId::INVALID);
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id())
            .field("ref_count", &self.ref_count())
            .field("heap_slots", &self.heap_slots())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

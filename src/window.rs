//! Sliding chunk window.
//!
//! The [`ChunkWindow`] tracks the contiguous interval `[head_id, tail_id)`
//! of chunk ids currently under construction, backed by a fixed circular
//! buffer indexed by `id mod capacity`.
//!
//! # Design
//!
//! - Fixed-size circular buffer of nullable slots
//! - `head_id` is the smallest tracked id, `tail_id` is one past the largest
//! - Advancing the tail past capacity displaces slots from the head, which
//!   are handed back to the caller in ascending id order
//! - Ids never decrease: neither cursor ever moves backwards
//!
//! # Invariants
//!
//! - `0 <= tail_id - head_id <= capacity`
//! - The slot for id `c` is occupied only when `head_id <= c < tail_id`,
//!   and then holds the chunk whose assigned id is `c`
//!
//! The same structure serves two roles: the group-wide window owned by the
//! manager, and each member stream's private window of outstanding
//! references.

use std::sync::Arc;

use crate::chunk::{Chunk, ChunkId};

/// Circular buffer of chunk slots with head/tail cursors.
pub struct ChunkWindow {
    /// Slot `c mod capacity` holds the chunk with id `c` when occupied.
    slots: Box<[Option<Arc<Chunk>>]>,
    head: i64,
    tail: i64,
}

impl ChunkWindow {
    /// Creates an empty window.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0. Group configuration rejects a zero window
    /// before one is ever constructed.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ChunkWindow capacity must be > 0");
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        Self { slots, head: 0, tail: 0 }
    }

    /// Smallest id currently tracked.
    #[inline]
    #[must_use]
    pub fn head_id(&self) -> ChunkId {
        ChunkId(self.head)
    }

    /// One past the largest id currently tracked.
    #[inline]
    #[must_use]
    pub fn tail_id(&self) -> ChunkId {
        ChunkId(self.tail)
    }

    /// Slot capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[inline]
    fn slot_index(&self, id: i64) -> usize {
        id.rem_euclid(self.slots.len() as i64) as usize
    }

    /// Returns the chunk for `id` if it is inside the window and its slot is
    /// occupied. O(1), no allocation.
    #[must_use]
    pub fn lookup(&self, id: ChunkId) -> Option<&Arc<Chunk>> {
        let c = id.as_i64();
        if c < self.head || c >= self.tail {
            return None;
        }
        self.slots[self.slot_index(c)].as_ref()
    }

    /// Installs a chunk into the slot for `id`.
    ///
    /// The caller must have brought `id` inside the window via
    /// [`ChunkWindow::extend_to`] first, and the slot must be empty.
    pub fn insert(&mut self, id: ChunkId, chunk: Arc<Chunk>) {
        let c = id.as_i64();
        debug_assert!(self.head <= c && c < self.tail, "insert outside window");
        let idx = self.slot_index(c);
        debug_assert!(self.slots[idx].is_none(), "insert into occupied slot");
        self.slots[idx] = Some(chunk);
    }

    /// Ensures `tail_id > id` by advancing the tail, raising the head first
    /// when the span would exceed capacity. Displaced chunks are appended to
    /// `evicted` in ascending id order; newly exposed slots are empty.
    ///
    /// A no-op when `id` is already below the tail.
    pub fn extend_to(&mut self, id: ChunkId, evicted: &mut Vec<Arc<Chunk>>) {
        let c = id.as_i64();
        if c < self.tail {
            return;
        }
        let new_tail = c + 1;
        let new_head = self.head.max(new_tail - self.slots.len() as i64);
        // Only ids below the old tail can hold chunks.
        let evict_to = new_head.min(self.tail);
        for i in self.head..evict_to {
            let idx = self.slot_index(i);
            if let Some(chunk) = self.slots[idx].take() {
                evicted.push(chunk);
            }
        }
        self.head = new_head;
        self.tail = new_tail;
    }

    /// Raises the head to `min(max(id, head_id), tail_id)` and returns the
    /// displaced chunks in ascending id order.
    pub fn flush_until(&mut self, id: ChunkId) -> Vec<Arc<Chunk>> {
        let target = id.as_i64().max(self.head).min(self.tail);
        let mut evicted = Vec::new();
        for i in self.head..target {
            let idx = self.slot_index(i);
            if let Some(chunk) = self.slots[idx].take() {
                evicted.push(chunk);
            }
        }
        self.head = target;
        evicted
    }

    /// Evicts everything, leaving the window empty at its current tail.
    pub fn drain(&mut self) -> Vec<Arc<Chunk>> {
        self.flush_until(self.tail_id())
    }
}

impl std::fmt::Debug for ChunkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWindow")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64) -> Arc<Chunk> {
        let c = Arc::new(Chunk::new(1, 8));
        c.set_id(ChunkId(id));
        c
    }

    /// Verifies the documented window invariants.
    fn assert_invariants(w: &ChunkWindow) {
        let span = w.tail - w.head;
        assert!(
            (0..=w.capacity() as i64).contains(&span),
            "invariant violated: span {} outside [0, {}]",
            span,
            w.capacity()
        );
        for i in w.head..w.tail {
            if let Some(c) = w.lookup(ChunkId(i)) {
                assert_eq!(c.id(), ChunkId(i), "slot holds chunk with mismatched id");
            }
        }
    }

    #[test]
    fn new_window_is_empty() {
        let w = ChunkWindow::new(4);
        assert_eq!(w.head_id(), ChunkId(0));
        assert_eq!(w.tail_id(), ChunkId(0));
        assert_eq!(w.occupied(), 0);
        assert!(w.lookup(ChunkId(0)).is_none());
        assert_invariants(&w);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = ChunkWindow::new(0);
    }

    #[test]
    fn extend_and_lookup() {
        let mut w = ChunkWindow::new(4);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(2), &mut evicted);
        assert!(evicted.is_empty());
        assert_eq!(w.tail_id(), ChunkId(3));
        assert_eq!(w.head_id(), ChunkId(0));

        w.insert(ChunkId(1), chunk(1));
        assert_eq!(w.lookup(ChunkId(1)).unwrap().id(), ChunkId(1));
        assert!(w.lookup(ChunkId(0)).is_none()); // in window, empty slot
        assert!(w.lookup(ChunkId(3)).is_none()); // beyond tail
        assert_invariants(&w);
    }

    #[test]
    fn extend_past_capacity_evicts_in_order() {
        let mut w = ChunkWindow::new(2);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(1), &mut evicted);
        w.insert(ChunkId(0), chunk(0));
        w.insert(ChunkId(1), chunk(1));

        w.extend_to(ChunkId(3), &mut evicted);
        assert_eq!(
            evicted.iter().map(|c| c.id().as_i64()).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(w.head_id(), ChunkId(2));
        assert_eq!(w.tail_id(), ChunkId(4));
        assert!(w.lookup(ChunkId(0)).is_none());
        assert_invariants(&w);
    }

    #[test]
    fn extend_far_ahead_skips_empty_range() {
        let mut w = ChunkWindow::new(2);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(0), &mut evicted);
        w.insert(ChunkId(0), chunk(0));

        // Jump far beyond the current tail; only the occupied slot comes back.
        w.extend_to(ChunkId(100), &mut evicted);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), ChunkId(0));
        assert_eq!(w.head_id(), ChunkId(99));
        assert_eq!(w.tail_id(), ChunkId(101));
        assert_eq!(w.occupied(), 0);
        assert_invariants(&w);
    }

    #[test]
    fn extend_is_noop_below_tail() {
        let mut w = ChunkWindow::new(4);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(3), &mut evicted);
        let (head, tail) = (w.head_id(), w.tail_id());
        w.extend_to(ChunkId(1), &mut evicted);
        assert_eq!(w.head_id(), head);
        assert_eq!(w.tail_id(), tail);
        assert!(evicted.is_empty());
    }

    #[test]
    fn flush_until_partial() {
        let mut w = ChunkWindow::new(4);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(3), &mut evicted);
        for i in 0..4 {
            w.insert(ChunkId(i), chunk(i));
        }
        let flushed = w.flush_until(ChunkId(2));
        assert_eq!(flushed.iter().map(|c| c.id().as_i64()).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(w.head_id(), ChunkId(2));
        assert_eq!(w.occupied(), 2);
        assert_invariants(&w);
    }

    #[test]
    fn flush_until_clamps_to_tail() {
        let mut w = ChunkWindow::new(2);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(1), &mut evicted);
        w.insert(ChunkId(0), chunk(0));
        let flushed = w.flush_until(ChunkId(50));
        assert_eq!(flushed.len(), 1);
        assert_eq!(w.head_id(), w.tail_id());
        assert_invariants(&w);
    }

    #[test]
    fn flush_until_never_lowers_head() {
        let mut w = ChunkWindow::new(2);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(9), &mut evicted);
        let head = w.head_id();
        let flushed = w.flush_until(ChunkId(0));
        assert!(flushed.is_empty());
        assert_eq!(w.head_id(), head);
    }

    #[test]
    fn drain_returns_everything_ascending() {
        let mut w = ChunkWindow::new(4);
        let mut evicted = Vec::new();
        w.extend_to(ChunkId(6), &mut evicted);
        w.insert(ChunkId(4), chunk(4));
        w.insert(ChunkId(6), chunk(6));
        w.insert(ChunkId(3), chunk(3));
        let drained = w.drain();
        assert_eq!(
            drained.iter().map(|c| c.id().as_i64()).collect::<Vec<_>>(),
            vec![3, 4, 6]
        );
        assert_eq!(w.occupied(), 0);
        assert_eq!(w.head_id(), w.tail_id());
        assert_invariants(&w);
    }

    #[test]
    fn negative_ids_stay_below_initial_head() {
        let w = ChunkWindow::new(4);
        assert!(w.lookup(ChunkId(-1)).is_none());
    }

    #[test]
    fn slot_reuse_across_wraps() {
        let mut w = ChunkWindow::new(2);
        let mut evicted = Vec::new();
        for round in 0..5i64 {
            let id = round * 2;
            w.extend_to(ChunkId(id + 1), &mut evicted);
            w.insert(ChunkId(id), chunk(id));
            w.insert(ChunkId(id + 1), chunk(id + 1));
            assert_invariants(&w);
        }
        // Every displaced chunk came back exactly once, ascending.
        let ids: Vec<i64> = evicted.iter().map(|c| c.id().as_i64()).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }
}

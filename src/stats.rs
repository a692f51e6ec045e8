//! Per-stream reception counters.
//!
//! Counters are plain atomics so the hot path never takes a lock to count;
//! a coherent copy is taken with [`StreamStats::snapshot`]. One instance is
//! owned by each member stream and handed to the allocate/ready callbacks as
//! the batch-stats argument; group-driven deliveries (the stop drain) use a
//! group-owned instance instead.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counter block for one stream (or for the group itself).
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Heaps successfully written into a chunk.
    heaps_placed: AtomicU64,
    /// Heaps the place function discarded or that carried an out-of-range
    /// placement.
    heaps_rejected: AtomicU64,
    /// Heaps whose chunk id had already left the group window.
    heaps_too_old: AtomicU64,
    /// Heaps dropped because the allocate callback produced no chunk.
    heaps_no_chunk: AtomicU64,
    /// Chunk references this stream obtained from the group.
    chunks_acquired: AtomicU64,
    /// Ready-callback invocations attributed to this counter block.
    chunks_delivered: AtomicU64,
}

impl StreamStats {
    pub(crate) fn inc_heaps_placed(&self) {
        self.heaps_placed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_heaps_rejected(&self) {
        self.heaps_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_heaps_too_old(&self) {
        self.heaps_too_old.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_heaps_no_chunk(&self) {
        self.heaps_no_chunk.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_chunks_acquired(&self) {
        self.chunks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_chunks_delivered(&self) {
        self.chunks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            heaps_placed: self.heaps_placed.load(Ordering::Relaxed),
            heaps_rejected: self.heaps_rejected.load(Ordering::Relaxed),
            heaps_too_old: self.heaps_too_old.load(Ordering::Relaxed),
            heaps_no_chunk: self.heaps_no_chunk.load(Ordering::Relaxed),
            chunks_acquired: self.chunks_acquired.load(Ordering::Relaxed),
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`StreamStats`] block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub heaps_placed: u64,
    pub heaps_rejected: u64,
    pub heaps_too_old: u64,
    pub heaps_no_chunk: u64,
    pub chunks_acquired: u64,
    pub chunks_delivered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = StreamStats::default();
        stats.inc_heaps_placed();
        stats.inc_heaps_placed();
        stats.inc_heaps_too_old();
        let snap = stats.snapshot();
        assert_eq!(snap.heaps_placed, 2);
        assert_eq!(snap.heaps_too_old, 1);
        assert_eq!(snap.heaps_rejected, 0);
    }

    #[test]
    fn default_snapshot_is_zero() {
        assert_eq!(StreamStats::default().snapshot(), StatsSnapshot::default());
    }
}

//! Completed heaps and their placement into chunks.
//!
//! Packet parsing and reassembly happen upstream; by the time a heap reaches
//! a member stream it is a finished unit with a counter and a payload. The
//! user-supplied place function maps the counter onto a chunk index, a heap
//! slot, and a byte offset within the chunk payload.

use std::sync::Arc;

use crate::chunk::ChunkId;

/// A logical message reassembled from one or more packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heap {
    /// Monotonically meaningful heap counter.
    pub cnt: i64,
    /// Payload bytes to scatter into the owning chunk.
    pub payload: Vec<u8>,
}

impl Heap {
    /// Convenience constructor.
    #[must_use]
    pub fn new(cnt: i64, payload: Vec<u8>) -> Self {
        Self { cnt, payload }
    }
}

/// Where a heap lands inside the chunk address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Chunk the heap belongs to.
    pub chunk_id: ChunkId,
    /// Presence-flag slot within that chunk.
    pub heap_index: usize,
    /// Byte offset of the payload within the chunk.
    pub offset: usize,
}

/// Maps a heap onto its placement, or `None` to discard the heap.
///
/// Called on the member stream's worker thread for every completed heap, so
/// it should be cheap and must not call back into the group.
pub type PlaceFn = dyn Fn(&Heap) -> Option<Placement> + Send + Sync;

/// Shared handle to a place function.
pub type SharedPlaceFn = Arc<PlaceFn>;

//! braid: a concurrent chunk-window manager for multi-stream chunked
//! telemetry reception.
//!
//! Heaps arrive on several independent member streams; each heap is
//! scatter-written into a large fixed-shape [`Chunk`] selected by a
//! user-supplied place function. A [`ChunkGroup`] coordinates the streams
//! around a small sliding window of chunks under construction: it hands out
//! reference-counted chunks, advances and evicts under a lossy or lossless
//! policy, and delivers each finished chunk exactly once, in strictly
//! ascending id order.
//!
//! [`RingGroup`] layers ring-buffer transport on top: fresh chunks come
//! from a free ring, finished chunks go to a data ring, and shutdown is
//! deadlock-free even when nobody is servicing the rings.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use braid::{Chunk, ChunkGroup, ChunkId, GroupConfig, Heap, Placement, StreamConfig};
//!
//! const HEAPS_PER_CHUNK: i64 = 4;
//! const HEAP_BYTES: usize = 8;
//!
//! let delivered = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&delivered);
//!
//! let mut config = GroupConfig::new();
//! config
//!     .set_allocate(|_id, _stats| {
//!         Some(Arc::new(Chunk::new(
//!             HEAPS_PER_CHUNK as usize,
//!             HEAPS_PER_CHUNK as usize * HEAP_BYTES,
//!         )))
//!     })
//!     .set_ready(move |chunk, _stats| sink.lock().unwrap().push(chunk.id()));
//!
//! let mut group = ChunkGroup::new(&config).unwrap();
//! let mut stream = StreamConfig::new();
//! stream.set_place(|heap: &Heap| {
//!     let index = (heap.cnt % HEAPS_PER_CHUNK) as usize;
//!     Some(Placement {
//!         chunk_id: ChunkId(heap.cnt / HEAPS_PER_CHUNK),
//!         heap_index: index,
//!         offset: index * HEAP_BYTES,
//!     })
//! });
//! let member = group.add_stream(&stream).unwrap();
//!
//! member.push_heap(Heap::new(0, vec![1u8; HEAP_BYTES]));
//! group.stop();
//! assert_eq!(*delivered.lock().unwrap(), vec![ChunkId(0)]);
//! ```

pub mod chunk;
pub mod config;
mod exec;
pub mod group;
pub mod heap;
pub mod ring;
pub mod stats;
pub mod trace;
pub mod window;

pub use chunk::{Chunk, ChunkId};
pub use config::{
    AllocateFn, ConfigError, DEFAULT_MAX_CHUNKS, EvictionMode, GroupConfig, ReadyFn, StreamConfig,
};
pub use group::{ChunkGroup, GroupError, GroupHooks, IdentityHooks, MemberStream};
pub use heap::{Heap, PlaceFn, Placement};
pub use ring::facade::RingGroup;
pub use ring::{ChunkRing, Ring, RingPopError, RingPushError, Timeout};
pub use stats::{StatsSnapshot, StreamStats};
pub use trace::init_tracing;
pub use window::ChunkWindow;

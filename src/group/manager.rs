//! Shared window manager: the per-stream chunk protocol.
//!
//! [`GroupShared`] adapts the chunk window to concurrent member streams.
//! `get_chunk` advances the window on demand, allocates missing chunks
//! under the group mutex, and returns a reference-counted chunk;
//! `release_chunk` drops a reference and, on the last one, lets eligible
//! evicted chunks flow to the ready callback.
//!
//! # Delivery ordering
//!
//! Chunks leave the window from the head forward, so a FIFO of "evicted but
//! not yet reference-free" chunks preserves ascending id order: the front is
//! delivered as soon as its count reaches zero, and everything behind it
//! waits its turn. A monotonic ready cursor double-checks the order on
//! every delivery.
//!
//! # Eviction policy
//!
//! Lossy: eviction never blocks; a chunk with outstanding references parks
//! in the FIFO until its last release. Lossless: the advancing stream first
//! posts asynchronous flushes to every sibling (so their references are
//! guaranteed to drain), then waits on the ready condition until the FIFO
//! is empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use crate::chunk::{Chunk, ChunkId};
use crate::config::{AllocateFn, EvictionMode, ReadyFn};
use crate::group::GroupHooks;
use crate::group::member::MemberInner;
use crate::stats::StreamStats;
use crate::trace::{debug, trace};
use crate::window::ChunkWindow;

/// Outcome of a chunk request.
pub(crate) enum ChunkLookup {
    /// The chunk, with one producer reference taken for the caller.
    Found(Arc<Chunk>),
    /// The id has already left the window; the heap must be dropped.
    TooOld,
    /// The allocate callback produced no chunk; the heap must be dropped.
    NoChunk,
}

/// Mutable group state, all behind the one group mutex.
struct GroupState {
    window: ChunkWindow,
    /// Evicted chunks awaiting their last release, ascending by id.
    pending: VecDeque<Arc<Chunk>>,
    /// Next id allowed to reach the ready callback.
    ready_cursor: i64,
    /// Members that have not yet reported their stop.
    live_streams: usize,
    /// Member registry for flush fan-out. Weak: the group handle owns the
    /// streams, members own the shared state, and this list must not close
    /// that cycle.
    members: Vec<(usize, Weak<MemberInner>)>,
}

/// State shared between the group handle and its member streams.
pub(crate) struct GroupShared {
    pub(crate) max_chunks: usize,
    eviction_mode: EvictionMode,
    allocate: Arc<AllocateFn>,
    ready: Arc<ReadyFn>,
    pub(crate) hooks: Box<dyn GroupHooks>,
    state: Mutex<GroupState>,
    /// Notified whenever a chunk's reference count reaches zero.
    ready_condition: Condvar,
    stopping: AtomicBool,
    /// Counter block attributed to group-driven deliveries (the stop drain).
    group_stats: StreamStats,
}

impl GroupShared {
    pub(crate) fn new(
        max_chunks: usize,
        eviction_mode: EvictionMode,
        allocate: Arc<AllocateFn>,
        ready: Arc<ReadyFn>,
        hooks: Box<dyn GroupHooks>,
    ) -> Self {
        Self {
            max_chunks,
            eviction_mode,
            allocate,
            ready,
            hooks,
            state: Mutex::new(GroupState {
                window: ChunkWindow::new(max_chunks),
                pending: VecDeque::new(),
                ready_cursor: i64::MIN,
                live_streams: 0,
                members: Vec::new(),
            }),
            ready_condition: Condvar::new(),
            stopping: AtomicBool::new(false),
            group_stats: StreamStats::default(),
        }
    }

    pub(crate) fn register_member(&self, stream_id: usize, member: Weak<MemberInner>) {
        let mut state = self.state.lock().unwrap();
        state.members.push((stream_id, member));
        state.live_streams += 1;
        self.hooks.stream_added(stream_id);
    }

    /// Obtains the chunk covering `id` for `stream_id`, advancing the
    /// window if needed. The returned chunk carries one new producer
    /// reference that must be given back through
    /// [`GroupShared::release_chunk`].
    pub(crate) fn get_chunk(
        &self,
        id: ChunkId,
        stream_id: usize,
        stats: &StreamStats,
    ) -> ChunkLookup {
        let mut state = self.state.lock().unwrap();
        if id < state.window.head_id() {
            trace!(stream = stream_id, chunk = %id, "chunk request below window head");
            return ChunkLookup::TooOld;
        }

        let mut evicted = Vec::new();
        state.window.extend_to(id, &mut evicted);
        let advanced = !evicted.is_empty();
        state.pending.extend(evicted);

        let mut chunk = state.window.lookup(id).cloned();
        if chunk.is_none() {
            // Allocation happens under the group mutex by contract; see
            // GroupConfig::set_allocate.
            if let Some(fresh) = (self.allocate)(id, stats) {
                fresh.set_id(id);
                state.window.insert(id, Arc::clone(&fresh));
                chunk = Some(fresh);
            }
        }
        if let Some(c) = &chunk {
            c.acquire();
            stats.inc_chunks_acquired();
        }

        match self.eviction_mode {
            EvictionMode::Lossy => self.deliver_eligible(&mut state, stats),
            EvictionMode::Lossless => {
                // Only the stream whose request advanced the head pays for
                // the wait; a request that evicted nothing returns at once.
                if advanced {
                    // Everything below the new head must drain before this
                    // request completes. The requester released its own old
                    // references before calling in, so only siblings can be
                    // holding any; ask them all to flush.
                    let head = state.window.head_id();
                    Self::post_flush_to_siblings(&state, stream_id, head);
                    state = self.wait_pending_drained(state, stats);
                }
            }
        }
        drop(state);

        match chunk {
            Some(c) => ChunkLookup::Found(c),
            None => {
                debug!(stream = stream_id, chunk = %id, "allocate produced no chunk");
                ChunkLookup::NoChunk
            }
        }
    }

    /// Gives back one producer reference. On the last release the ready
    /// condition is signalled and any eligible evicted chunks are
    /// delivered.
    pub(crate) fn release_chunk(&self, chunk: Arc<Chunk>, stats: &StreamStats) {
        if chunk.release() {
            let mut state = self.state.lock().unwrap();
            self.deliver_eligible(&mut state, stats);
            drop(state);
            self.ready_condition.notify_all();
        }
    }

    /// A member's input has ended. Called while the member's own lock is
    /// held: the single sanctioned member-lock to group-mutex ordering.
    pub(crate) fn stream_stop_received(&self, stream_id: usize) {
        {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.live_streams > 0, "live stream count underflow");
            state.live_streams -= 1;
        }
        self.hooks.stream_stop_received(stream_id);
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.state.lock().unwrap().live_streams
    }

    /// Marks the group as stopping. Returns `true` on the first call.
    pub(crate) fn begin_stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Delivers everything still tracked, in ascending id order. Called
    /// after every member has stopped and released its references.
    pub(crate) fn drain_at_stop(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.live_streams, 0, "stop drain with live streams");
        while let Some(chunk) = state.pending.pop_front() {
            debug_assert_eq!(chunk.ref_count(), 0, "stop drain with outstanding references");
            self.deliver(&mut state, chunk, &self.group_stats);
        }
        for chunk in state.window.drain() {
            debug_assert_eq!(chunk.ref_count(), 0, "stop drain with outstanding references");
            self.deliver(&mut state, chunk, &self.group_stats);
        }
    }

    /// Delivers pending chunks from the front while their reference counts
    /// are zero. Stops at the first live chunk to preserve id order.
    fn deliver_eligible(&self, state: &mut GroupState, stats: &StreamStats) {
        while state.pending.front().is_some_and(|c| c.ref_count() == 0) {
            let chunk = state.pending.pop_front().unwrap();
            self.deliver(state, chunk, stats);
        }
    }

    /// Blocks on the ready condition until the pending queue is empty,
    /// delivering chunks as their references drain.
    fn wait_pending_drained<'a>(
        &self,
        mut state: MutexGuard<'a, GroupState>,
        stats: &StreamStats,
    ) -> MutexGuard<'a, GroupState> {
        loop {
            let front_drained = match state.pending.front() {
                None => break,
                Some(front) => front.ref_count() == 0,
            };
            if front_drained {
                let chunk = state.pending.pop_front().unwrap();
                self.deliver(&mut state, chunk, stats);
            } else {
                state = self.ready_condition.wait(state).unwrap();
            }
        }
        state
    }

    fn deliver(&self, state: &mut GroupState, chunk: Arc<Chunk>, stats: &StreamStats) {
        let id = chunk.id().as_i64();
        debug_assert!(id >= state.ready_cursor, "chunk delivery out of id order");
        state.ready_cursor = id + 1;
        stats.inc_chunks_delivered();
        (self.ready)(chunk, stats);
    }

    fn post_flush_to_siblings(state: &GroupState, requester: usize, until: ChunkId) {
        for (stream_id, member) in &state.members {
            if *stream_id == requester {
                continue;
            }
            if let Some(member) = member.upgrade() {
                member.post_flush(until);
            }
        }
    }
}

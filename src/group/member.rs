//! Member streams: the per-stream side of the group protocol.
//!
//! Each [`MemberStream`] runs a dedicated worker thread fed by a task
//! queue. Completed heaps, flush requests, and the stop signal all arrive
//! as tasks, so everything that touches per-stream state runs on that one
//! thread.
//!
//! # Reference discipline
//!
//! The stream keeps one counted reference per chunk it is contributing to,
//! cached in its own window (same capacity as the group's). The reference
//! is taken on the first heap for a chunk and given back when the stream's
//! window slides past it, on an asynchronous flush, or at stop. Before
//! requesting a chunk that would advance the group head, the stream slides
//! its own window first, so a lossless advance never waits on references
//! the requester itself holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crate::chunk::{Chunk, ChunkId};
use crate::exec::TaskQueue;
use crate::group::manager::{ChunkLookup, GroupShared};
use crate::heap::{Heap, SharedPlaceFn};
use crate::stats::{StatsSnapshot, StreamStats};
use crate::trace::{debug, info, trace, warn};
use crate::window::ChunkWindow;

/// Work items for the stream worker.
enum Task {
    Heap(Heap),
    FlushUntil(ChunkId),
    Stop,
}

/// Per-stream state guarded by the member lock.
struct MemberState {
    /// Outstanding chunk references, one slot per chunk.
    window: ChunkWindow,
    /// Set once `stop_received` has run.
    stopped: bool,
}

/// State shared between the stream handle and its worker thread.
pub(crate) struct MemberInner {
    shared: Arc<GroupShared>,
    stream_id: usize,
    place: SharedPlaceFn,
    tasks: TaskQueue<Task>,
    state: Mutex<MemberState>,
    stats: StreamStats,
    stop_requested: AtomicBool,
}

/// One input stream of a chunk group.
///
/// Created only through the group; the group also owns its shutdown. The
/// handle is cheap to share and all of its methods are thread-safe.
pub struct MemberStream {
    inner: Arc<MemberInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemberStream {
    pub(crate) fn spawn(
        shared: Arc<GroupShared>,
        stream_id: usize,
        place: SharedPlaceFn,
    ) -> Arc<Self> {
        let window = ChunkWindow::new(shared.max_chunks);
        let inner = Arc::new(MemberInner {
            shared,
            stream_id,
            place,
            tasks: TaskQueue::new(),
            state: Mutex::new(MemberState {
                window,
                stopped: false,
            }),
            stats: StreamStats::default(),
            stop_requested: AtomicBool::new(false),
        });
        let worker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name(format!("braid-stream-{stream_id}"))
                .spawn(move || inner.run())
                .expect("failed to spawn stream worker")
        };
        Arc::new(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub(crate) fn inner_weak(&self) -> Weak<MemberInner> {
        Arc::downgrade(&self.inner)
    }

    /// Index of this stream within its group.
    #[must_use]
    pub fn stream_id(&self) -> usize {
        self.inner.stream_id
    }

    /// Submits a completed heap for placement. Heaps arriving after the
    /// stream has been stopped are dropped.
    pub fn push_heap(&self, heap: Heap) {
        if self.inner.stop_requested.load(Ordering::SeqCst) {
            trace!(stream = self.inner.stream_id, cnt = heap.cnt, "heap after stop, dropping");
            return;
        }
        self.inner.tasks.push(Task::Heap(heap));
    }

    /// Asks the worker to release every outstanding chunk reference with an
    /// id below `chunk_id`. Returns immediately; the work happens on the
    /// worker thread. Safe to call from any thread.
    pub fn async_flush_until(&self, chunk_id: ChunkId) {
        self.inner.tasks.push(Task::FlushUntil(chunk_id));
    }

    /// Stops this stream: its outstanding references drain, the group is
    /// informed, and the worker exits. Blocks until the worker has
    /// finished. Idempotent; other members of the group are unaffected.
    pub fn stop(&self) {
        self.request_stop();
        self.join_worker();
    }

    /// First stop phase: fires the pre-stop hook and queues the stop task.
    /// Never blocks, so the group can ask every member to wind down before
    /// any worker is joined.
    pub(crate) fn request_stop(&self) {
        if !self.inner.stop_requested.swap(true, Ordering::SeqCst) {
            self.inner.shared.hooks.stream_pre_stop(self.inner.stream_id);
            self.inner.tasks.push(Task::Stop);
        }
    }

    /// Second stop phase: waits for the worker to exit.
    pub(crate) fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Whether this stream has finished stopping.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().unwrap().stopped
    }

    /// Current reception counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl std::fmt::Debug for MemberStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberStream")
            .field("stream_id", &self.inner.stream_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl MemberInner {
    pub(crate) fn post_flush(&self, until: ChunkId) {
        self.tasks.push(Task::FlushUntil(until));
    }

    fn run(&self) {
        info!(stream = self.stream_id, "stream worker started");
        loop {
            match self.tasks.pop() {
                Task::Heap(heap) => self.handle_heap(heap),
                Task::FlushUntil(id) => self.flush_until(id),
                Task::Stop => {
                    self.stop_received();
                    break;
                }
            }
        }
        info!(stream = self.stream_id, "stream worker exiting");
    }

    fn handle_heap(&self, heap: Heap) {
        let Some(placement) = (self.place)(&heap) else {
            trace!(stream = self.stream_id, cnt = heap.cnt, "place function discarded heap");
            self.stats.inc_heaps_rejected();
            return;
        };
        let Some((chunk, cached)) = self.locate_chunk(placement.chunk_id) else {
            return;
        };

        // Validate the placement against the chunk shape before touching
        // payload memory; a bad place function must not corrupt a chunk.
        let end = placement.offset.checked_add(heap.payload.len());
        if placement.heap_index >= chunk.heap_slots()
            || end.is_none_or(|e| e > chunk.payload_len())
        {
            warn!(
                stream = self.stream_id,
                chunk = %placement.chunk_id,
                heap_index = placement.heap_index,
                offset = placement.offset,
                len = heap.payload.len(),
                "placement outside chunk bounds, dropping heap"
            );
            self.stats.inc_heaps_rejected();
        } else {
            chunk.write(placement.offset, &heap.payload);
            chunk.mark_present(placement.heap_index);
            self.stats.inc_heaps_placed();
            trace!(
                stream = self.stream_id,
                chunk = %placement.chunk_id,
                heap_index = placement.heap_index,
                "heap placed"
            );
        }

        if !cached {
            // One-shot reference for a chunk below this stream's own head.
            self.shared.release_chunk(chunk, &self.stats);
        }
    }

    /// Finds the chunk for `id`, from the stream's own cache when possible,
    /// otherwise from the group. Returns the chunk and whether the counted
    /// reference stays cached in the stream window.
    fn locate_chunk(&self, id: ChunkId) -> Option<(Arc<Chunk>, bool)> {
        {
            let state = self.state.lock().unwrap();
            if let Some(chunk) = state.window.lookup(id) {
                return Some((Arc::clone(chunk), true));
            }
        }

        // Slide our own window before asking the group: a lossless advance
        // must never end up waiting on references we hold ourselves.
        let displaced = {
            let mut state = self.state.lock().unwrap();
            let mut displaced = Vec::new();
            state.window.extend_to(id, &mut displaced);
            displaced
        };
        for old in displaced {
            self.shared.release_chunk(old, &self.stats);
        }

        match self.shared.get_chunk(id, self.stream_id, &self.stats) {
            ChunkLookup::Found(chunk) => {
                let mut state = self.state.lock().unwrap();
                let in_window =
                    state.window.head_id() <= id && id < state.window.tail_id();
                if in_window {
                    state.window.insert(id, Arc::clone(&chunk));
                }
                Some((chunk, in_window))
            }
            ChunkLookup::TooOld => {
                self.stats.inc_heaps_too_old();
                None
            }
            ChunkLookup::NoChunk => {
                self.stats.inc_heaps_no_chunk();
                None
            }
        }
    }

    /// Releases every cached reference with an id below `until`.
    fn flush_until(&self, until: ChunkId) {
        let released = self.state.lock().unwrap().window.flush_until(until);
        if !released.is_empty() {
            debug!(
                stream = self.stream_id,
                until = %until,
                count = released.len(),
                "flushing chunk references"
            );
        }
        for chunk in released {
            self.shared.release_chunk(chunk, &self.stats);
        }
    }

    /// Terminal transition, run exactly once on the worker. Outstanding
    /// references drain and the group is informed while the member lock is
    /// held; this is the one place that takes the group mutex under it.
    fn stop_received(&self) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        state.stopped = true;
        for chunk in state.window.drain() {
            self.shared.release_chunk(chunk, &self.stats);
        }
        self.shared.stream_stop_received(self.stream_id);
    }
}

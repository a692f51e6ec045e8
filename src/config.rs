//! Group and stream configuration.
//!
//! Configuration errors surface here, at construction time; the reception
//! hot path has no error channel. Callback contracts that cannot be
//! expressed in types are documented on the setters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::{Chunk, ChunkId};
use crate::heap::{PlaceFn, SharedPlaceFn};
use crate::stats::StreamStats;

/// Default window capacity.
pub const DEFAULT_MAX_CHUNKS: usize = 2;

/// Error raised while building a group or stream configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The window must hold at least one chunk.
    #[error("max_chunks must be at least 1")]
    ZeroMaxChunks,
    /// A stream cannot place heaps without a place function.
    #[error("stream config requires a place function")]
    MissingPlace,
    /// The group cannot allocate chunks without an allocate callback.
    #[error("group config requires an allocate callback")]
    MissingAllocate,
    /// The group cannot deliver chunks without a ready callback.
    #[error("group config requires a ready callback")]
    MissingReady,
}

/// What happens to a chunk that must leave the window while producer
/// references are still outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionMode {
    /// Evict immediately; stragglers keep writing into the orphaned chunk
    /// and it is delivered when the last reference drops.
    #[default]
    Lossy,
    /// Block the advancing stream until every reference to the evicted
    /// chunk has been released, fanning out asynchronous flushes to the
    /// other members so the wait always makes progress.
    Lossless,
}

/// Produces a fresh chunk for a newly exposed window slot, or `None` to
/// drop the triggering heap.
pub type AllocateFn = dyn Fn(ChunkId, &StreamStats) -> Option<Arc<Chunk>> + Send + Sync;

/// Consumes a fully reconciled chunk. Invoked exactly once per chunk, in
/// strictly ascending id order within a group.
pub type ReadyFn = dyn Fn(Arc<Chunk>, &StreamStats) + Send + Sync;

/// Group-wide configuration: window capacity, eviction policy, and the two
/// chunk lifecycle callbacks.
pub struct GroupConfig {
    max_chunks: usize,
    eviction_mode: EvictionMode,
    allocate: Option<Arc<AllocateFn>>,
    ready: Option<Arc<ReadyFn>>,
}

impl GroupConfig {
    /// Starts from the defaults: a window of [`DEFAULT_MAX_CHUNKS`] chunks,
    /// lossy eviction, and no callbacks installed yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_chunks: DEFAULT_MAX_CHUNKS,
            eviction_mode: EvictionMode::default(),
            allocate: None,
            ready: None,
        }
    }

    /// Sets the maximum number of chunks live at the same time. A value of
    /// 1 means heaps must arrive in chunk order: once a chunk is started,
    /// no heap from an earlier chunk is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMaxChunks`] for 0.
    pub fn set_max_chunks(&mut self, max_chunks: usize) -> Result<&mut Self, ConfigError> {
        if max_chunks == 0 {
            return Err(ConfigError::ZeroMaxChunks);
        }
        self.max_chunks = max_chunks;
        Ok(self)
    }

    /// Window capacity.
    #[must_use]
    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    /// Sets the eviction policy.
    pub fn set_eviction_mode(&mut self, mode: EvictionMode) -> &mut Self {
        self.eviction_mode = mode;
        self
    }

    /// Current eviction policy.
    #[must_use]
    pub fn eviction_mode(&self) -> EvictionMode {
        self.eviction_mode
    }

    /// Installs the allocate callback.
    ///
    /// The callback runs while the group mutex is held: it must not call
    /// back into the group and must not block on work that itself needs the
    /// group. Blocking on an external source that is guaranteed to be woken
    /// at shutdown (a free ring, for example) is acceptable.
    pub fn set_allocate<F>(&mut self, allocate: F) -> &mut Self
    where
        F: Fn(ChunkId, &StreamStats) -> Option<Arc<Chunk>> + Send + Sync + 'static,
    {
        self.allocate = Some(Arc::new(allocate));
        self
    }

    /// Installs the ready callback.
    ///
    /// Also runs under the group mutex; the same reentrancy rules as
    /// [`GroupConfig::set_allocate`] apply.
    pub fn set_ready<F>(&mut self, ready: F) -> &mut Self
    where
        F: Fn(Arc<Chunk>, &StreamStats) + Send + Sync + 'static,
    {
        self.ready = Some(Arc::new(ready));
        self
    }

    /// Validates that both callbacks are installed and hands them out.
    pub(crate) fn callbacks(&self) -> Result<(Arc<AllocateFn>, Arc<ReadyFn>), ConfigError> {
        let allocate = self.allocate.clone().ok_or(ConfigError::MissingAllocate)?;
        let ready = self.ready.clone().ok_or(ConfigError::MissingReady)?;
        Ok((allocate, ready))
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GroupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupConfig")
            .field("max_chunks", &self.max_chunks)
            .field("eviction_mode", &self.eviction_mode)
            .field("allocate", &self.allocate.is_some())
            .field("ready", &self.ready.is_some())
            .finish()
    }
}

/// Per-stream configuration. The place function is mandatory; a stream
/// without one cannot be added to a group.
#[derive(Default, Clone)]
pub struct StreamConfig {
    place: Option<SharedPlaceFn>,
}

impl StreamConfig {
    /// Starts from an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the place function.
    pub fn set_place<F>(&mut self, place: F) -> &mut Self
    where
        F: Fn(&crate::heap::Heap) -> Option<crate::heap::Placement> + Send + Sync + 'static,
    {
        self.place = Some(Arc::new(place));
        self
    }

    /// Validates that a place function is installed and hands it out.
    pub(crate) fn place(&self) -> Result<Arc<PlaceFn>, ConfigError> {
        self.place.clone().ok_or(ConfigError::MissingPlace)
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("place", &self.place.is_some())
            .finish()
    }
}

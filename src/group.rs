//! Multi-stream chunk group.
//!
//! A [`ChunkGroup`] owns a sliding window of chunks under construction and a
//! set of member streams that share it. Any member may ask for the chunk
//! covering a given id; the group advances the window on demand, hands out
//! counted references, and delivers each finished chunk to the ready
//! callback exactly once, in strictly ascending id order.
//!
//! # Architecture
//!
//! - [`manager`] holds the shared state: the window, the pending-eviction
//!   queue, the ready cursor, and the group mutex + condition variable.
//! - [`member`] runs one worker thread per stream, fed by a task queue;
//!   heaps, flush requests, and stop all arrive as tasks.
//! - [`GroupHooks`] is the extension surface for transport facades: the
//!   ring facade registers data-ring producers and stops rings from it, the
//!   default [`IdentityHooks`] does nothing.
//!
//! # Locking
//!
//! One mutex guards all group state. It is held across the allocate and
//! ready callbacks (documented on their setters) and never while touching a
//! member's own lock, with one exception: a stopping member informs the
//! group while holding its own lock, once, on its way out.

pub(crate) mod manager;
pub(crate) mod member;

use std::ops::Index;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, GroupConfig, StreamConfig};
use crate::trace::info;

pub use member::MemberStream;

use manager::GroupShared;

/// Error raised by group-level operations.
#[derive(Debug, Error)]
pub enum GroupError {
    /// The group has been stopped; no new streams may be added.
    #[error("group has been stopped")]
    Stopped,
    /// An invalid group or stream configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Membership lifecycle notifications.
///
/// Installed into the group at construction; a transport facade implements
/// these to track producers and wind down shared resources. All methods
/// default to no-ops.
pub trait GroupHooks: Send + Sync {
    /// A stream was added. Called while the group mutex is held.
    fn stream_added(&self, stream_id: usize) {
        let _ = stream_id;
    }

    /// A stream's input has ended, voluntarily or not. Called once per
    /// stream, while that stream's own lock is held.
    fn stream_stop_received(&self, stream_id: usize) {
        let _ = stream_id;
    }

    /// A stream is about to be stopped by the user. Called before the
    /// stream shuts down, outside any lock.
    fn stream_pre_stop(&self, stream_id: usize) {
        let _ = stream_id;
    }
}

/// Hooks that do nothing; used when the group runs without a facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHooks;

impl GroupHooks for IdentityHooks {}

/// A collection of member streams sharing one chunk window.
///
/// The group owns its streams: they are created through
/// [`ChunkGroup::add_stream`] and shut down by [`ChunkGroup::stop`] (or by
/// dropping the group). Public methods must be serialized by the caller;
/// the heavy lifting on the reception path happens on the member workers.
pub struct ChunkGroup {
    shared: Arc<GroupShared>,
    streams: Vec<Arc<MemberStream>>,
}

impl ChunkGroup {
    /// Builds a group from `config` with no-op hooks.
    ///
    /// # Errors
    ///
    /// Fails if the allocate or ready callback is missing.
    pub fn new(config: &GroupConfig) -> Result<Self, ConfigError> {
        Self::with_hooks(config, IdentityHooks)
    }

    /// Builds a group with the given membership hooks.
    ///
    /// # Errors
    ///
    /// Fails if the allocate or ready callback is missing.
    pub fn with_hooks(
        config: &GroupConfig,
        hooks: impl GroupHooks + 'static,
    ) -> Result<Self, ConfigError> {
        let (allocate, ready) = config.callbacks()?;
        let shared = Arc::new(GroupShared::new(
            config.max_chunks(),
            config.eviction_mode(),
            allocate,
            ready,
            Box::new(hooks),
        ));
        Ok(Self {
            shared,
            streams: Vec::new(),
        })
    }

    /// Adds a member stream and starts its worker.
    ///
    /// Streams may only be added while no member is receiving; concurrent
    /// addition and reception is not supported.
    ///
    /// # Errors
    ///
    /// Fails if the stream config lacks a place function or the group has
    /// already been stopped.
    pub fn add_stream(&mut self, config: &StreamConfig) -> Result<Arc<MemberStream>, GroupError> {
        if self.shared.is_stopping() {
            return Err(GroupError::Stopped);
        }
        let place = config.place()?;
        let stream_id = self.streams.len();
        let stream = MemberStream::spawn(Arc::clone(&self.shared), stream_id, place);
        self.shared.register_member(stream_id, stream.inner_weak());
        self.streams.push(Arc::clone(&stream));
        Ok(stream)
    }

    /// Number of member streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the group has any streams.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// The stream at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&MemberStream> {
        self.streams.get(index).map(|s| s.as_ref())
    }

    /// Iterates over the member streams in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MemberStream> {
        self.streams.iter().map(|s| s.as_ref())
    }

    /// Number of members that have not yet reported their stop.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.shared.live_streams()
    }

    /// Stops every member stream and flushes the window.
    ///
    /// Remaining chunks are delivered to the ready callback in ascending id
    /// order. Idempotent: the second and later calls do nothing, and every
    /// chunk reaches the ready callback exactly once.
    pub fn stop(&mut self) {
        if !self.shared.begin_stop() {
            return;
        }
        info!(streams = self.streams.len(), "stopping chunk group");
        // Two passes: every member gets its pre-stop hook and stop task
        // before any worker is joined, so no member's shutdown can depend
        // on a hook that a later member has not received yet.
        for stream in &self.streams {
            stream.request_stop();
        }
        for stream in &self.streams {
            stream.join_worker();
        }
        self.shared.drain_at_stop();
    }
}

impl Index<usize> for ChunkGroup {
    type Output = MemberStream;

    fn index(&self, index: usize) -> &MemberStream {
        &self.streams[index]
    }
}

impl Drop for ChunkGroup {
    fn drop(&mut self) {
        self.stop();
    }
}

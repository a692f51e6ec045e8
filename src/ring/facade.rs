//! Ring-buffer facade over the chunk group.
//!
//! [`RingGroup`] replaces the allocate/ready callbacks with ring traffic:
//! fresh chunks are popped from a *free ring* and finished chunks are
//! pushed to a *data ring*. Both rings may be shared between groups that
//! start and stop together.
//!
//! Stopping any one member stream stops both rings, so a caller that has
//! stopped servicing them can never deadlock the group. Chunks that become
//! ready after the data ring has stopped are parked in a graveyard and
//! dropped by [`RingGroup::stop`] on the calling thread, for chunk types
//! whose teardown must happen in a specific thread context.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::chunk::Chunk;
use crate::config::{ConfigError, GroupConfig};
use crate::group::{ChunkGroup, GroupHooks};
use crate::ring::{ChunkRing, Timeout};
use crate::trace::debug;

/// Membership hooks that tie the rings to the group lifecycle.
struct RingHooks {
    data_ring: Arc<ChunkRing>,
    free_ring: Arc<ChunkRing>,
}

impl GroupHooks for RingHooks {
    fn stream_added(&self, _stream_id: usize) {
        self.data_ring.add_producer();
    }

    fn stream_stop_received(&self, _stream_id: usize) {
        self.data_ring.remove_producer();
    }

    fn stream_pre_stop(&self, _stream_id: usize) {
        // The first member to stop takes both rings down, waking consumers
        // blocked on the data ring and producers blocked on the free ring.
        self.data_ring.stop();
        self.free_ring.stop();
    }
}

/// A chunk group fed and drained through ring buffers.
///
/// Dereferences to [`ChunkGroup`] for stream management.
pub struct RingGroup {
    group: ChunkGroup,
    data_ring: Arc<ChunkRing>,
    free_ring: Arc<ChunkRing>,
    graveyard: Arc<Mutex<Vec<Arc<Chunk>>>>,
}

impl RingGroup {
    /// Builds a group whose allocate/ready callbacks are replaced by ring
    /// traffic. Callbacks already present in `config` are overridden.
    ///
    /// # Errors
    ///
    /// Never fails on callbacks (the facade installs both); propagates any
    /// other configuration error.
    pub fn new(
        mut config: GroupConfig,
        data_ring: Arc<ChunkRing>,
        free_ring: Arc<ChunkRing>,
    ) -> Result<Self, ConfigError> {
        let graveyard = Arc::new(Mutex::new(Vec::new()));
        {
            let free_ring = Arc::clone(&free_ring);
            // Blocking here is legal: stream_pre_stop stops the free ring
            // before anything joins on the member workers.
            config.set_allocate(move |_id, _stats| free_ring.pop(Timeout::Infinite).ok());
        }
        {
            let data_ring = Arc::clone(&data_ring);
            let graveyard = Arc::clone(&graveyard);
            config.set_ready(move |chunk, _stats| {
                if let Err(err) = data_ring.push(chunk, Timeout::Infinite) {
                    // Ring already stopped; park the chunk until the thread
                    // calling stop() releases it.
                    debug!("data ring stopped, diverting chunk to graveyard");
                    graveyard.lock().unwrap().push(err.into_inner());
                }
            });
        }
        let hooks = RingHooks {
            data_ring: Arc::clone(&data_ring),
            free_ring: Arc::clone(&free_ring),
        };
        let group = ChunkGroup::with_hooks(&config, hooks)?;
        Ok(Self {
            group,
            data_ring,
            free_ring,
            graveyard,
        })
    }

    /// Ring carrying finished chunks to the consumer.
    #[must_use]
    pub fn data_ring(&self) -> &Arc<ChunkRing> {
        &self.data_ring
    }

    /// Ring supplying recyclable chunks.
    #[must_use]
    pub fn free_ring(&self) -> &Arc<ChunkRing> {
        &self.free_ring
    }

    /// Number of chunks currently parked in the graveyard.
    #[must_use]
    pub fn graveyard_len(&self) -> usize {
        self.graveyard.lock().unwrap().len()
    }

    /// Stops the rings and the group, then releases the graveyard on this
    /// thread. Idempotent.
    pub fn stop(&mut self) {
        // Stopping the first member stream would do this too, but a group
        // with no members still needs its rings stopped.
        self.data_ring.stop();
        self.free_ring.stop();
        self.group.stop();
        let late = std::mem::take(&mut *self.graveyard.lock().unwrap());
        drop(late);
    }
}

impl Deref for RingGroup {
    type Target = ChunkGroup;

    fn deref(&self) -> &ChunkGroup {
        &self.group
    }
}

impl DerefMut for RingGroup {
    fn deref_mut(&mut self) -> &mut ChunkGroup {
        &mut self.group
    }
}

impl Drop for RingGroup {
    fn drop(&mut self) {
        self.stop();
    }
}

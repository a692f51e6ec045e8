//! Bounded blocking ring buffers for chunk transport.
//!
//! [`Ring`] moves owned items between threads with back-pressure: producers
//! block while the ring is full, consumers block while it is empty. Unlike
//! the wait-free queues used inside a single pipeline, these rings are
//! shared across many producer and consumer threads and support *stopping*:
//! once stopped, blocked producers fail fast, while consumers may drain
//! whatever is already buffered before seeing the stop.
//!
//! Producers can be registered with [`Ring::add_producer`]; when the last
//! registered producer deregisters, the ring stops itself. A group uses this
//! so that the data ring winds down exactly when its member streams do.
//!
//! # Example
//!
//! ```
//! use braid::ring::{Ring, Timeout};
//!
//! let ring: Ring<u64> = Ring::new(4);
//! ring.push(7, Timeout::Infinite).unwrap();
//! assert_eq!(ring.pop(Timeout::Infinite).unwrap(), 7);
//! ```

pub mod facade;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use crate::chunk::Chunk;

/// Ring of recyclable or readied chunks, shareable across groups.
pub type ChunkRing = Ring<Arc<Chunk>>;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl Timeout {
    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Some(Instant::now() + d),
        }
    }
}

/// Error returned from a failed push. The rejected item is carried back to
/// the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingPushError<T> {
    /// The ring stayed full for the whole timeout.
    #[error("ring is full")]
    Full(T),
    /// The ring has been stopped.
    #[error("ring is stopped")]
    Stopped(T),
}

impl<T> RingPushError<T> {
    /// Recovers the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Stopped(item) => item,
        }
    }
}

/// Error returned from a failed pop.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingPopError {
    /// The ring stayed empty for the whole timeout.
    #[error("ring is empty")]
    Empty,
    /// The ring has been stopped and fully drained.
    #[error("ring is stopped and drained")]
    Stopped,
}

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
    producers: usize,
}

/// Bounded blocking MPMC ring with stop semantics.
pub struct Ring<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    data_available: Condvar,
    space_available: Condvar,
}

impl<T> Ring<T> {
    /// Creates an empty ring.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Ring capacity must be > 0");
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
                producers: 0,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
        }
    }

    /// Ring capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Whether the ring is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the ring has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Attempts to push without blocking.
    ///
    /// # Errors
    ///
    /// Returns the item back on a full or stopped ring.
    pub fn try_push(&self, item: T) -> Result<(), RingPushError<T>> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(RingPushError::Stopped(item));
        }
        if state.items.len() >= self.capacity {
            return Err(RingPushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.data_available.notify_one();
        Ok(())
    }

    /// Pushes an item, blocking while the ring is full.
    ///
    /// # Errors
    ///
    /// Returns [`RingPushError::Stopped`] if the ring is stopped before
    /// space appears, or [`RingPushError::Full`] when the timeout elapses.
    pub fn push(&self, item: T, timeout: Timeout) -> Result<(), RingPushError<T>> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return Err(RingPushError::Stopped(item));
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                drop(state);
                self.data_available.notify_one();
                return Ok(());
            }
            match deadline {
                None => state = self.space_available.wait(state).unwrap(),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(RingPushError::Full(item));
                    }
                    let (next, _) = self.space_available.wait_timeout(state, dl - now).unwrap();
                    state = next;
                }
            }
        }
    }

    /// Attempts to pop without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`RingPopError::Empty`] if nothing is buffered, or
    /// [`RingPopError::Stopped`] once the ring is stopped *and* drained.
    pub fn try_pop(&self) -> Result<T, RingPopError> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.items.pop_front() {
            drop(state);
            self.space_available.notify_one();
            return Ok(item);
        }
        if state.stopped {
            Err(RingPopError::Stopped)
        } else {
            Err(RingPopError::Empty)
        }
    }

    /// Pops an item, blocking while the ring is empty.
    ///
    /// Items buffered before a stop are still handed out; only an empty,
    /// stopped ring reports [`RingPopError::Stopped`].
    ///
    /// # Errors
    ///
    /// [`RingPopError::Empty`] when the timeout elapses first.
    pub fn pop(&self, timeout: Timeout) -> Result<T, RingPopError> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.space_available.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(RingPopError::Stopped);
            }
            match deadline {
                None => state = self.data_available.wait(state).unwrap(),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(RingPopError::Empty);
                    }
                    let (next, _) = self.data_available.wait_timeout(state, dl - now).unwrap();
                    state = next;
                }
            }
        }
    }

    /// Stops the ring, waking every blocked producer and consumer. Returns
    /// `true` if this call performed the stop.
    pub fn stop(&self) -> bool {
        let newly = {
            let mut state = self.state.lock().unwrap();
            !std::mem::replace(&mut state.stopped, true)
        };
        if newly {
            self.data_available.notify_all();
            self.space_available.notify_all();
        }
        newly
    }

    /// Registers a producer. The ring stops itself when the last registered
    /// producer deregisters.
    pub fn add_producer(&self) {
        self.state.lock().unwrap().producers += 1;
    }

    /// Deregisters a producer, stopping the ring if it was the last one.
    pub fn remove_producer(&self) {
        let stop = {
            let mut state = self.state.lock().unwrap();
            debug_assert!(state.producers > 0, "producer count underflow");
            state.producers -= 1;
            state.producers == 0
        };
        if stop {
            self.stop();
        }
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Ring")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("stopped", &state.stopped)
            .field("producers", &state.producers)
            .finish()
    }
}

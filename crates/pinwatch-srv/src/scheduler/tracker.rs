//! In-flight and priority bookkeeping.
//!
//! Both sets live behind one mutex so that a key's in-flight mark and its
//! priority entry change together. No I/O happens while the lock is held.

use pinwatch_core::ServerKey;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedSemaphorePermit;

/// Why a priority request was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityRejected {
    /// The priority set is at capacity
    Full,
    /// The scheduler is shutting down
    Stopped,
    /// The key is not in the current metadata
    Unknown,
}

impl fmt::Display for PriorityRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "priority queue is full"),
            Self::Stopped => write!(f, "scheduler is stopped"),
            Self::Unknown => write!(f, "server is not in metadata"),
        }
    }
}

impl std::error::Error for PriorityRejected {}

#[derive(Debug, Default)]
struct State {
    in_flight: HashSet<ServerKey>,
    /// Request order, no duplicates
    priority: Vec<ServerKey>,
    stopped: bool,
}

#[derive(Debug)]
pub(crate) struct Tracker {
    state: Mutex<State>,
    capacity: usize,
}

impl Tracker {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` for an early check. Returns true if it was newly added.
    pub(crate) fn request_priority(&self, key: ServerKey) -> Result<bool, PriorityRejected> {
        let mut state = self.lock();
        if state.stopped {
            return Err(PriorityRejected::Stopped);
        }
        if state.priority.contains(&key) {
            return Ok(false);
        }
        if state.priority.len() >= self.capacity {
            return Err(PriorityRejected::Full);
        }
        state.priority.push(key);
        Ok(true)
    }

    pub(crate) fn priority_keys(&self) -> Vec<ServerKey> {
        self.lock().priority.clone()
    }

    pub(crate) fn priority_len(&self) -> usize {
        self.lock().priority.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Check-and-set: mark `key` in flight unless it already is.
    pub(crate) fn try_mark(&self, key: &ServerKey) -> bool {
        self.lock().in_flight.insert(key.clone())
    }

    /// Undo [`Tracker::try_mark`] for a probe that never started.
    pub(crate) fn unmark(&self, key: &ServerKey) {
        self.lock().in_flight.remove(key);
    }

    /// A probe for `key` finished: clear its mark and its priority entry.
    fn complete(&self, key: &ServerKey) {
        let mut state = self.lock();
        state.in_flight.remove(key);
        state.priority.retain(|queued| queued != key);
    }

    /// Drop priority entries `keep` rejects. Returns how many were dropped.
    pub(crate) fn retain_priority<F>(&self, keep: F) -> usize
    where
        F: Fn(&ServerKey) -> bool,
    {
        let mut state = self.lock();
        let before = state.priority.len();
        state.priority.retain(|key| keep(key));
        before - state.priority.len()
    }

    pub(crate) fn stop(&self) {
        self.lock().stopped = true;
    }
}

/// Held by a running probe. Dropping it releases the probe slot and clears
/// the key's in-flight mark and priority entry.
pub(crate) struct InFlightGuard {
    tracker: Arc<Tracker>,
    key: ServerKey,
    _permit: OwnedSemaphorePermit,
}

impl InFlightGuard {
    pub(crate) fn new(tracker: Arc<Tracker>, key: ServerKey, permit: OwnedSemaphorePermit) -> Self {
        Self {
            tracker,
            key,
            _permit: permit,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.complete(&self.key);
    }
}

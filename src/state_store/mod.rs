//! State Store - the authoritative in-memory state document
//!
//! All reads and writes go through one mutex. Lock hold time is bounded by
//! the cost of cloning the document; nothing performs I/O while holding it.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::types::{Revision, SharedState, StatePatch};

/// Process-wide store (initialized once by the server binary)
static STATE_STORE: OnceLock<Arc<StateStore>> = OnceLock::new();

/// Read side of the store, as seen by stream endpoints
pub trait StateSource: Send + Sync {
    /// Independent copy of the current state
    fn snapshot(&self) -> SharedState;
}

/// Holder of the single mutable state document
#[derive(Debug, Default)]
pub struct StateStore {
    state: Mutex<SharedState>,
}

impl StateStore {
    /// Create a store holding the default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with an explicit state
    pub fn with_state(state: SharedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Get a deep copy of the current state
    pub fn get(&self) -> SharedState {
        self.state.lock().clone()
    }

    /// Merge `patch` and return the state as it is right after this merge.
    ///
    /// Version is bumped even for an empty patch so every call yields a
    /// distinct, orderable snapshot.
    pub fn update(&self, patch: StatePatch) -> SharedState {
        let mut state = self.state.lock();
        state.apply(patch);
        state.version += 1;
        state.clone()
    }

    /// Read-modify-write the live state under the lock.
    ///
    /// `f` must not block or perform I/O.
    pub fn update_with<F>(&self, f: F) -> SharedState
    where
        F: FnOnce(&mut SharedState),
    {
        let mut state = self.state.lock();
        let Revision { epoch, version } = state.revision();
        f(&mut state);
        state.epoch = epoch;
        state.version = version + 1;
        state.clone()
    }

    /// Restore defaults, as a process restart would.
    ///
    /// The version restarts at 0 in a new epoch, so the reset state never
    /// shares a revision with anything served before it.
    pub fn reset(&self) -> SharedState {
        let mut state = self.state.lock();
        *state = SharedState {
            epoch: state.epoch + 1,
            ..SharedState::default()
        };
        state.clone()
    }

    /// Current version without copying the document
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn revision(&self) -> Revision {
        self.state.lock().revision()
    }
}

impl StateSource for StateStore {
    fn snapshot(&self) -> SharedState {
        self.get()
    }
}

/// Initialize the global store (call once at startup)
pub fn init_state_store() -> Arc<StateStore> {
    STATE_STORE
        .get_or_init(|| Arc::new(StateStore::new()))
        .clone()
}

/// Get the global store (returns None if not initialized)
pub fn get_state_store() -> Option<Arc<StateStore>> {
    STATE_STORE.get().cloned()
}

//! Shared application state for the HTTP layer

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::broadcaster::{Broadcaster, PublishReport};
use crate::state_store::{StateSource, StateStore};
use crate::types::{SharedState, StateEvent, StatePatch};

/// Default idle interval before a keepalive frame is sent
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Couples the state store with the broadcaster so that every write is
/// published in the order it was applied.
pub struct SyncHub {
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    /// Serializes update + publish across concurrent writers
    write_order: Mutex<()>,
    keepalive: Duration,
}

impl SyncHub {
    /// Create a hub with a fresh default store
    pub fn new(mailbox_capacity: usize) -> Self {
        Self::with_store(Arc::new(StateStore::new()), mailbox_capacity)
    }

    /// Create a hub around an existing store (e.g. the process-wide one)
    pub fn with_store(store: Arc<StateStore>, mailbox_capacity: usize) -> Self {
        Self {
            store,
            broadcaster: Arc::new(Broadcaster::new(mailbox_capacity)),
            write_order: Mutex::new(()),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    /// Override the stream keepalive interval
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn keepalive(&self) -> Duration {
        self.keepalive
    }

    /// The store as a read-only source for stream endpoints
    pub fn source(&self) -> Arc<dyn StateSource> {
        self.store.clone()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SharedState {
        self.store.get()
    }

    /// Merge a patch and publish the resulting snapshot
    pub fn apply(&self, patch: StatePatch) -> Result<(SharedState, PublishReport), serde_json::Error> {
        self.apply_with(move |state| {
            state.apply(patch);
        })
    }

    /// Read-modify-write the state and publish the result.
    ///
    /// Only in-memory work happens while the write-order lock is held:
    /// the merge, one serialization, and non-blocking enqueues.
    pub fn apply_with<F>(&self, f: F) -> Result<(SharedState, PublishReport), serde_json::Error>
    where
        F: FnOnce(&mut SharedState),
    {
        let _order = self.write_order.lock();
        let snapshot = self.store.update_with(f);
        let event = StateEvent::update(&snapshot)?;
        let report = self.broadcaster.publish(event);

        debug!(
            version = snapshot.version,
            delivered = report.delivered,
            evicted = report.evicted,
            "state update published"
        );
        Ok((snapshot, report))
    }

    /// Reset the store to defaults and tell every subscriber
    pub fn reset(&self) -> Result<SharedState, serde_json::Error> {
        let _order = self.write_order.lock();
        let snapshot = self.store.reset();
        self.broadcaster.publish(StateEvent::snapshot(&snapshot)?);
        Ok(snapshot)
    }

    /// Release every subscriber so open streams can close
    pub fn shutdown(&self) {
        self.broadcaster.shutdown();
    }
}

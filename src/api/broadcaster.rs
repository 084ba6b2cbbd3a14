//! State event broadcaster
//!
//! Fans each published event out to a registry of per-connection mailboxes.
//!
//! # Design
//!
//! Every subscriber owns a bounded mailbox. `publish` copies the registry
//! under the lock, releases it, then does a non-blocking enqueue into each
//! mailbox. A subscriber whose mailbox is full is evicted instead of being
//! waited on, so memory stays bounded by `capacity * live subscribers`
//! and the writer never blocks. Evicted clients resynchronize from the
//! snapshot they receive when they reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::types::StateEvent;

/// Default number of pending events a subscriber may hold
pub const DEFAULT_MAILBOX_CAPACITY: usize = 5;

/// Registry key of one subscriber
pub type SubscriberId = u64;

type Mailbox = mpsc::Sender<Arc<StateEvent>>;

/// Registry of subscriber mailboxes
pub struct Broadcaster {
    registry: Mutex<HashMap<SubscriberId, Mailbox>>,
    next_id: AtomicU64,
    capacity: usize,
    published: AtomicU64,
    evicted: AtomicU64,
    closed: AtomicBool,
}

/// Receiving end of one subscriber's mailbox
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    mailbox: mpsc::Receiver<Arc<StateEvent>>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event; `None` once the subscriber has been
    /// unregistered and its mailbox drained.
    pub async fn recv(&mut self) -> Option<Arc<StateEvent>> {
        self.mailbox.recv().await
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<Arc<StateEvent>> {
        self.mailbox.try_recv().ok()
    }
}

/// A subscriber registration released when dropped.
///
/// Dropping happens on every exit path of the owning task, including
/// cancellation when the client goes away.
pub struct Subscription {
    broadcaster: Arc<Broadcaster>,
    handle: SubscriberHandle,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.handle.id
    }

    pub async fn recv(&mut self) -> Option<Arc<StateEvent>> {
        self.handle.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.broadcaster.unsubscribe(self.handle.id) {
            debug!(subscriber = self.handle.id, "subscription released");
        }
    }
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Counters exposed by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub mailbox_capacity: usize,
    pub published: u64,
    pub evicted: u64,
}

impl Broadcaster {
    /// Create a broadcaster whose mailboxes hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a new subscriber with an empty mailbox.
    ///
    /// After `shutdown` the returned handle is already closed.
    pub fn subscribe(&self) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        {
            let mut registry = self.registry.lock();
            // Checked under the lock so shutdown cannot miss this entry
            if !self.closed.load(Ordering::Acquire) {
                registry.insert(id, tx);
            }
        }

        debug!(subscriber = id, "subscriber registered");
        SubscriberHandle { id, mailbox: rx }
    }

    /// Register a subscriber that unregisters itself when dropped
    pub fn subscribe_scoped(self: &Arc<Self>) -> Subscription {
        Subscription {
            broadcaster: Arc::clone(self),
            handle: self.subscribe(),
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.registry.lock().remove(&id).is_some()
    }

    /// Offer `event` to every live subscriber without blocking
    pub fn publish(&self, event: StateEvent) -> PublishReport {
        let event = Arc::new(event);
        let targets: Vec<(SubscriberId, Mailbox)> = self
            .registry
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = PublishReport::default();
        for (id, tx) in targets {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if self.unsubscribe(id) {
                        report.evicted += 1;
                        warn!(
                            subscriber = id,
                            capacity = self.capacity,
                            version = event.version,
                            "mailbox full, evicting slow subscriber"
                        );
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    // Receiver already gone; the scoped release will race us here
                    self.unsubscribe(id);
                }
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        self.evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        report
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            mailbox_capacity: self.capacity,
            published: self.published.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Drop every registration and refuse new ones.
    ///
    /// Each subscriber drains what is already queued and then sees its
    /// mailbox close.
    pub fn shutdown(&self) {
        let released = {
            let mut registry = self.registry.lock();
            self.closed.store(true, Ordering::Release);
            registry.drain().count()
        };
        info!(released, "broadcaster shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

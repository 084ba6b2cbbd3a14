//! Per-connection stream state machine
//!
//! `CONNECTING → STREAMING → CLOSED`. The subscriber registration is held
//! by a scoped [`Subscription`], so it is released whenever the endpoint is
//! dropped, whether the loop ended normally, the client went away, or the
//! serving task was cancelled.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace};

use super::Frame;
use crate::api::broadcaster::{Broadcaster, SubscriberId, Subscription};
use crate::state_store::StateSource;
use crate::types::{EventKind, Revision, StateEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointPhase {
    Connecting,
    Streaming,
    Closed,
}

/// Server side of one streaming connection
pub struct StreamEndpoint {
    phase: EndpointPhase,
    source: Arc<dyn StateSource>,
    broadcaster: Arc<Broadcaster>,
    subscription: Option<Subscription>,
    keepalive: Duration,
    /// Revision of the last state sent to the client
    last_revision: Option<Revision>,
}

impl StreamEndpoint {
    pub fn new(
        source: Arc<dyn StateSource>,
        broadcaster: Arc<Broadcaster>,
        keepalive: Duration,
    ) -> Self {
        Self {
            phase: EndpointPhase::Connecting,
            source,
            broadcaster,
            subscription: None,
            keepalive,
            last_revision: None,
        }
    }

    pub fn phase(&self) -> EndpointPhase {
        self.phase
    }

    /// Registry id while streaming
    pub fn subscriber_id(&self) -> Option<SubscriberId> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Produce the next frame for the client, or `None` once closed.
    ///
    /// The first frame is always a snapshot read before registering. The
    /// call after it registers with the broadcaster and, if a write landed
    /// in between, sends one more snapshot so nothing is missed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.phase {
                EndpointPhase::Connecting => {
                    if self.last_revision.is_none() {
                        return self.snapshot_frame();
                    }

                    self.subscription = Some(self.broadcaster.subscribe_scoped());
                    self.phase = EndpointPhase::Streaming;
                    debug!(subscriber = ?self.subscriber_id(), "stream endpoint streaming");

                    if self.source_has_moved() {
                        return self.snapshot_frame();
                    }
                }
                EndpointPhase::Streaming => {
                    let Some(subscription) = self.subscription.as_mut() else {
                        self.close();
                        return None;
                    };

                    match tokio::time::timeout(self.keepalive, subscription.recv()).await {
                        Ok(Some(event)) => {
                            if self.is_stale(&event) {
                                trace!(version = event.version, "skipping stale update");
                                continue;
                            }
                            self.last_revision = Some(event.revision());
                            return Some(Frame::Event(event));
                        }
                        Ok(None) => {
                            // Evicted or broadcaster shut down
                            debug!(subscriber = ?self.subscriber_id(), "mailbox closed");
                            self.close();
                            return None;
                        }
                        Err(_) => return Some(Frame::Keepalive),
                    }
                }
                EndpointPhase::Closed => return None,
            }
        }
    }

    /// Release the subscription and stop producing frames
    pub fn close(&mut self) {
        self.subscription = None;
        self.phase = EndpointPhase::Closed;
    }

    fn snapshot_frame(&mut self) -> Option<Frame> {
        let state = self.source.snapshot();
        match StateEvent::snapshot(&state) {
            Ok(event) => {
                self.last_revision = Some(state.revision());
                Some(Frame::Event(Arc::new(event)))
            }
            Err(e) => {
                error!(error = %e, "failed to serialize snapshot");
                self.close();
                None
            }
        }
    }

    /// A reset followed by writes can land on the version already sent,
    /// so the whole revision is compared.
    fn source_has_moved(&self) -> bool {
        Some(self.source.snapshot().revision()) != self.last_revision
    }

    /// Updates that do not advance past what the client already has.
    /// Snapshots always pass.
    fn is_stale(&self, event: &StateEvent) -> bool {
        event.kind == EventKind::Update
            && self.last_revision.is_some_and(|last| event.revision() <= last)
    }
}

impl Drop for StreamEndpoint {
    fn drop(&mut self) {
        if self.phase != EndpointPhase::Closed {
            debug!(subscriber = ?self.subscriber_id(), "stream endpoint dropped by client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::SyncHub;
    use crate::state_store::StateStore;
    use crate::types::{SharedState, StatePatch};

    fn endpoint_for(hub: &SyncHub, keepalive: Duration) -> StreamEndpoint {
        StreamEndpoint::new(hub.source(), Arc::clone(hub.broadcaster()), keepalive)
    }

    fn expect_event(frame: Option<Frame>) -> Arc<StateEvent> {
        match frame {
            Some(Frame::Event(event)) => event,
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    /// Source that returns a fixed state, standing in for the store
    struct FixedSource(SharedState);

    impl StateSource for FixedSource {
        fn snapshot(&self) -> SharedState {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_first_frame_is_snapshot_before_registering() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_secs(30));

        let event = expect_event(endpoint.next_frame().await);
        assert_eq!(event.kind, EventKind::Snapshot);
        assert_eq!(event.decode_state().unwrap().view_type, "STANDBY");
        assert_eq!(endpoint.phase(), EndpointPhase::Connecting);
        assert_eq!(hub.broadcaster().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_forwards_updates_after_snapshot() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_secs(30));
        expect_event(endpoint.next_frame().await);

        let hub = Arc::new(hub);
        let writer = Arc::clone(&hub);
        let task = tokio::spawn(async move {
            let frame = endpoint.next_frame().await;
            frame.map(|f| (f, endpoint))
        });

        while hub.broadcaster().subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        writer.apply(StatePatch::view("BRIDGE")).unwrap();

        let (frame, endpoint) = task.await.unwrap().unwrap();
        let event = expect_event(Some(frame));
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.decode_state().unwrap().view_type, "BRIDGE");
        assert_eq!(endpoint.phase(), EndpointPhase::Streaming);
    }

    #[tokio::test]
    async fn test_two_clients_receive_same_update() {
        let hub = SyncHub::new(5);
        let mut a = endpoint_for(&hub, Duration::from_secs(30));
        let mut b = endpoint_for(&hub, Duration::from_secs(30));

        expect_event(a.next_frame().await);
        expect_event(b.next_frame().await);

        // Each task registers on its second call and then waits on its mailbox
        let a_task = tokio::spawn(async move {
            let first = a.next_frame().await;
            let second = a.next_frame().await;
            (first, second)
        });
        let b_task = tokio::spawn(async move {
            let first = b.next_frame().await;
            let second = b.next_frame().await;
            (first, second)
        });

        while hub.broadcaster().subscriber_count() < 2 {
            tokio::task::yield_now().await;
        }
        hub.apply(StatePatch::view("BRIDGE")).unwrap();
        hub.apply(StatePatch::view("ENCOUNTER_MAP")).unwrap();

        for task in [a_task, b_task] {
            let (first, second) = tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap();
            let first = expect_event(first);
            let second = expect_event(second);
            assert_eq!(first.decode_state().unwrap().view_type, "BRIDGE");
            assert_eq!(second.decode_state().unwrap().view_type, "ENCOUNTER_MAP");
        }
    }

    #[tokio::test]
    async fn test_catch_up_snapshot_when_write_races_registration() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_secs(30));
        expect_event(endpoint.next_frame().await);

        // Lands after the initial snapshot but before registration
        hub.apply(StatePatch::view("BRIDGE")).unwrap();

        let event = expect_event(endpoint.next_frame().await);
        assert_eq!(event.kind, EventKind::Snapshot);
        assert_eq!(event.version, 1);
        assert_eq!(endpoint.phase(), EndpointPhase::Streaming);
        assert_eq!(hub.broadcaster().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_catch_up_after_reset_lands_on_same_version() {
        let hub = SyncHub::new(5);
        hub.apply(StatePatch::view("BRIDGE")).unwrap();

        let mut endpoint = endpoint_for(&hub, Duration::from_millis(50));
        let first = expect_event(endpoint.next_frame().await);
        assert_eq!(first.version, 1);
        assert_eq!(first.decode_state().unwrap().view_type, "BRIDGE");

        // Back at version 1 before registration, with different content
        hub.reset().unwrap();
        hub.apply(StatePatch::view("ENCOUNTER_MAP")).unwrap();
        assert_eq!(hub.store().version(), 1);

        let event = expect_event(endpoint.next_frame().await);
        assert_eq!(event.kind, EventKind::Snapshot);
        assert_eq!(event.epoch, 1);
        assert_eq!(event.decode_state().unwrap().view_type, "ENCOUNTER_MAP");
    }

    #[tokio::test]
    async fn test_updates_after_reset_are_forwarded() {
        let hub = SyncHub::new(5);
        for _ in 0..3 {
            hub.apply(StatePatch::view("BRIDGE")).unwrap();
        }
        let mut endpoint = endpoint_for(&hub, Duration::from_millis(50));
        expect_event(endpoint.next_frame().await);
        assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));

        hub.reset().unwrap();
        hub.apply(StatePatch::view("ENCOUNTER_MAP")).unwrap();

        let reset = expect_event(endpoint.next_frame().await);
        assert_eq!(reset.kind, EventKind::Snapshot);
        assert_eq!(reset.version, 0);

        // Version 1 is below the 3 sent earlier but belongs to the new epoch
        let update = expect_event(endpoint.next_frame().await);
        assert_eq!(update.kind, EventKind::Update);
        assert_eq!(update.version, 1);
        assert_eq!(update.decode_state().unwrap().view_type, "ENCOUNTER_MAP");
    }

    #[tokio::test]
    async fn test_stale_updates_are_skipped() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_millis(50));
        expect_event(endpoint.next_frame().await);

        // Register; idle so the keepalive fires
        assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));

        let stale = StateEvent::update(&SharedState::default()).unwrap();
        hub.broadcaster().publish(stale);
        hub.apply(StatePatch::view("BRIDGE")).unwrap();

        let event = expect_event(endpoint.next_frame().await);
        assert_eq!(event.version, 1);
    }

    #[tokio::test]
    async fn test_keepalive_on_idle() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_millis(20));
        expect_event(endpoint.next_frame().await);

        for _ in 0..3 {
            assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));
        }
        assert_eq!(endpoint.phase(), EndpointPhase::Streaming);
    }

    #[tokio::test]
    async fn test_eviction_closes_endpoint() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_millis(20));
        expect_event(endpoint.next_frame().await);
        assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));

        // Never drained: the 6th write evicts this endpoint
        for i in 0..6u32 {
            hub.apply(StatePatch {
                encounter_level: Some(i),
                ..StatePatch::default()
            })
            .unwrap();
        }
        assert_eq!(hub.broadcaster().subscriber_count(), 0);

        // Buffered events drain, then the endpoint closes
        let mut forwarded = 0;
        while let Some(frame) = endpoint.next_frame().await {
            assert!(matches!(frame, Frame::Event(_)));
            forwarded += 1;
        }
        assert_eq!(forwarded, 5);
        assert_eq!(endpoint.phase(), EndpointPhase::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_closes_endpoint() {
        let hub = SyncHub::new(5);
        let mut endpoint = endpoint_for(&hub, Duration::from_millis(20));
        expect_event(endpoint.next_frame().await);
        assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));

        hub.shutdown();
        assert!(endpoint.next_frame().await.is_none());
        assert_eq!(endpoint.phase(), EndpointPhase::Closed);
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycles_leave_registry_unchanged() {
        let hub = SyncHub::new(5);

        for _ in 0..20 {
            let mut endpoint = endpoint_for(&hub, Duration::from_millis(5));
            expect_event(endpoint.next_frame().await);
            assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));
            assert_eq!(hub.broadcaster().subscriber_count(), 1);
            drop(endpoint);
            assert_eq!(hub.broadcaster().subscriber_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_restarted_store_serves_defaults() {
        let before = StateStore::new();
        before.update(StatePatch::view("BRIDGE"));

        // A restart builds a fresh store; nothing from `before` survives
        let restarted: Arc<dyn StateSource> = Arc::new(StateStore::new());
        let mut endpoint = StreamEndpoint::new(
            restarted,
            Arc::new(Broadcaster::default()),
            Duration::from_secs(30),
        );

        let event = expect_event(endpoint.next_frame().await);
        let state = event.decode_state().unwrap();
        assert_eq!(state.view_type, "STANDBY");
        assert_eq!(state.version, 0);
    }

    #[tokio::test]
    async fn test_fake_source_snapshot() {
        let mut state = SharedState::default();
        state.view_type = "SHIP_DASHBOARD".to_string();
        state.version = 12;

        let mut endpoint = StreamEndpoint::new(
            Arc::new(FixedSource(state)),
            Arc::new(Broadcaster::default()),
            Duration::from_millis(10),
        );

        let event = expect_event(endpoint.next_frame().await);
        assert_eq!(event.version, 12);
        assert_eq!(event.decode_state().unwrap().view_type, "SHIP_DASHBOARD");
        // Version unchanged, so no catch-up snapshot
        assert!(matches!(endpoint.next_frame().await, Some(Frame::Keepalive)));
    }
}

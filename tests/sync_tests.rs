//! End-to-end tests: real listener, real HTTP client subscriptions

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use terminal_sync::client::{ClientSubscription, EventHandler, ReceivedEvent, SubscriptionConfig};
use terminal_sync::server::{serve, ServerError};
use terminal_sync::{EventKind, StatePatch, SyncHub};

const WAIT: Duration = Duration::from_secs(10);

struct RunningServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    async fn start(hub: Arc<SyncHub>, addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, hub, async move {
            let _ = stop_rx.await;
        }));
        Self { addr, stop, task }
    }

    fn stream_url(&self) -> String {
        format!("http://{}/api/stream", self.addr)
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server did not shut down")
            .unwrap()
            .unwrap();
    }
}

fn setup_hub(capacity: usize) -> Arc<SyncHub> {
    Arc::new(SyncHub::new(capacity).with_keepalive(Duration::from_millis(100)))
}

fn fast_config() -> SubscriptionConfig {
    SubscriptionConfig::new(3, Duration::from_millis(50))
}

fn collecting_handler() -> (EventHandler, mpsc::UnboundedReceiver<ReceivedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: EventHandler = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (handler, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ReceivedEvent>) -> ReceivedEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no event in time")
        .expect("handler dropped")
}

async fn wait_for_subscribers(hub: &SyncHub, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while hub.broadcaster().subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} subscribers, found {}",
            hub.broadcaster().subscriber_count()
        )
    });
}

#[tokio::test]
async fn test_first_event_is_current_snapshot() {
    let hub = setup_hub(5);
    hub.apply(StatePatch::view("BRIDGE")).unwrap();
    let server = RunningServer::start(Arc::clone(&hub), "127.0.0.1:0".parse().unwrap()).await;

    let (handler, mut events) = collecting_handler();
    let client = ClientSubscription::subscribe(server.stream_url(), handler, None, fast_config());

    let first = next_event(&mut events).await;
    assert_eq!(first.kind, EventKind::Snapshot);
    assert_eq!(first.state.view_type, "BRIDGE");
    assert_eq!(first.state.version, 1);

    client.unsubscribe().await;
    server.stop().await;
}

#[tokio::test]
async fn test_two_clients_receive_the_same_update() {
    let hub = setup_hub(5);
    let server = RunningServer::start(Arc::clone(&hub), "127.0.0.1:0".parse().unwrap()).await;

    let (handler_a, mut events_a) = collecting_handler();
    let (handler_b, mut events_b) = collecting_handler();
    let client_a = ClientSubscription::subscribe(server.stream_url(), handler_a, None, fast_config());
    let client_b = ClientSubscription::subscribe(server.stream_url(), handler_b, None, fast_config());

    for events in [&mut events_a, &mut events_b] {
        let snapshot = next_event(events).await;
        assert_eq!(snapshot.kind, EventKind::Snapshot);
        assert_eq!(snapshot.state.view_type, "STANDBY");
    }
    wait_for_subscribers(&hub, 2).await;

    hub.apply(StatePatch::view("BRIDGE")).unwrap();

    for events in [&mut events_a, &mut events_b] {
        let update = next_event(events).await;
        assert_eq!(update.kind, EventKind::Update);
        assert_eq!(update.state.view_type, "BRIDGE");
        assert_eq!(update.state.version, 1);
    }

    client_a.unsubscribe().await;
    client_b.unsubscribe().await;
    server.stop().await;
}

#[tokio::test]
async fn test_rest_patch_reaches_stream_clients() {
    let hub = setup_hub(5);
    let server = RunningServer::start(Arc::clone(&hub), "127.0.0.1:0".parse().unwrap()).await;

    let (handler, mut events) = collecting_handler();
    let client = ClientSubscription::subscribe(server.stream_url(), handler, None, fast_config());
    next_event(&mut events).await;
    wait_for_subscribers(&hub, 1).await;

    let response = reqwest::Client::new()
        .patch(format!("http://{}/api/state", server.addr))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(r#"{"view_type":"ENCOUNTER_MAP","encounter_level":3}"#)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let update = next_event(&mut events).await;
    assert_eq!(update.state.view_type, "ENCOUNTER_MAP");
    assert_eq!(update.state.encounter_level, 3);

    client.unsubscribe().await;
    server.stop().await;
}

#[tokio::test]
async fn test_client_resyncs_after_server_restart() {
    let hub = setup_hub(5);
    let server = RunningServer::start(Arc::clone(&hub), "127.0.0.1:0".parse().unwrap()).await;
    let addr = server.addr;

    let (handler, mut events) = collecting_handler();
    let client = ClientSubscription::subscribe(server.stream_url(), handler, None, fast_config());
    next_event(&mut events).await;
    wait_for_subscribers(&hub, 1).await;

    hub.apply(StatePatch::view("BRIDGE")).unwrap();
    assert_eq!(next_event(&mut events).await.state.version, 1);

    server.stop().await;

    // A fresh process starts over from defaults on the same address
    let restarted = setup_hub(5);
    let server = RunningServer::start(Arc::clone(&restarted), addr).await;

    let resync = next_event(&mut events).await;
    assert_eq!(resync.kind, EventKind::Snapshot);
    assert_eq!(resync.state.version, 0);
    assert_eq!(resync.state.view_type, "STANDBY");
    assert!(client.status().connects >= 2);

    client.unsubscribe().await;
    server.stop().await;
}

#[tokio::test]
async fn test_connect_disconnect_cycles_leave_registry_unchanged() {
    let hub = setup_hub(5);
    let server = RunningServer::start(Arc::clone(&hub), "127.0.0.1:0".parse().unwrap()).await;

    for _ in 0..5 {
        let (handler, mut events) = collecting_handler();
        let client = ClientSubscription::subscribe(server.stream_url(), handler, None, fast_config());
        next_event(&mut events).await;
        wait_for_subscribers(&hub, 1).await;

        client.unsubscribe().await;
        // Detected on the next keepalive write at the latest
        wait_for_subscribers(&hub, 0).await;
    }

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_writers_reach_client_in_order() {
    let hub = setup_hub(1024);
    let server = RunningServer::start(Arc::clone(&hub), "127.0.0.1:0".parse().unwrap()).await;

    let (handler, mut events) = collecting_handler();
    let client = ClientSubscription::subscribe(server.stream_url(), handler, None, fast_config());
    next_event(&mut events).await;
    wait_for_subscribers(&hub, 1).await;

    let writers = 4;
    let per_writer = 25;
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                for i in 0..per_writer {
                    hub.apply(StatePatch::view(format!("VIEW_{w}_{i}"))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (writers * per_writer) as u64;
    let mut last = 0;
    while last < total {
        let event = next_event(&mut events).await;
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.state.version, last + 1);
        last = event.state.version;
    }
    assert_eq!(hub.snapshot().version, total);

    client.unsubscribe().await;
    server.stop().await;
}

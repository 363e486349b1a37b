//! End-to-end connection lifecycle over the in-memory transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use wflink_connector_lib::monitor::notifications::ObserverStateChanged;
use wflink_connector_lib::{
    ConnectionManager, ConnectionMonitor, EventRouter, ExecutionPools, HandlerError,
    HandlerRegistry, ListenerRegistry, ObserverState, Processor, ReconnectionStrategy,
};
use wflink_metadata::{MonitorConfig, PlatformConfig, PoolsConfig, ReconnectConfig};
use wflink_middleware::{
    ConnectivityCell, ConnectivityState, MemoryPeer, MemoryTransport, StreamChannel, StreamSignal,
    StreamSink, Transport, TransportError,
};
use wflink_wire::{Codec, Envelope, ProcessorRequest};

struct Accrue;

#[async_trait]
impl Processor for Accrue {
    async fn process(&self, request: &ProcessorRequest) -> Result<Value, HandlerError> {
        let principal = request.payload["principal"]
            .as_f64()
            .ok_or_else(|| HandlerError::failed("principal missing"))?;
        Ok(json!({"interest": principal * 0.05}))
    }
}

struct Harness {
    manager: Arc<ConnectionManager>,
    transport: Arc<MemoryTransport>,
    peers: UnboundedReceiver<MemoryPeer>,
}

const WRITE_TIMEOUT_MS: u64 = 100;

fn build_manager(transport: Arc<dyn Transport>) -> Arc<ConnectionManager> {
    let codec = Codec::new("urn:wflink:test");

    let pools = Arc::new(ExecutionPools::from_config(&PoolsConfig::default()).unwrap());
    let router = Arc::new(EventRouter::new(codec.clone(), pools));
    let monitor = Arc::new(ConnectionMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&transport),
        Arc::new(ListenerRegistry::new()),
    ));
    let reconnect = Arc::new(ReconnectionStrategy::new(ReconnectConfig {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        max_failures: 10,
    }));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register_processor("accrue-interest", Arc::new(Accrue));

    let platform = PlatformConfig {
        tags: vec!["loans".to_string()],
        write_timeout_ms: WRITE_TIMEOUT_MS,
        ..PlatformConfig::default()
    };
    ConnectionManager::new(transport, codec, router, monitor, reconnect, handlers, &platform)
}

fn harness() -> Harness {
    let (transport, peers) = MemoryTransport::new();
    let transport = Arc::new(transport);
    let manager = build_manager(Arc::clone(&transport) as Arc<dyn Transport>);

    Harness {
        manager,
        transport,
        peers,
    }
}

async fn next_peer(peers: &mut UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    tokio::time::timeout(Duration::from_secs(2), peers.recv())
        .await
        .expect("no stream opened")
        .expect("transport dropped")
}

async fn next_frame(peer: &mut MemoryPeer) -> Envelope {
    let text = tokio::time::timeout(Duration::from_secs(2), peer.recv())
        .await
        .expect("nothing sent")
        .expect("stream closed");
    serde_json::from_str(&text).unwrap()
}

fn platform_frame(event_type: &str, data: Value) -> String {
    serde_json::to_string(&Envelope::new(event_type, "platform", data)).unwrap()
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Collects every observer state published after subscription
fn record_observer(manager: &ConnectionManager) -> Arc<Mutex<Vec<ObserverState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    manager
        .monitor()
        .listeners()
        .subscribe(move |change: &ObserverStateChanged| {
            log.lock().unwrap().push(change.current);
            Ok(())
        });
    seen
}

/// Start, answer the join with a greet, and wait for Ready
async fn handshake(h: &mut Harness) -> MemoryPeer {
    h.manager.start().await;
    let mut peer = next_peer(&mut h.peers).await;
    let join = next_frame(&mut peer).await;
    assert_eq!(join.event_type, "CalculationMemberJoinEvent");

    peer.deliver(platform_frame("CalculationMemberGreetEvent", json!({})))
        .await;
    let manager = Arc::clone(&h.manager);
    eventually("ready", move || manager.observer_state() == ObserverState::Ready).await;
    peer
}

#[tokio::test]
async fn test_join_then_greet_reaches_ready() {
    let mut h = harness();
    h.manager.start().await;
    assert_eq!(h.manager.observer_state(), ObserverState::AwaitsGreet);

    let mut peer = next_peer(&mut h.peers).await;
    let join = next_frame(&mut peer).await;
    assert_eq!(join.event_type, "CalculationMemberJoinEvent");
    assert_eq!(join.source, "urn:wflink:test");
    assert_eq!(join.data["tags"], json!(["loans"]));
    assert!(!join.data["id"].as_str().unwrap().is_empty());

    peer.deliver(platform_frame("CalculationMemberGreetEvent", json!({})))
        .await;
    let manager = Arc::clone(&h.manager);
    eventually("ready", move || manager.observer_state() == ObserverState::Ready).await;

    // A second greet is ignored
    peer.deliver(platform_frame("CalculationMemberGreetEvent", json!({})))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.manager.observer_state(), ObserverState::Ready);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_processor_request_round_trip() {
    let mut h = harness();
    let mut peer = handshake(&mut h).await;

    peer.deliver(platform_frame(
        "EntityProcessorCalculationRequest",
        json!({
            "requestId": "req-1",
            "entityId": "loan-7",
            "processorName": "accrue-interest",
            "payload": {"principal": 1000.0}
        }),
    ))
    .await;

    let response = next_frame(&mut peer).await;
    assert_eq!(response.event_type, "EntityProcessorCalculationResponse");
    assert_eq!(response.data["requestId"], "req-1");
    assert_eq!(response.data["success"], true);
    assert_eq!(response.data["payload"]["interest"], 50.0);

    // Join and response both await acks
    let monitor = Arc::clone(h.manager.monitor());
    assert!(monitor.is_pending(&response.id));

    peer.deliver(platform_frame(
        "EventAckResponse",
        json!({"sourceEventId": response.id, "success": true}),
    ))
    .await;
    let m = Arc::clone(&monitor);
    let id = response.id.clone();
    eventually("ack correlated", move || !m.is_pending(&id)).await;

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_unknown_processor_gets_failure_response() {
    let mut h = harness();
    let mut peer = handshake(&mut h).await;

    peer.deliver(platform_frame(
        "EntityProcessorCalculationRequest",
        json!({"requestId": "req-2", "entityId": "e", "processorName": "nope"}),
    ))
    .await;

    let response = next_frame(&mut peer).await;
    assert_eq!(response.data["success"], false);
    assert_eq!(response.data["error"]["code"], "PROCESSOR_NOT_FOUND");

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_keep_alive_is_acknowledged() {
    let mut h = harness();
    let mut peer = handshake(&mut h).await;

    let keep_alive = Envelope::new(
        "CalculationMemberKeepAliveEvent",
        "platform",
        json!({"id": "ka-1", "timestamp": "2026-01-01T00:00:00Z"}),
    );
    peer.deliver(serde_json::to_string(&keep_alive).unwrap()).await;

    let ack = next_frame(&mut peer).await;
    assert_eq!(ack.event_type, "EventAckResponse");
    assert_eq!(ack.data["sourceEventId"], keep_alive.id.as_str());
    assert_eq!(ack.data["success"], true);
    assert!(h.manager.monitor().last_keep_alive().is_some());
    // Our own acks are not tracked
    assert!(!h.manager.monitor().is_pending(&ack.id));

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_stream_failure_reconnects_and_rejoins() {
    let mut h = harness();
    let peer = handshake(&mut h).await;

    peer.fail("connection reset").await;

    let mut second = next_peer(&mut h.peers).await;
    let join = next_frame(&mut second).await;
    assert_eq!(join.event_type, "CalculationMemberJoinEvent");
    let manager = Arc::clone(&h.manager);
    eventually("awaiting greet again", move || {
        manager.observer_state() == ObserverState::AwaitsGreet
    })
    .await;
    assert_eq!(h.transport.opens(), 2);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_platform_close_reconnects_and_rejoins() {
    let mut h = harness();
    let peer = handshake(&mut h).await;
    let seen = record_observer(&h.manager);

    peer.complete().await;

    let mut second = next_peer(&mut h.peers).await;
    let join = next_frame(&mut second).await;
    assert_eq!(join.event_type, "CalculationMemberJoinEvent");
    let log = Arc::clone(&seen);
    eventually("rejoin recorded", move || log.lock().unwrap().len() >= 4).await;
    assert_eq!(
        seen.lock().unwrap()[..4],
        [
            ObserverState::Disconnected,
            ObserverState::Connecting,
            ObserverState::Connected,
            ObserverState::AwaitsGreet,
        ]
    );

    second
        .deliver(platform_frame("CalculationMemberGreetEvent", json!({})))
        .await;
    let manager = Arc::clone(&h.manager);
    eventually("ready again", move || manager.observer_state() == ObserverState::Ready).await;
    assert_eq!(h.transport.opens(), 2);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_stream_lost_right_after_reconnect_is_reconnected() {
    let mut h = harness();
    let peer = handshake(&mut h).await;
    peer.fail("connection reset").await;

    let mut second = next_peer(&mut h.peers).await;
    next_frame(&mut second).await;
    let seen = record_observer(&h.manager);

    // Dropped as soon as the join went out
    second.complete().await;

    let mut third = next_peer(&mut h.peers).await;
    let join = next_frame(&mut third).await;
    assert_eq!(join.event_type, "CalculationMemberJoinEvent");
    let manager = Arc::clone(&h.manager);
    eventually("awaiting greet on third stream", move || {
        manager.observer_state() == ObserverState::AwaitsGreet
    })
    .await;
    assert!(seen.lock().unwrap().contains(&ObserverState::Disconnected));
    assert_eq!(h.transport.opens(), 3);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_start_defers_to_reconnection() {
    let mut h = harness();
    h.transport.fail_next_opens(2);

    h.manager.start().await;
    assert_eq!(h.manager.observer_state(), ObserverState::Disconnected);

    let mut peer = next_peer(&mut h.peers).await;
    next_frame(&mut peer).await;
    assert_eq!(h.transport.opens(), 3);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_does_not_reconnect() {
    let mut h = harness();
    let mut peer = handshake(&mut h).await;

    h.manager.shutdown().await;
    assert_eq!(h.manager.observer_state(), ObserverState::Disconnected);
    assert_eq!(h.transport.connectivity(), ConnectivityState::Shutdown);
    // Sink closed
    assert_eq!(peer.recv().await, None);

    peer.complete().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.opens(), 1);
}

/// Sink whose first write goes through and every later write or close hangs,
/// like a peer that stopped reading
struct StalledSink {
    writes: Arc<AtomicUsize>,
    written: usize,
}

#[async_trait]
impl StreamSink for StalledSink {
    async fn send(&mut self, _text: String) -> Result<(), TransportError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.written += 1;
        if self.written == 1 {
            return Ok(());
        }
        std::future::pending::<Result<(), TransportError>>().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        std::future::pending::<Result<(), TransportError>>().await
    }
}

#[derive(Default)]
struct StallingTransport {
    opens: AtomicUsize,
    writes: Arc<AtomicUsize>,
    streams: Mutex<Vec<mpsc::Sender<StreamSignal>>>,
    connectivity: ConnectivityCell,
}

impl StallingTransport {
    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn stream(&self, idx: usize) -> mpsc::Sender<StreamSignal> {
        self.streams.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl Transport for StallingTransport {
    async fn open(&self) -> Result<StreamChannel, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, signals) = mpsc::channel(16);
        self.streams.lock().unwrap().push(tx);
        self.connectivity.set(ConnectivityState::Ready);
        Ok(StreamChannel {
            sink: Box::new(StalledSink {
                writes: Arc::clone(&self.writes),
                written: 0,
            }),
            signals,
        })
    }

    fn connectivity(&self) -> ConnectivityState {
        self.connectivity.get()
    }
}

async fn stalled_handshake() -> (Arc<ConnectionManager>, Arc<StallingTransport>) {
    let transport = Arc::new(StallingTransport::default());
    let manager = build_manager(Arc::clone(&transport) as Arc<dyn Transport>);

    manager.start().await;
    assert_eq!(transport.writes(), 1);
    transport
        .stream(0)
        .send(StreamSignal::Message(platform_frame(
            "CalculationMemberGreetEvent",
            json!({}),
        )))
        .await
        .unwrap();
    let m = Arc::clone(&manager);
    eventually("ready", move || m.observer_state() == ObserverState::Ready).await;
    (manager, transport)
}

#[tokio::test]
async fn test_stream_error_reconnects_past_stalled_write() {
    let (manager, transport) = stalled_handshake().await;

    // The keep-alive ack write hangs on the sink
    let keep_alive = Envelope::new(
        "CalculationMemberKeepAliveEvent",
        "platform",
        json!({"id": "ka-1", "timestamp": "2026-01-01T00:00:00Z"}),
    );
    let first = transport.stream(0);
    first
        .send(StreamSignal::Message(serde_json::to_string(&keep_alive).unwrap()))
        .await
        .unwrap();
    let t = Arc::clone(&transport);
    eventually("ack write started", move || t.writes() == 2).await;

    first
        .send(StreamSignal::Error("connection reset".to_string()))
        .await
        .unwrap();

    let t = Arc::clone(&transport);
    eventually("second stream opened", move || t.opens() == 2).await;
    let t = Arc::clone(&transport);
    eventually("join on second stream", move || t.writes() == 3).await;
    let m = Arc::clone(&manager);
    eventually("awaiting greet again", move || {
        m.observer_state() == ObserverState::AwaitsGreet
    })
    .await;

    // Shutdown is bounded even though close hangs too
    tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
        .await
        .expect("shutdown blocked on stalled sink");
}

#[tokio::test]
async fn test_timed_out_write_is_not_awaiting_ack() {
    let (manager, transport) = stalled_handshake().await;
    // Only the join is awaiting an ack
    assert_eq!(manager.monitor().pending_acks(), 1);

    transport
        .stream(0)
        .send(StreamSignal::Message(platform_frame(
            "EntityProcessorCalculationRequest",
            json!({
                "requestId": "req-9",
                "entityId": "loan-9",
                "processorName": "accrue-interest",
                "payload": {"principal": 10.0}
            }),
        )))
        .await
        .unwrap();

    let t = Arc::clone(&transport);
    eventually("response write started", move || t.writes() == 2).await;
    let m = Arc::clone(&manager);
    eventually("response forgotten after timeout", move || {
        m.monitor().pending_acks() == 1
    })
    .await;
    assert_eq!(manager.observer_state(), ObserverState::Ready);

    manager.shutdown().await;
}

//! End-to-end routing scenarios driven through the public API

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use devgate::device::metadata::DEVICE_NAME_HEADER;
use devgate::device::Request;
use devgate::ingress::{self, SendOutcome};
use devgate::transport::{ConnectRequest, MemoryPeer, MemoryUpgrader};
use devgate::{
    Connector, Device, DeliveryError, DeviceId, Failures, Format, Manager, ManagerConfig, Message,
    Router,
};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

struct Gateway {
    manager: Arc<Manager<MemoryUpgrader>>,
    peers: UnboundedReceiver<MemoryPeer>,
}

impl Gateway {
    fn new(config: ManagerConfig) -> Self {
        let (upgrader, peers) = MemoryUpgrader::new();
        Self {
            manager: Arc::new(Manager::new(config, upgrader)),
            peers,
        }
    }

    async fn connect(&mut self, name: &str) -> (Arc<Device>, MemoryPeer) {
        let device = assert_ok!(
            self.manager
                .connect(&connect_request(name), &HeaderMap::new())
                .await
        );
        let peer = self.peers.recv().await.unwrap();
        (device, peer)
    }

    async fn send_json(&self, message: &Message) -> SendOutcome {
        ingress::send_message(
            self.manager.as_ref(),
            Format::Json,
            Format::Json.encode(message),
            &CancellationToken::new(),
        )
        .await
    }
}

fn connect_request(name: &str) -> ConnectRequest {
    let mut headers = HeaderMap::new();
    headers.insert(DEVICE_NAME_HEADER, HeaderValue::from_str(name).unwrap());
    ConnectRequest::new(headers)
}

fn id(name: &str) -> DeviceId {
    DeviceId::parse(name).unwrap()
}

#[tokio::test]
async fn unicast_to_connected_device_succeeds() {
    let mut gateway = Gateway::new(ManagerConfig::default());
    let (_device, mut peer) = gateway.connect("mac:aa:bb:cc:dd:ee:01").await;

    let message = Message::event("dns:cloud", "mac:aabbccddee01/config");
    let outcome = gateway.send_json(&message).await;

    assert_eq!(outcome, SendOutcome::Delivered);
    assert_eq!(outcome.status(), StatusCode::OK);

    let frame = peer.recv().await.unwrap();
    assert_eq!(assert_ok!(Format::Binary.decode(&frame)), message);
}

#[tokio::test]
async fn unicast_after_disconnect_matches_nothing() {
    let mut gateway = Gateway::new(ManagerConfig::default());
    gateway.connect("serial:a").await;

    assert!(gateway.manager.disconnect(&id("serial:a")).await);

    let message = Arc::new(Message::event("dns:cloud", "serial:a"));
    let mut calls = 0;
    let routed = assert_ok!(
        gateway
            .manager
            .route(Arc::clone(&message), None, &CancellationToken::new(), |_, _| calls += 1)
            .await
    );
    assert_eq!(routed.count(), 0);
    assert_eq!(calls, 0);

    let outcome = gateway.send_json(&message).await;
    assert_eq!(outcome, SendOutcome::NoMatch);
    assert_eq!(outcome.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn broadcast_reports_only_failed_device() {
    // B's queue holds one message and its connection is stalled, so a third
    // message cannot be queued before the timeout
    let config = ManagerConfig::default()
        .device_queue_size(1)
        .send_timeout(Duration::from_millis(200));
    let mut gateway = Gateway::new(config);
    let (_a, mut a_peer) = gateway.connect("serial:a").await;
    let (b, b_peer) = gateway.connect("serial:b").await;

    b_peer.stall();
    let filler = Message::event("dns:cloud", "serial:b");
    for _ in 0..2 {
        let request = Request::new(Arc::new(filler.clone()), Format::Binary.encode(&filler));
        assert_ok!(b.send(request).await);
    }

    let failures = Failures::new();
    let mut reported = 0;
    let routed = assert_ok!(
        gateway
            .manager
            .route(
                Arc::new(Message::event("dns:cloud", "*")),
                None,
                &CancellationToken::new(),
                |device, error| {
                    reported += 1;
                    failures.add(device, error);
                },
            )
            .await
    );

    assert_eq!(routed.count(), 2);
    assert_eq!(reported, 2);
    assert_eq!(failures.failure_count(), 1);

    let report = failures.report().unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].id, id("serial:b"));
    assert_eq!(report.errors[0].key, b.key());
    assert_eq!(
        report.errors[0].error,
        DeliveryError::Timeout(Duration::from_millis(200)).to_string()
    );

    assert!(a_peer.recv().await.is_some());
}

#[tokio::test]
async fn partial_failure_maps_to_server_error() {
    let mut gateway = Gateway::new(ManagerConfig::default());
    gateway.connect("serial:a").await;
    let (b, _b_peer) = gateway.connect("serial:b").await;
    b.close();

    let outcome = gateway.send_json(&Message::event("dns:cloud", "*")).await;

    assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
    match outcome {
        SendOutcome::Failed(report) => {
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].id, id("serial:b"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_all_empties_registry() {
    let mut gateway = Gateway::new(ManagerConfig::default());
    for i in 0..20 {
        gateway.connect(&format!("serial:{i}")).await;
    }
    assert_eq!(gateway.manager.registry().len().await, 20);

    assert_eq!(gateway.manager.disconnect_all().await, 20);
    assert_eq!(gateway.manager.registry().len().await, 0);
}

#[tokio::test]
async fn visit_all_agrees_with_len() {
    let mut gateway = Gateway::new(ManagerConfig::default());
    for i in 0..12 {
        gateway.connect(&format!("serial:{i}")).await;
    }
    gateway.manager.disconnect(&id("serial:3")).await;

    let registry = gateway.manager.registry();
    let visited = registry.visit_all(|_| true).await;
    assert_eq!(visited, registry.len().await);
    assert_eq!(visited, 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_connects_keep_one_handle_per_device() {
    let (upgrader, mut peers) = MemoryUpgrader::new();
    let manager = Arc::new(Manager::new(ManagerConfig::default(), upgrader));

    // Keep peers alive so writes never fail underneath the test
    let drain = tokio::spawn(async move {
        let mut kept = Vec::new();
        while let Some(peer) = peers.recv().await {
            kept.push(peer);
        }
        kept.len()
    });

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            for round in 0..25 {
                let name = format!("serial:dev-{}", (worker + round) % 5);
                if round % 3 == 0 {
                    manager.disconnect(&DeviceId::parse(&name).unwrap()).await;
                } else {
                    let _ = manager
                        .connect(&connect_request(&name), &HeaderMap::new())
                        .await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let registry = manager.registry();
    let mut seen = Vec::new();
    registry
        .visit_all(|device| {
            assert!(!device.is_closed(), "closed handle still registered");
            seen.push(device.id().clone());
            true
        })
        .await;

    let total = seen.len();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), total);
    assert!(total <= 5);

    manager.disconnect_all().await;
    drop(manager);
    assert!(drain.await.unwrap() > 0);
}

#[tokio::test]
async fn rejected_duplicate_keeps_first_connection() {
    let mut gateway = Gateway::new(ManagerConfig::default().reject_duplicates());
    let (first, _peer) = gateway.connect("uuid:0f3c").await;

    let result = gateway
        .manager
        .connect(&connect_request("uuid:0f3c"), &HeaderMap::new())
        .await;
    assert_err!(result);

    let current = gateway.manager.registry().get(&id("uuid:0f3c")).await.unwrap();
    assert_eq!(current.key(), first.key());
}

#[tokio::test]
async fn listing_streams_every_device() {
    let mut gateway = Gateway::new(ManagerConfig::default().listing_queue_size(2));
    for i in 0..10 {
        gateway.connect(&format!("serial:{i}")).await;
    }

    let mut out = Vec::new();
    let written = assert_ok!(
        gateway
            .manager
            .listing()
            .stream(&mut out, &CancellationToken::new())
            .await
    );
    assert_eq!(written, 10);

    let doc: serde_json::Value = assert_ok!(serde_json::from_slice(&out));
    assert_eq!(doc["device"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn binary_ingress_forwards_body() {
    let mut gateway = Gateway::new(ManagerConfig::default());
    let (_device, mut peer) = gateway.connect("dns:edge.example.com").await;

    let body: Bytes = Format::Binary.encode(&Message::event("dns:cloud", "dns:edge.example.com"));
    let outcome = ingress::send_message(
        gateway.manager.as_ref(),
        Format::Binary,
        body.clone(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome, SendOutcome::Delivered);
    assert_eq!(peer.recv().await.unwrap(), body);
}

#[tokio::test]
async fn every_accepted_mac_spelling_is_routable() {
    for spelling in [
        "mac:11:22:33:44:55:66",
        "mac:11-22-33-44-55-66",
        "mac:1122.3344.5566",
        "MAC:112233445566",
    ] {
        let mut gateway = Gateway::new(ManagerConfig::default());
        let (device, mut peer) = gateway.connect(spelling).await;
        assert_eq!(device.id().as_str(), "mac:112233445566");

        let message = Message::event("dns:cloud", spelling);
        let outcome = gateway.send_json(&message).await;
        assert_eq!(outcome, SendOutcome::Delivered, "{spelling}");
        assert!(peer.recv().await.is_some());
    }
}

#[tokio::test]
async fn destination_syntax_refused_as_identity() {
    let gateway = Gateway::new(ManagerConfig::default());

    for name in ["serial:*", "serial:a,b", "mac:11,22,33,44,55,66"] {
        let result = gateway
            .manager
            .connect(&connect_request(name), &HeaderMap::new())
            .await;
        assert_err!(result, "{name}");
    }
    assert_eq!(gateway.manager.registry().len().await, 0);

    let outcome = gateway.send_json(&Message::event("dns:cloud", ",")).await;
    assert_eq!(outcome.status(), StatusCode::BAD_REQUEST);
}

/// Accepts writes until its first flush, then blocks forever
struct StallingWriter {
    flushed: bool,
    stalled: Arc<Notify>,
}

impl AsyncWrite for StallingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.flushed {
            self.stalled.notify_one();
            return Poll::Pending;
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.flushed = true;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn stalled_listing_leaves_registry_writable() {
    let mut gateway = Gateway::new(ManagerConfig::default().listing_queue_size(1));
    for i in 0..10 {
        gateway.connect(&format!("serial:{i}")).await;
    }

    let stalled = Arc::new(Notify::new());
    let listing = gateway.manager.listing();
    let task = tokio::spawn({
        let stalled = Arc::clone(&stalled);
        async move {
            let mut out = StallingWriter {
                flushed: false,
                stalled,
            };
            listing.stream(&mut out, &CancellationToken::new()).await
        }
    });

    assert_ok!(tokio::time::timeout(Duration::from_secs(1), stalled.notified()).await);

    let (late, _peer) = assert_ok!(
        tokio::time::timeout(Duration::from_secs(1), gateway.connect("serial:late")).await
    );
    assert_eq!(late.id(), &id("serial:late"));

    let removed = assert_ok!(
        tokio::time::timeout(
            Duration::from_secs(1),
            gateway.manager.disconnect(&id("serial:3"))
        )
        .await
    );
    assert!(removed);
    assert_eq!(gateway.manager.registry().len().await, 10);

    task.abort();
}

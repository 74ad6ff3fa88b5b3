use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use rcs_dialog_core::prelude::*;
use rcs_sip_core::prelude::*;
use rcs_sip_transport::prelude::*;

struct Harness {
    manager: Arc<TransactionManager>,
    transport: UdpTransport,
    incoming: mpsc::Receiver<IncomingRequest>,
    proxy: UdpSocket,
    factory: RequestFactory,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rcs=debug")
        .with_test_writer()
        .try_init();
}

async fn harness(retransmission: RetransmissionConfig) -> Harness {
    init_tracing();
    let proxy = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy.local_addr().unwrap();

    let config = UdpTransportConfig::new("127.0.0.1:0".parse().unwrap())
        .with_retransmission(retransmission);
    let (transport, events) = UdpTransport::bind_with_config(config).await.unwrap();
    let local = transport.local_addr().unwrap();

    let (manager, incoming) = TransactionManager::new(
        Arc::new(transport.clone()),
        events,
        TransactionConfig::new(proxy_addr),
    );
    Harness {
        manager,
        transport,
        incoming,
        proxy,
        factory: RequestFactory::new(local, "transaction-test"),
    }
}

fn fast() -> RetransmissionConfig {
    RetransmissionConfig::default()
        .with_t1(Duration::from_millis(40))
        .with_t2(Duration::from_millis(160))
        .with_max_retransmissions(3)
}

fn slow() -> RetransmissionConfig {
    RetransmissionConfig::default()
        .with_t1(Duration::from_secs(5))
        .with_t2(Duration::from_secs(10))
}

fn options(h: &Harness, call_id: &str) -> Request {
    h.factory
        .out_of_dialog(
            Method::Options,
            "sip:bob@example.com",
            NameAddr::new("sip:alice@example.com").with_tag("alice"),
            call_id,
            1,
        )
        .build()
}

async fn recv_request(socket: &UdpSocket) -> (Request, SocketAddr) {
    let mut buf = vec![0u8; 65_535];
    let (len, src) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("nothing received")
        .unwrap();
    let message = parse_message(&buf[..len]).unwrap();
    (message.as_request().expect("not a request").clone(), src)
}

async fn reply(socket: &UdpSocket, request: &Request, status: StatusCode, to: SocketAddr) {
    let response = SimpleResponseBuilder::response_from_request(request, status, None)
        .to_tag("bob")
        .build();
    socket.send_to(&response.to_bytes(), to).await.unwrap();
}

#[tokio::test]
async fn send_and_wait_skips_provisional_and_returns_final() {
    let h = harness(slow()).await;
    let request = options(&h, "saw-1");

    let manager = h.manager.clone();
    let waiter = tokio::spawn(async move { manager.send_and_wait(request, Duration::from_secs(2)).await });

    let (received, src) = recv_request(&h.proxy).await;
    reply(&h.proxy, &received, StatusCode::TRYING, src).await;
    reply(&h.proxy, &received, StatusCode::OK, src).await;

    let response = waiter.await.unwrap().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(h.manager.pending_count(), 0);
}

#[tokio::test]
async fn pending_transaction_yields_provisional_responses() {
    let h = harness(slow()).await;
    let mut pending = h.manager.send_request(options(&h, "pending-1")).await.unwrap();

    let (received, src) = recv_request(&h.proxy).await;
    reply(&h.proxy, &received, StatusCode::RINGING, src).await;

    let deadline = Instant::now() + Duration::from_secs(2);
    match pending.next_event(deadline).await.unwrap() {
        TransactionEvent::Provisional(r) => assert_eq!(r.status, StatusCode::RINGING),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!pending.is_resolved());

    reply(&h.proxy, &received, StatusCode::BUSY_HERE, src).await;
    let final_response = pending.wait_final(deadline).await.unwrap();
    assert_eq!(final_response.status, StatusCode::BUSY_HERE);
    assert!(pending.is_resolved());
}

#[tokio::test]
async fn timeout_resolves_once_and_late_response_is_ignored() {
    let h = harness(slow()).await;
    let request = options(&h, "late-1");

    let result = h
        .manager
        .send_and_wait(request, Duration::from_millis(150))
        .await;
    assert!(matches!(result, Err(TransactionError::Timeout(_))));
    assert_eq!(h.manager.pending_count(), 0);

    // the answer shows up after the caller gave up
    let (received, src) = recv_request(&h.proxy).await;
    reply(&h.proxy, &received, StatusCode::OK, src).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.manager.pending_count(), 0);
}

#[tokio::test]
async fn exhausted_retransmissions_surface_as_transport_timeout() {
    let h = harness(fast()).await;
    let result = h
        .manager
        .send_and_wait(options(&h, "lost-1"), Duration::from_secs(5))
        .await;
    match result {
        Err(TransactionError::TransportTimeout(key)) => assert_eq!(key.call_id, "lost-1"),
        other => panic!("expected transport timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn dropping_pending_transaction_stops_retransmission() {
    let h = harness(fast()).await;
    let pending = h.manager.send_request(options(&h, "drop-1")).await.unwrap();
    let _ = recv_request(&h.proxy).await;
    drop(pending);
    assert_eq!(h.manager.pending_count(), 0);

    let mut buf = vec![0u8; 65_535];
    while timeout(Duration::from_millis(10), h.proxy.recv_from(&mut buf)).await.is_ok() {}
    let extra = timeout(Duration::from_millis(300), h.proxy.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "request retransmitted after the handle was dropped");
}

#[tokio::test]
async fn incoming_requests_are_forwarded_and_acks_awaited() {
    let mut h = harness(slow()).await;
    let local = h.transport.local_addr().unwrap();

    let invite = SimpleRequestBuilder::new(Method::Invite, "sip:alice@127.0.0.1")
        .via("127.0.0.1:7000", "z9hG4bKin1")
        .from(NameAddr::new("sip:bob@example.com").with_tag("bob"))
        .to(NameAddr::new("sip:alice@example.com"))
        .call_id("incoming-1")
        .cseq(5)
        .build();
    h.proxy.send_to(&invite.to_bytes(), local).await.unwrap();

    let incoming = timeout(Duration::from_secs(2), h.incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(incoming.request.method, Method::Invite);
    assert_eq!(incoming.source, h.proxy.local_addr().unwrap());

    let ok = h
        .factory
        .create_response(&incoming.request, StatusCode::OK, Some("alice"))
        .build();
    h.manager.send_response(ok, incoming.source).await.unwrap();

    let ack = SimpleRequestBuilder::new(Method::Ack, "sip:alice@127.0.0.1")
        .via("127.0.0.1:7000", "z9hG4bKack1")
        .from(NameAddr::new("sip:bob@example.com").with_tag("bob"))
        .to(NameAddr::new("sip:alice@example.com").with_tag("alice"))
        .call_id("incoming-1")
        .cseq(5)
        .build();
    // the ACK may arrive before anyone waits for it
    h.proxy.send_to(&ack.to_bytes(), local).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let acked = h
        .manager
        .wait_for_ack("incoming-1", 5, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(acked.method, Method::Ack);

    let missing = h
        .manager
        .wait_for_ack("incoming-1", 6, Duration::from_millis(100))
        .await;
    assert!(matches!(missing, Err(TransactionError::Timeout(_))));
}

#[tokio::test]
async fn shutdown_fails_new_requests() {
    let h = harness(slow()).await;
    h.manager.shutdown().await.unwrap();
    let result = h.manager.send_request(options(&h, "closed-1")).await;
    assert!(matches!(
        result,
        Err(TransactionError::Transport(rcs_sip_transport::Error::TransportClosed))
    ));
    assert_eq!(h.manager.pending_count(), 0);
}

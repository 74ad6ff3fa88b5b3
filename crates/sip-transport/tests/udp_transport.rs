use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use rcs_sip_core::prelude::*;
use rcs_sip_transport::prelude::*;
use rcs_sip_transport::Error;

fn fast_retransmission() -> RetransmissionConfig {
    RetransmissionConfig::default()
        .with_t1(Duration::from_millis(40))
        .with_t2(Duration::from_millis(160))
        .with_max_retransmissions(3)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rcs=debug")
        .with_test_writer()
        .try_init();
}

async fn transport() -> (UdpTransport, mpsc::Receiver<TransportEvent>) {
    init_tracing();
    let config = UdpTransportConfig::new("127.0.0.1:0".parse().unwrap())
        .with_retransmission(fast_retransmission());
    UdpTransport::bind_with_config(config).await.unwrap()
}

async fn peer() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

fn request(method: Method, branch: &str, seq: u32) -> Request {
    SimpleRequestBuilder::new(method, "sip:me@127.0.0.1")
        .via("127.0.0.1:7000", branch)
        .from(NameAddr::new("sip:peer@example.com").with_tag("p1"))
        .to(NameAddr::new("sip:me@example.com"))
        .call_id("transport-test")
        .cseq(seq)
        .build()
}

async fn recv(socket: &UdpSocket) -> Option<Message> {
    let mut buf = vec![0u8; 65_535];
    match timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(parse_message(&buf[..len]).unwrap()),
        _ => None,
    }
}

async fn next_message(events: &mut mpsc::Receiver<TransportEvent>) -> Option<Message> {
    loop {
        match timeout(Duration::from_millis(300), events.recv()).await {
            Ok(Some(TransportEvent::MessageReceived { message, .. })) => return Some(message),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn retransmitted_request_gets_identical_response() {
    let (transport, mut events) = transport().await;
    let local = transport.local_addr().unwrap();
    let (peer, peer_addr) = peer().await;

    let req = request(Method::Message, "z9hG4bKdup", 1);
    let wire = req.to_bytes();
    peer.send_to(&wire, local).await.unwrap();

    let delivered = next_message(&mut events).await.unwrap();
    let delivered = delivered.as_request().unwrap().clone();

    let ok = SimpleResponseBuilder::response_from_request(&delivered, StatusCode::OK, None)
        .to_tag("me1")
        .build();
    transport
        .send_message(ok.clone().into(), peer_addr)
        .await
        .unwrap();
    let first = recv(&peer).await.unwrap();

    peer.send_to(&wire, local).await.unwrap();
    let replayed = recv(&peer).await.unwrap();
    assert_eq!(first.to_bytes(), replayed.to_bytes());
    assert_eq!(replayed.to_bytes(), ok.to_bytes());

    // business logic never sees the retransmission
    assert!(next_message(&mut events).await.is_none());
    transport.close().await.unwrap();
}

#[tokio::test]
async fn unanswered_request_times_out_after_ladder() {
    let (transport, mut events) = transport().await;
    let (peer, peer_addr) = peer().await;

    let req = request(Method::Options, "z9hG4bKlost", 1);
    transport.send_message(req.into(), peer_addr).await.unwrap();

    let mut copies = 0;
    while recv(&peer).await.is_some() {
        copies += 1;
    }
    // original + 3 retransmissions
    assert_eq!(copies, 4);

    let mut timed_out = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), events.recv()).await {
        if let TransportEvent::RetransmissionTimeout { context_id } = event {
            assert_eq!(context_id.method, Method::Options);
            assert_eq!(context_id.branch, "z9hG4bKlost");
            timed_out = true;
        }
    }
    assert!(timed_out);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn final_response_stops_retransmission() {
    let (transport, mut events) = transport().await;
    let local = transport.local_addr().unwrap();
    let (peer, peer_addr) = peer().await;

    let req = request(Method::Subscribe, "z9hG4bKsub", 4);
    transport
        .send_message(req.clone().into(), peer_addr)
        .await
        .unwrap();
    let received = recv(&peer).await.unwrap();

    let ok = SimpleResponseBuilder::response_from_request(
        received.as_request().unwrap(),
        StatusCode::OK,
        None,
    )
    .to_tag("srv")
    .build();
    peer.send_to(&ok.to_bytes(), local).await.unwrap();

    let response = next_message(&mut events).await.unwrap();
    assert_eq!(response.as_response().unwrap().status, StatusCode::OK);

    // a duplicate final response is absorbed
    peer.send_to(&ok.to_bytes(), local).await.unwrap();
    assert!(next_message(&mut events).await.is_none());

    // copies sent before the response was processed may still be queued
    let mut buf = vec![0u8; 65_535];
    while timeout(Duration::from_millis(10), peer.recv_from(&mut buf))
        .await
        .is_ok()
    {}
    let extra = timeout(Duration::from_millis(400), peer.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "request was retransmitted after final response");
    transport.close().await.unwrap();
}

#[tokio::test]
async fn invite_success_is_retransmitted_until_ack() {
    let (transport, mut events) = transport().await;
    let local = transport.local_addr().unwrap();
    let (peer, peer_addr) = peer().await;

    let invite = request(Method::Invite, "z9hG4bKinv", 1);
    peer.send_to(&invite.to_bytes(), local).await.unwrap();
    let delivered = next_message(&mut events).await.unwrap();

    let ok = SimpleResponseBuilder::response_from_request(
        delivered.as_request().unwrap(),
        StatusCode::OK,
        None,
    )
    .to_tag("callee")
    .build();
    transport.send_message(ok.into(), peer_addr).await.unwrap();

    assert!(recv(&peer).await.is_some());
    assert!(recv(&peer).await.is_some(), "2xx was not retransmitted");

    let ack = SimpleRequestBuilder::new(Method::Ack, "sip:me@127.0.0.1")
        .via("127.0.0.1:7000", "z9hG4bKack")
        .from(NameAddr::new("sip:peer@example.com").with_tag("p1"))
        .to(NameAddr::new("sip:me@example.com").with_tag("callee"))
        .call_id("transport-test")
        .cseq(1)
        .build();
    peer.send_to(&ack.to_bytes(), local).await.unwrap();
    let acked = next_message(&mut events).await.unwrap();
    assert_eq!(acked.method(), Some(Method::Ack));

    // drain anything in flight, then expect silence
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut buf = vec![0u8; 65_535];
    while timeout(Duration::from_millis(10), peer.recv_from(&mut buf))
        .await
        .is_ok()
    {}
    assert!(recv(&peer).await.is_none());
    transport.close().await.unwrap();
}

#[tokio::test]
async fn challenge_to_invite_is_acknowledged_by_transport() {
    let (transport, mut events) = transport().await;
    let local = transport.local_addr().unwrap();
    let (peer, peer_addr) = peer().await;

    let invite = request(Method::Invite, "z9hG4bKchal", 1);
    transport.send_message(invite.into(), peer_addr).await.unwrap();
    let received = recv(&peer).await.unwrap();

    let challenge = SimpleResponseBuilder::response_from_request(
        received.as_request().unwrap(),
        StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        None,
    )
    .to_tag("proxy")
    .header(HeaderName::ProxyAuthenticate, "Digest realm=\"ims\", nonce=\"n\"")
    .build();
    peer.send_to(&challenge.to_bytes(), local).await.unwrap();

    let ack = loop {
        let msg = recv(&peer).await.expect("no ACK");
        if msg.method() == Some(Method::Ack) {
            break msg;
        }
    };
    assert_eq!(ack.branch().as_deref(), Some("z9hG4bKchal"));
    assert_eq!(ack.to_tag().as_deref(), Some("proxy"));

    let delivered = next_message(&mut events).await.unwrap();
    assert_eq!(
        delivered.as_response().unwrap().status,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED
    );
    transport.close().await.unwrap();
}

#[tokio::test]
async fn malformed_datagrams_are_dropped() {
    let (transport, mut events) = transport().await;
    let local = transport.local_addr().unwrap();
    let (peer, _) = peer().await;

    // no Call-ID
    let raw = "OPTIONS sip:me@127.0.0.1 SIP/2.0\r\n\
Via: SIP/2.0/UDP 127.0.0.1:7000;branch=z9hG4bKbad\r\n\
From: <sip:peer@example.com>;tag=1\r\n\
To: <sip:me@example.com>\r\n\
CSeq: 1 OPTIONS\r\n\r\n";
    peer.send_to(raw.as_bytes(), local).await.unwrap();
    peer.send_to(b"not sip at all", local).await.unwrap();

    assert!(next_message(&mut events).await.is_none());
    assert_eq!(transport.context_count(), 0);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn close_cancels_pending_retransmissions() {
    let (transport, mut events) = transport().await;
    let (peer, peer_addr) = peer().await;

    transport
        .send_message(request(Method::Publish, "z9hG4bKpub", 1).into(), peer_addr)
        .await
        .unwrap();
    assert!(recv(&peer).await.is_some());

    transport.close().await.unwrap();
    assert!(transport.is_closed());
    assert_eq!(transport.context_count(), 0);
    assert!(recv(&peer).await.is_none());

    let err = transport
        .send_message(request(Method::Publish, "z9hG4bKpub2", 2).into(), peer_addr)
        .await;
    assert!(matches!(err, Err(Error::TransportClosed)));

    let mut saw_closed = false;
    while let Ok(Some(event)) = timeout(Duration::from_millis(100), events.recv()).await {
        if matches!(event, TransportEvent::Closed) {
            saw_closed = true;
        }
    }
    assert!(saw_closed);
}

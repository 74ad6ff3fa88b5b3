use proptest::prelude::*;
use rcs_sip_core::prelude::*;

fn render(
    method: &str,
    call_id: &str,
    seq: u32,
    routes: &[String],
    extra: &[(String, String)],
    body: &[u8],
) -> Vec<u8> {
    let mut text = format!(
        "{method} sip:peer@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bK{seq}\r\n\
From: <sip:me@example.com>;tag=f{seq}\r\n\
To: <sip:peer@example.com>\r\n\
Call-ID: {call_id}\r\n\
CSeq: {seq} {method}\r\n"
    );
    for route in routes {
        text.push_str(&format!("Route: <{route};lr>\r\n"));
    }
    for (name, value) in extra {
        text.push_str(&format!("{name}: {value}\r\n"));
    }
    text.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut bytes = text.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

proptest! {
    #[test]
    fn serialize_reproduces_parsed_bytes(
        method in prop::sample::select(vec!["INVITE", "MESSAGE", "SUBSCRIBE", "PUBLISH", "UPDATE"]),
        call_id in "[a-zA-Z0-9]{1,24}@[a-z]{1,10}",
        seq in 1u32..1_000_000,
        routes in prop::collection::vec("sip:[a-z]{1,8}\\.example\\.net", 0..3),
        extra in prop::collection::vec(("X-[A-Za-z]{1,10}", "[ -~]{0,30}"), 0..4),
        body in prop::collection::vec(any::<u8>(), 0..200),
    ) {
        let extra: Vec<(String, String)> = extra
            .into_iter()
            .map(|(n, v)| (n, v.trim().to_string()))
            .collect();
        let wire = render(method, &call_id, seq, &routes, &extra, &body);
        let msg = parse_message(&wire).unwrap();

        prop_assert_eq!(msg.call_id(), Some(call_id.as_str()));
        prop_assert_eq!(msg.cseq().map(|c| c.seq), Some(seq));
        prop_assert_eq!(msg.headers().get_all(&HeaderName::Route).len(), routes.len());
        prop_assert_eq!(&msg.body()[..], &body[..]);
        prop_assert_eq!(&msg.to_bytes()[..], &wire[..]);
    }
}

#[test]
fn parses_notify_with_subscription_state() {
    let raw = "NOTIFY sip:me@192.0.2.1:5060 SIP/2.0\r\n\
Via: SIP/2.0/UDP 198.51.100.7;branch=z9hG4bKn1\r\n\
From: <sip:buddy@example.com>;tag=srv\r\n\
To: <sip:me@example.com>;tag=local\r\n\
Call-ID: sub-1\r\n\
CSeq: 3 NOTIFY\r\n\
o: presence\r\n\
Subscription-State: terminated;reason=timeout\r\n\
Content-Type: application/pidf+xml\r\n\
Content-Length: 7\r\n\r\n<pidf/>";
    let msg = parse_message(raw.as_bytes()).unwrap();
    assert_eq!(msg.method(), Some(Method::Notify));
    assert_eq!(msg.header(&HeaderName::Event), Some("presence"));
    assert_eq!(
        msg.header(&HeaderName::SubscriptionState),
        Some("terminated;reason=timeout")
    );
    assert_eq!(msg.content_type(), Some("application/pidf+xml"));
}

#[test]
fn response_method_comes_from_cseq() {
    let raw = "SIP/2.0 407 Proxy Authentication Required\r\n\
Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bKx\r\n\
From: <sip:me@example.com>;tag=1\r\n\
To: <sip:peer@example.com>;tag=2\r\n\
Call-ID: c\r\n\
CSeq: 1 INVITE\r\n\
Proxy-Authenticate: Digest realm=\"ims\", nonce=\"abc\", qop=\"auth\"\r\n\
Content-Length: 0\r\n\r\n";
    let msg = parse_message(raw.as_bytes()).unwrap();
    let resp = msg.as_response().unwrap();
    assert_eq!(resp.status, StatusCode::PROXY_AUTHENTICATION_REQUIRED);
    assert_eq!(msg.method(), Some(Method::Invite));
    assert!(msg.header(&HeaderName::ProxyAuthenticate).unwrap().starts_with("Digest"));
}

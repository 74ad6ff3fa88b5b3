//! Retransmission and de-duplication bookkeeping
//!
//! Every outbound exchange and every inbound request gets a context keyed by
//! [`ContextId`] (top Via branch, CSeq method and number, Call-ID). The table
//! decides, without doing any I/O itself, what the UDP layer should do with a
//! datagram:
//!
//! - a retransmitted inbound request is answered by replaying the last
//!   response sent for its context and is never delivered upward twice
//! - an outbound request is resent on a doubling ladder (`t1`, `2*t1`, ...
//!   capped at `t2`) until a response stops it or `max_retransmissions` is hit
//! - a 2xx to an inbound INVITE is resent on the same ladder until the ACK
//!   with the same Call-ID and CSeq number arrives
//! - a non-2xx final response to an outbound INVITE is acknowledged here, and
//!   the ACK is replayed for each retransmission of that response
//!
//! Contexts without a running ladder expire `context_lifetime` after their
//! last activity.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use rcs_sip_core::prelude::*;

/// Retransmission timer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmissionConfig {
    /// First retransmission interval (RFC 3261 T1)
    pub t1: Duration,
    /// Interval cap (RFC 3261 T2)
    pub t2: Duration,
    /// Resends before the exchange is reported as timed out
    pub max_retransmissions: u32,
    /// How long an idle context is kept for de-duplication
    pub context_lifetime: Duration,
}

impl Default for RetransmissionConfig {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            max_retransmissions: 10,
            context_lifetime: Duration::from_secs(32),
        }
    }
}

impl RetransmissionConfig {
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    pub fn with_t2(mut self, t2: Duration) -> Self {
        self.t2 = t2;
        self
    }

    pub fn with_max_retransmissions(mut self, max: u32) -> Self {
        self.max_retransmissions = max;
        self
    }

    pub fn with_context_lifetime(mut self, lifetime: Duration) -> Self {
        self.context_lifetime = lifetime;
        self
    }

    /// Next interval of the doubling ladder
    pub fn next_interval(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.t2)
    }
}

/// Transport-level identity of one exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId {
    /// Branch of the topmost Via, empty when absent
    pub branch: String,
    /// CSeq method
    pub method: Method,
    pub call_id: String,
    /// CSeq number
    pub seq: u32,
}

impl ContextId {
    /// Derives the context id of a request or response; `None` when Call-ID
    /// or CSeq are missing.
    pub fn from_message<M: HeaderAccess>(message: &M) -> Option<Self> {
        let cseq = message.cseq()?;
        Some(Self {
            branch: message.branch().unwrap_or_default(),
            method: cseq.method,
            call_id: message.call_id()?.to_string(),
            seq: cseq.seq,
        })
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}/{}", self.call_id, self.method, self.seq, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// We sent the request
    Outbound,
    /// The peer sent the request
    Inbound,
}

type Datagram = (Bytes, SocketAddr);

struct Context {
    role: Role,
    /// Bytes currently on the retransmission ladder
    pending: Option<Datagram>,
    /// Outbound request, kept to build the ACK for a non-2xx final response
    request: Option<Request>,
    /// Last message received for this context
    incoming: Option<Message>,
    final_status: Option<StatusCode>,
    /// Last response we sent for an inbound request
    last_response: Option<Datagram>,
    /// ACK sent for the final response of an outbound INVITE
    ack: Option<Datagram>,
    attempts: u32,
    interval: Duration,
    timer: Option<JoinHandle<()>>,
    touched: Instant,
}

impl Context {
    fn new(role: Role, t1: Duration) -> Self {
        Self {
            role,
            pending: None,
            request: None,
            incoming: None,
            final_status: None,
            last_response: None,
            ack: None,
            attempts: 0,
            interval: t1,
            timer: None,
            touched: Instant::now(),
        }
    }

    fn stop_ladder(&mut self) {
        self.pending = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// What to do with an inbound request
#[derive(Debug, PartialEq, Eq)]
pub enum InboundRequestAction {
    /// First sight: hand it to the upper layer
    Deliver,
    /// Retransmission: resend the stored response
    Replay(Bytes, SocketAddr),
    /// Retransmission of a request still being processed, or a repeated ACK
    Absorb,
}

/// What to do with an inbound response
#[derive(Debug, PartialEq, Eq)]
pub enum InboundResponseAction {
    /// Hand it to the upper layer, sending the given ACK first
    Deliver { ack: Option<(Bytes, SocketAddr)> },
    /// Retransmitted final response to an INVITE we already acknowledged
    ReplayAck(Bytes, SocketAddr),
    /// Late or duplicate response
    Absorb,
}

/// What to do with a response we are about to send
#[derive(Debug, PartialEq, Eq)]
pub enum OutboundResponseAction {
    Send,
    /// 2xx to INVITE: send and start a ladder timer
    Retransmit,
    /// Provisional response after the final one
    Suppress,
}

/// Outcome of a ladder tick
#[derive(Debug, PartialEq, Eq)]
pub enum FireAction {
    Resend {
        bytes: Bytes,
        destination: SocketAddr,
        next: Duration,
    },
    /// Ceiling reached; the exchange has failed
    TimedOut,
    /// The context is gone or no longer retransmitting
    Stop,
}

/// The de-duplication / retransmission table, guarded by a single lock
pub struct RetransmissionTable {
    config: RetransmissionConfig,
    contexts: Mutex<HashMap<ContextId, Context>>,
}

impl RetransmissionTable {
    pub fn new(config: RetransmissionConfig) -> Self {
        Self {
            config,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetransmissionConfig {
        &self.config
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    /// Registers an outbound request; the caller must start a ladder timer.
    pub fn register_outbound_request(
        &self,
        id: ContextId,
        request: &Request,
        bytes: Bytes,
        destination: SocketAddr,
    ) {
        let mut context = Context::new(Role::Outbound, self.config.t1);
        context.pending = Some((bytes, destination));
        context.request = Some(request.clone());
        if let Some(mut previous) = self.contexts.lock().insert(id, context) {
            previous.stop_ladder();
        }
    }

    /// Records a response we are sending for an inbound request.
    ///
    /// A provisional response after a final one is suppressed so that a
    /// retransmitted request keeps getting the final answer.
    pub fn register_response(
        &self,
        id: ContextId,
        response: &Response,
        bytes: Bytes,
        destination: SocketAddr,
    ) -> OutboundResponseAction {
        let mut contexts = self.contexts.lock();
        let context = contexts
            .entry(id.clone())
            .or_insert_with(|| Context::new(Role::Inbound, self.config.t1));
        if context.final_status.is_some() && response.status.is_provisional() {
            return OutboundResponseAction::Suppress;
        }
        context.touched = Instant::now();
        context.last_response = Some((bytes.clone(), destination));
        if response.status.is_final() {
            context.final_status = Some(response.status);
        }
        if id.method == Method::Invite && response.status.is_success() {
            context.stop_ladder();
            context.pending = Some((bytes, destination));
            context.attempts = 0;
            context.interval = self.config.t1;
            return OutboundResponseAction::Retransmit;
        }
        OutboundResponseAction::Send
    }

    /// Remembers an ACK we sent so that a retransmitted 2xx can be
    /// acknowledged again without involving the upper layers.
    pub fn note_outbound_ack(&self, call_id: &str, seq: u32, bytes: Bytes, destination: SocketAddr) {
        let mut contexts = self.contexts.lock();
        for (id, context) in contexts.iter_mut() {
            if context.role == Role::Outbound
                && id.method == Method::Invite
                && id.call_id == call_id
                && id.seq == seq
            {
                context.ack = Some((bytes.clone(), destination));
                context.touched = Instant::now();
            }
        }
    }

    pub fn on_inbound_request(&self, id: &ContextId, request: &Request) -> InboundRequestAction {
        let mut contexts = self.contexts.lock();

        if request.method == Method::Ack {
            for (key, context) in contexts.iter_mut() {
                if context.role == Role::Inbound
                    && key.method == Method::Invite
                    && key.call_id == id.call_id
                    && key.seq == id.seq
                    && context.pending.is_some()
                {
                    debug!("ACK received, stopping 2xx retransmission for {}", key);
                    context.stop_ladder();
                    context.touched = Instant::now();
                }
            }
        }

        if let Some(context) = contexts.get_mut(id) {
            if context.role == Role::Inbound {
                context.touched = Instant::now();
                return match &context.last_response {
                    Some((bytes, destination)) => {
                        InboundRequestAction::Replay(bytes.clone(), *destination)
                    }
                    None => InboundRequestAction::Absorb,
                };
            }
        }

        let mut context = Context::new(Role::Inbound, self.config.t1);
        context.incoming = Some(Message::Request(request.clone()));
        contexts.insert(id.clone(), context);
        InboundRequestAction::Deliver
    }

    pub fn on_inbound_response(&self, id: &ContextId, response: &Response) -> InboundResponseAction {
        let mut contexts = self.contexts.lock();
        let context = match contexts.get_mut(id) {
            Some(context) if context.role == Role::Outbound => context,
            _ => return InboundResponseAction::Deliver { ack: None },
        };
        context.touched = Instant::now();

        if response.status.is_provisional() {
            if context.final_status.is_some() {
                return InboundResponseAction::Absorb;
            }
            if id.method == Method::Invite {
                context.stop_ladder();
            } else if context.pending.is_some() {
                context.interval = self.config.t2;
            }
            context.incoming = Some(Message::Response(response.clone()));
            return InboundResponseAction::Deliver { ack: None };
        }

        if context.final_status.is_some() {
            return match &context.ack {
                Some((bytes, destination)) => {
                    InboundResponseAction::ReplayAck(bytes.clone(), *destination)
                }
                None => InboundResponseAction::Absorb,
            };
        }

        context.final_status = Some(response.status);
        context.incoming = Some(Message::Response(response.clone()));
        let destination = context.pending.as_ref().map(|(_, d)| *d);
        context.stop_ladder();

        let mut ack = None;
        if id.method == Method::Invite && !response.status.is_success() {
            if let (Some(request), Some(destination)) = (&context.request, destination) {
                let bytes = non_success_ack(request, response).to_bytes();
                context.ack = Some((bytes.clone(), destination));
                ack = Some((bytes, destination));
            }
        }
        InboundResponseAction::Deliver { ack }
    }

    /// Attaches the ladder task of a context
    pub fn set_timer(&self, id: &ContextId, timer: JoinHandle<()>) {
        match self.contexts.lock().get_mut(id) {
            Some(context) if context.pending.is_some() => {
                if let Some(old) = context.timer.replace(timer) {
                    old.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    /// One ladder tick for `id`
    pub fn fire(&self, id: &ContextId) -> FireAction {
        let mut contexts = self.contexts.lock();
        let Some(context) = contexts.get_mut(id) else {
            return FireAction::Stop;
        };
        let Some((bytes, destination)) = context.pending.clone() else {
            return FireAction::Stop;
        };
        if context.attempts >= self.config.max_retransmissions {
            context.pending = None;
            context.timer = None;
            context.touched = Instant::now();
            return FireAction::TimedOut;
        }
        context.attempts += 1;
        context.interval = self.config.next_interval(context.interval);
        trace!("retransmission {} for {}", context.attempts, id);
        FireAction::Resend {
            bytes,
            destination,
            next: context.interval,
        }
    }

    /// Stops the ladder of `id`; the context stays for de-duplication
    pub fn cancel(&self, id: &ContextId) {
        if let Some(context) = self.contexts.lock().get_mut(id) {
            context.stop_ladder();
            context.touched = Instant::now();
        }
    }

    /// Drops idle contexts older than `context_lifetime`
    pub fn purge_expired(&self, now: Instant) -> usize {
        let lifetime = self.config.context_lifetime;
        let mut contexts = self.contexts.lock();
        let before = contexts.len();
        contexts.retain(|_, c| c.pending.is_some() || now.duration_since(c.touched) < lifetime);
        before - contexts.len()
    }

    /// Removes every context and aborts every ladder
    pub fn clear(&self) {
        let mut contexts = self.contexts.lock();
        for (_, mut context) in contexts.drain() {
            context.stop_ladder();
        }
    }
}

/// ACK for a non-2xx final response (RFC 3261 17.1.1.3)
fn non_success_ack(invite: &Request, response: &Response) -> Request {
    let mut ack = Request::new(Method::Ack, invite.uri.clone());
    if let Some(via) = invite.headers.get(&HeaderName::Via) {
        ack.headers.push(HeaderName::Via, via);
    }
    for route in invite.headers.get_all(&HeaderName::Route) {
        ack.headers.push(HeaderName::Route, route);
    }
    ack.headers.push(HeaderName::MaxForwards, "70");
    if let Some(from) = invite.header(&HeaderName::From) {
        ack.headers.push(HeaderName::From, from);
    }
    if let Some(to) = response.header(&HeaderName::To) {
        ack.headers.push(HeaderName::To, to);
    }
    if let Some(call_id) = invite.call_id() {
        ack.headers.push(HeaderName::CallId, call_id);
    }
    if let Some(cseq) = invite.cseq() {
        ack.headers
            .push(HeaderName::CSeq, CSeq::new(cseq.seq, Method::Ack).to_string());
    }
    ack.headers.push(HeaderName::ContentLength, "0");
    ack
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    fn request(method: Method, branch: &str, seq: u32) -> Request {
        SimpleRequestBuilder::new(method, "sip:bob@example.com")
            .via("127.0.0.1:5070", branch)
            .from(NameAddr::new("sip:alice@example.com").with_tag("a"))
            .to(NameAddr::new("sip:bob@example.com"))
            .call_id("call-1")
            .cseq(seq)
            .build()
    }

    fn response(req: &Request, status: StatusCode) -> Response {
        SimpleResponseBuilder::response_from_request(req, status, None)
            .to_tag("b")
            .build()
    }

    fn table() -> RetransmissionTable {
        RetransmissionTable::new(RetransmissionConfig::default().with_max_retransmissions(3))
    }

    #[test]
    fn test_ladder_doubles_then_caps_then_times_out() {
        let table = table();
        let req = request(Method::Options, "z9hG4bK1", 1);
        let id = ContextId::from_message(&req).unwrap();
        table.register_outbound_request(id.clone(), &req, req.to_bytes(), addr());

        let mut intervals = Vec::new();
        while let FireAction::Resend { next, .. } = table.fire(&id) {
            intervals.push(next);
        }
        assert_eq!(
            intervals,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(table.fire(&id), FireAction::Stop);
    }

    #[test]
    fn test_retransmitted_request_replays_last_response() {
        let table = table();
        let req = request(Method::Message, "z9hG4bK2", 5);
        let id = ContextId::from_message(&req).unwrap();

        assert_eq!(table.on_inbound_request(&id, &req), InboundRequestAction::Deliver);
        assert_eq!(table.on_inbound_request(&id, &req), InboundRequestAction::Absorb);

        let resp = response(&req, StatusCode::OK);
        assert_eq!(
            table.register_response(id.clone(), &resp, resp.to_bytes(), addr()),
            OutboundResponseAction::Send
        );
        assert_eq!(
            table.on_inbound_request(&id, &req),
            InboundRequestAction::Replay(resp.to_bytes(), addr())
        );
    }

    #[test]
    fn test_invite_success_retransmits_until_ack() {
        let table = table();
        let invite = request(Method::Invite, "z9hG4bK3", 1);
        let id = ContextId::from_message(&invite).unwrap();
        table.on_inbound_request(&id, &invite);

        let ok = response(&invite, StatusCode::OK);
        assert_eq!(
            table.register_response(id.clone(), &ok, ok.to_bytes(), addr()),
            OutboundResponseAction::Retransmit
        );
        assert!(matches!(table.fire(&id), FireAction::Resend { .. }));

        let ack = request(Method::Ack, "z9hG4bKnew", 1);
        let ack_id = ContextId::from_message(&ack).unwrap();
        assert_eq!(table.on_inbound_request(&ack_id, &ack), InboundRequestAction::Deliver);
        assert_eq!(table.fire(&id), FireAction::Stop);
        assert_eq!(table.on_inbound_request(&ack_id, &ack), InboundRequestAction::Absorb);
    }

    #[test]
    fn test_late_provisional_keeps_final_for_replay() {
        let table = table();
        let invite = request(Method::Invite, "z9hG4bK9", 1);
        let id = ContextId::from_message(&invite).unwrap();
        assert_eq!(table.on_inbound_request(&id, &invite), InboundRequestAction::Deliver);

        let terminated = response(&invite, StatusCode::REQUEST_TERMINATED);
        assert_eq!(
            table.register_response(id.clone(), &terminated, terminated.to_bytes(), addr()),
            OutboundResponseAction::Send
        );
        let ringing = response(&invite, StatusCode::RINGING);
        assert_eq!(
            table.register_response(id.clone(), &ringing, ringing.to_bytes(), addr()),
            OutboundResponseAction::Suppress
        );

        match table.on_inbound_request(&id, &invite) {
            InboundRequestAction::Replay(bytes, _) => {
                let replayed = parse_message(&bytes).unwrap();
                assert_eq!(replayed.as_response().unwrap().status, StatusCode::REQUEST_TERMINATED);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_provisional_response_handling() {
        let table = table();
        let invite = request(Method::Invite, "z9hG4bK4", 1);
        let invite_id = ContextId::from_message(&invite).unwrap();
        table.register_outbound_request(invite_id.clone(), &invite, invite.to_bytes(), addr());
        let ringing = response(&invite, StatusCode::RINGING);
        assert_eq!(
            table.on_inbound_response(&invite_id, &ringing),
            InboundResponseAction::Deliver { ack: None }
        );
        assert_eq!(table.fire(&invite_id), FireAction::Stop);

        let options = request(Method::Options, "z9hG4bK5", 2);
        let options_id = ContextId::from_message(&options).unwrap();
        table.register_outbound_request(options_id.clone(), &options, options.to_bytes(), addr());
        table.on_inbound_response(&options_id, &response(&options, StatusCode::TRYING));
        match table.fire(&options_id) {
            FireAction::Resend { next, .. } => assert_eq!(next, Duration::from_secs(4)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_success_final_to_invite_is_acknowledged_once() {
        let table = table();
        let invite = request(Method::Invite, "z9hG4bK6", 1);
        let id = ContextId::from_message(&invite).unwrap();
        table.register_outbound_request(id.clone(), &invite, invite.to_bytes(), addr());

        let challenge = response(&invite, StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        let ack = match table.on_inbound_response(&id, &challenge) {
            InboundResponseAction::Deliver { ack: Some((bytes, _)) } => bytes,
            other => panic!("unexpected {:?}", other),
        };
        let parsed = parse_message(&ack).unwrap();
        assert_eq!(parsed.method(), Some(Method::Ack));
        assert_eq!(parsed.branch().as_deref(), Some("z9hG4bK6"));
        assert_eq!(parsed.to_tag().as_deref(), Some("b"));

        assert_eq!(
            table.on_inbound_response(&id, &challenge),
            InboundResponseAction::ReplayAck(ack, addr())
        );
    }

    #[test]
    fn test_purge_keeps_active_ladders() {
        let table = table();
        let req = request(Method::Subscribe, "z9hG4bK7", 1);
        let id = ContextId::from_message(&req).unwrap();
        table.register_outbound_request(id.clone(), &req, req.to_bytes(), addr());
        let other = request(Method::Notify, "z9hG4bK8", 1);
        table.on_inbound_request(&ContextId::from_message(&other).unwrap(), &other);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(table.purge_expired(later), 1);
        assert_eq!(table.len(), 1);
        table.cancel(&id);
        assert_eq!(table.purge_expired(later), 1);
        assert!(table.is_empty());
    }
}

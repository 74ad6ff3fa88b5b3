//! The dialog path
//!
//! One ongoing conversation's identifiers and routing. A [`DialogPath`] is
//! owned by exactly one session and advanced both by the requests it sends
//! and by the responses it receives.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rcs_sip_core::{split_header_list, HeaderAccess, HeaderName, NameAddr, Request, Response};

use super::dialog_state::DialogState;
use super::utils::generate_tag;
use crate::error::{DialogError, DialogResult};

/// Identifiers and route set of one dialog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogPath {
    /// Fixed at construction
    call_id: String,

    /// Tag we put in From (originating) or To (terminating)
    pub local_tag: String,

    /// Set by the first response or taken from the initiating request
    remote_tag: Option<String>,

    /// Our address-of-record
    pub local_uri: String,

    /// The peer's address-of-record
    pub remote_uri: String,

    /// Our Contact
    pub local_target: String,

    /// Where in-dialog requests are addressed, updated from the peer's Contact
    pub remote_target: String,

    /// Last sequence number we used
    local_cseq: u32,

    /// Last sequence number the peer used
    pub remote_cseq: u32,

    /// Route set in the order requests traverse it
    route_set: Vec<String>,

    route_established: bool,

    /// Negotiated session interval, in seconds
    pub session_expires: Option<u32>,

    pub state: DialogState,

    /// Whether we sent the initiating request
    is_originating: bool,

    /// Source of the initiating request, for the terminating side's responses
    pub remote_addr: Option<SocketAddr>,
}

impl DialogPath {
    /// Starts a dialog we initiate. The first request uses sequence number 1.
    pub fn originating(
        call_id: impl Into<String>,
        local_uri: impl Into<String>,
        remote_uri: impl Into<String>,
        local_contact: impl Into<String>,
    ) -> Self {
        let remote_uri = remote_uri.into();
        Self {
            call_id: call_id.into(),
            local_tag: generate_tag(),
            remote_tag: None,
            local_uri: local_uri.into(),
            remote_target: remote_uri.clone(),
            remote_uri,
            local_target: local_contact.into(),
            local_cseq: 1,
            remote_cseq: 0,
            route_set: Vec::new(),
            route_established: false,
            session_expires: None,
            state: DialogState::Early,
            is_originating: true,
            remote_addr: None,
        }
    }

    /// Builds the dialog an inbound initiating request asks for.
    ///
    /// The route set is the request's Record-Route in order, the remote
    /// target its Contact, and a fresh local tag is generated.
    pub fn terminating(request: &Request, local_contact: impl Into<String>) -> DialogResult<Self> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::ProtocolError("missing Call-ID".into()))?;
        let from = request
            .from_addr()
            .ok_or_else(|| DialogError::ProtocolError("missing From".into()))?;
        let to = request
            .to_addr()
            .ok_or_else(|| DialogError::ProtocolError("missing To".into()))?;
        let cseq = request
            .cseq()
            .ok_or_else(|| DialogError::ProtocolError("missing CSeq".into()))?;

        let remote_target = request.contact_uri().unwrap_or_else(|| from.uri.clone());
        let route_set = collect_routes(request);

        Ok(Self {
            call_id: call_id.to_string(),
            local_tag: generate_tag(),
            remote_tag: from.tag().map(str::to_string),
            local_uri: to.uri,
            remote_uri: from.uri,
            local_target: local_contact.into(),
            remote_target,
            local_cseq: 0,
            remote_cseq: cseq.seq,
            route_set,
            route_established: true,
            session_expires: None,
            state: DialogState::Early,
            is_originating: false,
            remote_addr: None,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    pub fn local_cseq(&self) -> u32 {
        self.local_cseq
    }

    pub fn route_set(&self) -> &[String] {
        &self.route_set
    }

    pub fn is_originating(&self) -> bool {
        self.is_originating
    }

    /// Advances and returns the local sequence number.
    ///
    /// Call before building every request after the first.
    pub fn increment_sequence(&mut self) -> u32 {
        self.local_cseq += 1;
        self.local_cseq
    }

    /// Sets the remote tag unless one is already known
    pub fn set_remote_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        match &self.remote_tag {
            None => {
                debug!("Dialog {} remote tag {}", self.call_id, tag);
                self.remote_tag = Some(tag);
                true
            }
            Some(existing) => {
                if *existing != tag {
                    warn!(
                        "Dialog {} ignoring remote tag {} (already {})",
                        self.call_id, tag, existing
                    );
                }
                false
            }
        }
    }

    /// Learns tag, target and route set from a response to our request.
    ///
    /// The route set is stored the first time a provisional response carries
    /// Record-Route, or on the first success response. Returns whether it
    /// was stored by this call.
    pub fn apply_route_from_response(&mut self, response: &Response) -> bool {
        let status = response.status;
        let dialog_forming = status.is_success() || (status.is_provisional() && status.as_u16() > 100);
        if !dialog_forming {
            return false;
        }

        if let Some(tag) = response.to_tag() {
            self.set_remote_tag(tag);
        }
        if self.is_originating {
            if let Some(contact) = response.contact_uri() {
                self.remote_target = contact;
            }
        }

        if self.route_established {
            return false;
        }
        let mut routes = collect_routes(response);
        if routes.is_empty() && !status.is_success() {
            return false;
        }
        if self.is_originating {
            routes.reverse();
        }
        debug!("Dialog {} route set {:?}", self.call_id, routes);
        self.route_set = routes;
        self.route_established = true;
        true
    }

    /// Checks an in-dialog request's sequence number and records it.
    ///
    /// Returns `false` for a number at or below the last one seen.
    pub fn accept_remote_sequence(&mut self, seq: u32) -> bool {
        if seq <= self.remote_cseq {
            return false;
        }
        self.remote_cseq = seq;
        true
    }

    /// Whether `request` belongs to this dialog
    pub fn matches(&self, request: &Request) -> bool {
        if request.call_id() != Some(self.call_id.as_str()) {
            return false;
        }
        if request.to_tag().as_deref() != Some(self.local_tag.as_str()) {
            return false;
        }
        match (&self.remote_tag, request.from_tag()) {
            (Some(expected), Some(actual)) => *expected == actual,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    /// Request-URI for the next in-dialog request.
    ///
    /// With a strict first hop (no `lr`) the request is addressed to that hop.
    pub fn request_uri(&self) -> String {
        match self.strict_first_hop() {
            Some(first) => first,
            None => self.remote_target.clone(),
        }
    }

    /// Route header values for the next in-dialog request
    pub fn route_headers(&self) -> Vec<String> {
        if self.strict_first_hop().is_some() {
            let mut routes: Vec<String> = self.route_set.iter().skip(1).cloned().collect();
            routes.push(format!("<{}>", self.remote_target));
            routes
        } else {
            self.route_set.clone()
        }
    }

    /// Local party for From (originating) or To (terminating)
    pub fn local_party(&self) -> NameAddr {
        NameAddr::new(self.local_uri.clone()).with_tag(self.local_tag.clone())
    }

    /// Remote party, tagged once the tag is known
    pub fn remote_party(&self) -> NameAddr {
        let addr = NameAddr::new(self.remote_uri.clone());
        match &self.remote_tag {
            Some(tag) => addr.with_tag(tag.clone()),
            None => addr,
        }
    }

    /// Forgets what provisional responses taught us once the initiating
    /// request failed, so a resent request starts a fresh early dialog.
    /// No effect outside the Early state.
    pub fn reset_early(&mut self) {
        if self.state != DialogState::Early || !self.is_originating {
            return;
        }
        self.remote_tag = None;
        self.remote_target = self.remote_uri.clone();
        self.route_set.clear();
        self.route_established = false;
    }

    pub fn confirm(&mut self) {
        if self.state == DialogState::Early {
            self.state = DialogState::Confirmed;
        }
    }

    pub fn terminate(&mut self) {
        self.state = DialogState::Terminated;
    }

    fn strict_first_hop(&self) -> Option<String> {
        let first = self.route_set.first()?;
        let addr: NameAddr = first.parse().ok()?;
        if addr.uri.contains(";lr") || addr.param("lr").is_some() {
            None
        } else {
            Some(addr.uri)
        }
    }
}

fn collect_routes<M: HeaderAccess>(message: &M) -> Vec<String> {
    message
        .headers()
        .get_all(&HeaderName::RecordRoute)
        .into_iter()
        .flat_map(split_header_list)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_sip_core::prelude::*;

    fn invite_from_peer() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:alice@10.0.0.1")
            .via("10.0.0.9:5060", "z9hG4bKpeer")
            .from(NameAddr::new("sip:bob@example.com").with_tag("bobtag"))
            .to(NameAddr::new("sip:alice@example.com"))
            .call_id("path-test")
            .cseq(7)
            .contact("sip:bob@10.0.0.9:5060")
            .header(HeaderName::RecordRoute, "<sip:p1.example.com;lr>")
            .header(HeaderName::RecordRoute, "<sip:p2.example.com;lr>")
            .build()
    }

    fn response_to_our_invite(path: &DialogPath, status: StatusCode) -> Response {
        let invite = SimpleRequestBuilder::new(Method::Invite, path.remote_uri.clone())
            .via("10.0.0.1:5060", "z9hG4bKours")
            .from(path.local_party())
            .to(path.remote_party())
            .call_id(path.call_id())
            .cseq(path.local_cseq())
            .header(HeaderName::RecordRoute, "<sip:p1.example.com;lr>, <sip:p2.example.com;lr>")
            .build();
        SimpleResponseBuilder::response_from_request(&invite, status, None)
            .to_tag("remote1")
            .contact("sip:bob@10.0.0.9:5060")
            .build()
    }

    #[test]
    fn test_sequence_is_strictly_increasing() {
        let mut path = DialogPath::originating(
            "seq-test",
            "sip:alice@example.com",
            "sip:bob@example.com",
            "sip:alice@10.0.0.1:5060",
        );
        let mut last = path.local_cseq();
        for _ in 0..20 {
            let next = path.increment_sequence();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_remote_tag_is_set_once() {
        let mut path = DialogPath::originating("t", "sip:a@x", "sip:b@x", "sip:a@1.2.3.4");
        assert!(path.set_remote_tag("first"));
        assert!(!path.set_remote_tag("second"));
        assert_eq!(path.remote_tag(), Some("first"));
    }

    #[test]
    fn test_originating_route_set_is_reversed_and_stored_once() {
        let mut path = DialogPath::originating(
            "path-test",
            "sip:alice@example.com",
            "sip:bob@example.com",
            "sip:alice@10.0.0.1:5060",
        );
        let trying = response_to_our_invite(&path, StatusCode::TRYING);
        assert!(!path.apply_route_from_response(&trying));
        assert!(path.remote_tag().is_none());

        let ringing = response_to_our_invite(&path, StatusCode::RINGING);
        assert!(path.apply_route_from_response(&ringing));
        assert_eq!(path.remote_tag(), Some("remote1"));
        assert_eq!(
            path.route_set(),
            &["<sip:p2.example.com;lr>".to_string(), "<sip:p1.example.com;lr>".to_string()]
        );
        assert_eq!(path.remote_target, "sip:bob@10.0.0.9:5060");

        let ok = response_to_our_invite(&path, StatusCode::OK);
        assert!(!path.apply_route_from_response(&ok));
        assert_eq!(path.request_uri(), "sip:bob@10.0.0.9:5060");
        assert_eq!(path.route_headers().len(), 2);
    }

    #[test]
    fn test_reset_early_forgets_provisional_state() {
        let mut path = DialogPath::originating(
            "path-test",
            "sip:alice@example.com",
            "sip:bob@example.com",
            "sip:alice@10.0.0.1:5060",
        );
        let ringing = response_to_our_invite(&path, StatusCode::RINGING);
        path.apply_route_from_response(&ringing);
        path.reset_early();
        assert!(path.remote_tag().is_none());
        assert!(path.route_set().is_empty());
        assert_eq!(path.remote_target, "sip:bob@example.com");

        let ok = response_to_our_invite(&path, StatusCode::OK);
        assert!(path.apply_route_from_response(&ok));
        path.confirm();
        path.reset_early();
        assert_eq!(path.remote_tag(), Some("remote1"));
    }

    #[test]
    fn test_terminating_path_from_invite() {
        let path = DialogPath::terminating(&invite_from_peer(), "sip:alice@10.0.0.1:5060").unwrap();
        assert_eq!(path.call_id(), "path-test");
        assert_eq!(path.remote_tag(), Some("bobtag"));
        assert_eq!(path.remote_cseq, 7);
        assert_eq!(path.remote_target, "sip:bob@10.0.0.9:5060");
        assert_eq!(path.route_set()[0], "<sip:p1.example.com;lr>");
        assert!(!path.is_originating());
        assert_eq!(path.local_tag.len(), 8);
    }

    #[test]
    fn test_strict_route_becomes_request_uri() {
        let mut path = DialogPath::terminating(&invite_from_peer(), "sip:alice@10.0.0.1").unwrap();
        path.route_set = vec!["<sip:strict.example.com>".into(), "<sip:p2.example.com;lr>".into()];
        assert_eq!(path.request_uri(), "sip:strict.example.com");
        assert_eq!(
            path.route_headers(),
            vec!["<sip:p2.example.com;lr>".to_string(), "<sip:bob@10.0.0.9:5060>".to_string()]
        );
    }

    #[test]
    fn test_matches_and_remote_sequence() {
        let mut path = DialogPath::terminating(&invite_from_peer(), "sip:alice@10.0.0.1").unwrap();
        let bye = SimpleRequestBuilder::new(Method::Bye, "sip:alice@10.0.0.1")
            .via("10.0.0.9:5060", "z9hG4bKbye")
            .from(NameAddr::new("sip:bob@example.com").with_tag("bobtag"))
            .to(NameAddr::new("sip:alice@example.com").with_tag(path.local_tag.clone()))
            .call_id("path-test")
            .cseq(8)
            .build();
        assert!(path.matches(&bye));
        assert!(path.accept_remote_sequence(8));
        assert!(!path.accept_remote_sequence(8));
    }
}

//! Request and response construction for dialogs
//!
//! [`RequestFactory`] knows our transport address and User-Agent and builds
//! every message a session sends: in-dialog requests from a [`DialogPath`],
//! the ACK for a 2xx, CANCEL for a pending INVITE, out-of-dialog requests and
//! responses to inbound requests.

use std::net::SocketAddr;

use rcs_sip_core::prelude::*;

use super::dialog_path::DialogPath;
use super::utils::generate_branch;
use crate::error::{DialogError, DialogResult};

/// Max-Forwards on every request we originate
pub const DEFAULT_MAX_FORWARDS: u32 = 70;

/// Builds the messages of one user agent
#[derive(Debug, Clone)]
pub struct RequestFactory {
    sent_by: String,
    user_agent: String,
}

impl RequestFactory {
    pub fn new(local_addr: SocketAddr, user_agent: impl Into<String>) -> Self {
        Self {
            sent_by: local_addr.to_string(),
            user_agent: user_agent.into(),
        }
    }

    /// host:port placed in Via
    pub fn sent_by(&self) -> &str {
        &self.sent_by
    }

    /// Our Contact URI for `user`
    pub fn contact_for(&self, user: &str) -> String {
        format!("sip:{}@{}", user, self.sent_by)
    }

    /// Starts an in-dialog request using the dialog's current sequence
    /// number. Callers add a body or extra headers before building.
    pub fn in_dialog(&self, dialog: &DialogPath, method: Method) -> SimpleRequestBuilder {
        let refreshes_target = matches!(
            method,
            Method::Invite | Method::Update | Method::Subscribe | Method::Notify
        );

        let mut builder = SimpleRequestBuilder::new(method, dialog.request_uri())
            .via(&self.sent_by, &generate_branch())
            .from(dialog.local_party())
            .to(dialog.remote_party())
            .call_id(dialog.call_id())
            .cseq(dialog.local_cseq())
            .max_forwards(DEFAULT_MAX_FORWARDS);
        for route in dialog.route_headers() {
            builder = builder.route(&route);
        }
        if refreshes_target {
            builder = builder.contact(&dialog.local_target);
        }
        builder.header(HeaderName::UserAgent, self.user_agent.as_str())
    }

    pub fn create_request(&self, dialog: &DialogPath, method: Method) -> Request {
        self.in_dialog(dialog, method).build()
    }

    /// ACK for a 2xx to the INVITE numbered `seq`; a new transaction
    pub fn create_ack(&self, dialog: &DialogPath, seq: u32) -> Request {
        let mut builder = SimpleRequestBuilder::new(Method::Ack, dialog.request_uri())
            .via(&self.sent_by, &generate_branch())
            .from(dialog.local_party())
            .to(dialog.remote_party())
            .call_id(dialog.call_id())
            .cseq(seq)
            .max_forwards(DEFAULT_MAX_FORWARDS);
        for route in dialog.route_headers() {
            builder = builder.route(&route);
        }
        builder.build()
    }

    /// CANCEL for a pending INVITE: same Request-URI, top Via, From, To,
    /// Call-ID, Route and CSeq number
    pub fn create_cancel(&self, invite: &Request) -> DialogResult<Request> {
        if invite.method != Method::Invite {
            return Err(DialogError::InvalidState(format!(
                "cannot cancel a {} request",
                invite.method
            )));
        }
        let missing = |name: &str| DialogError::ProtocolError(format!("INVITE without {}", name));
        let via = invite.via().ok_or_else(|| missing("Via"))?;
        let from = invite.header(&HeaderName::From).ok_or_else(|| missing("From"))?;
        let to = invite.header(&HeaderName::To).ok_or_else(|| missing("To"))?;
        let call_id = invite.call_id().ok_or_else(|| missing("Call-ID"))?;
        let cseq = invite.cseq().ok_or_else(|| missing("CSeq"))?;

        let mut cancel = Request::new(Method::Cancel, invite.uri.clone());
        let headers = &mut cancel.headers;
        headers.push(HeaderName::Via, via.to_string());
        headers.push(HeaderName::From, from);
        headers.push(HeaderName::To, to);
        headers.push(HeaderName::CallId, call_id);
        headers.push(HeaderName::CSeq, CSeq::new(cseq.seq, Method::Cancel).to_string());
        headers.push(HeaderName::MaxForwards, DEFAULT_MAX_FORWARDS.to_string());
        for route in invite.headers.get_all(&HeaderName::Route) {
            headers.push(HeaderName::Route, route);
        }
        Ok(SimpleRequestBuilder::from_request(cancel).build())
    }

    /// Starts a request outside any dialog (MESSAGE, PUBLISH, OPTIONS, or
    /// the initiating request of a new dialog)
    pub fn out_of_dialog(
        &self,
        method: Method,
        target: &str,
        from: NameAddr,
        call_id: &str,
        seq: u32,
    ) -> SimpleRequestBuilder {
        SimpleRequestBuilder::new(method, target)
            .via(&self.sent_by, &generate_branch())
            .from(from)
            .to(NameAddr::new(target))
            .call_id(call_id)
            .cseq(seq)
            .max_forwards(DEFAULT_MAX_FORWARDS)
            .header(HeaderName::UserAgent, self.user_agent.as_str())
    }

    /// Starts a response to `request`, tagging To with `local_tag`
    pub fn create_response(
        &self,
        request: &Request,
        status: StatusCode,
        local_tag: Option<&str>,
    ) -> SimpleResponseBuilder {
        let mut builder = SimpleResponseBuilder::response_from_request(request, status, None);
        if let Some(tag) = local_tag {
            if status.as_u16() > 100 {
                builder = builder.to_tag(tag);
            }
        }
        builder.header(HeaderName::Server, self.user_agent.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> RequestFactory {
        RequestFactory::new("10.0.0.1:5060".parse().unwrap(), "test-agent")
    }

    fn dialog() -> DialogPath {
        DialogPath::originating(
            "factory-test",
            "sip:alice@example.com",
            "sip:bob@example.com",
            "sip:alice@10.0.0.1:5060",
        )
    }

    #[test]
    fn test_in_dialog_request_uses_dialog_identifiers() {
        let mut dialog = dialog();
        dialog.set_remote_tag("bobtag");
        let seq = dialog.increment_sequence();
        let bye = factory().create_request(&dialog, Method::Bye);

        assert_eq!(bye.call_id(), Some("factory-test"));
        assert_eq!(bye.cseq().unwrap(), CSeq::new(seq, Method::Bye));
        assert_eq!(bye.from_tag().as_deref(), Some(dialog.local_tag.as_str()));
        assert_eq!(bye.to_tag().as_deref(), Some("bobtag"));
        assert!(bye.branch().unwrap().starts_with("z9hG4bK"));
        assert!(bye.header(&HeaderName::Contact).is_none());
        assert_eq!(bye.header(&HeaderName::UserAgent), Some("test-agent"));
    }

    #[test]
    fn test_cancel_matches_invite() {
        let factory = factory();
        let invite = factory.in_dialog(&dialog(), Method::Invite).build();
        let cancel = factory.create_cancel(&invite).unwrap();

        assert_eq!(cancel.uri, invite.uri);
        assert_eq!(cancel.branch(), invite.branch());
        assert_eq!(cancel.cseq().unwrap().seq, invite.cseq().unwrap().seq);
        assert_eq!(cancel.cseq().unwrap().method, Method::Cancel);

        let bye = factory.create_request(&dialog(), Method::Bye);
        assert!(factory.create_cancel(&bye).is_err());
    }

    #[test]
    fn test_ack_has_fresh_branch() {
        let factory = factory();
        let dialog = dialog();
        let invite = factory.create_request(&dialog, Method::Invite);
        let ack = factory.create_ack(&dialog, 1);
        assert_ne!(ack.branch(), invite.branch());
        assert_eq!(ack.cseq().unwrap(), CSeq::new(1, Method::Ack));
    }

    #[test]
    fn test_response_is_tagged_except_trying() {
        let factory = factory();
        let invite = factory.create_request(&dialog(), Method::Invite);
        let trying = factory.create_response(&invite, StatusCode::TRYING, Some("me")).build();
        assert!(trying.to_tag().is_none());
        let ringing = factory.create_response(&invite, StatusCode::RINGING, Some("me")).build();
        assert_eq!(ringing.to_tag().as_deref(), Some("me"));
        assert_eq!(ringing.header(&HeaderName::Server), Some("test-agent"));
    }
}

use std::fmt;

use rcs_sip_core::{HeaderAccess, Method};
use rcs_sip_transport::ContextId;

/// Identifies one outbound exchange.
///
/// Built from the top Via branch, the Call-ID and the CSeq number and
/// method, so a CANCEL or an ACK never matches the INVITE it refers to.
/// It carries the same fields as the transport's [`ContextId`], which lets a
/// retransmission timeout be routed to the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub call_id: String,
    pub seq: u32,
}

impl TransactionKey {
    pub fn from_message<M: HeaderAccess>(message: &M) -> Option<Self> {
        ContextId::from_message(message).map(Self::from)
    }

    /// The transport context this exchange lives in
    pub fn context_id(&self) -> ContextId {
        ContextId {
            branch: self.branch.clone(),
            method: self.method.clone(),
            call_id: self.call_id.clone(),
            seq: self.seq,
        }
    }
}

impl From<ContextId> for TransactionKey {
    fn from(id: ContextId) -> Self {
        Self {
            branch: id.branch,
            method: id.method,
            call_id: id.call_id,
            seq: id.seq,
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {} ({})", self.call_id, self.seq, self.method, self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_sip_core::prelude::*;

    fn request(method: Method) -> Request {
        SimpleRequestBuilder::new(method, "sip:bob@example.com")
            .via("10.0.0.1:5060", "z9hG4bKkey")
            .from(NameAddr::new("sip:alice@example.com").with_tag("a"))
            .to(NameAddr::new("sip:bob@example.com"))
            .call_id("key-test")
            .cseq(3)
            .build()
    }

    #[test]
    fn test_request_and_response_share_a_key() {
        let invite = request(Method::Invite);
        let ringing = SimpleResponseBuilder::response_from_request(&invite, StatusCode::RINGING, None).build();
        assert_eq!(
            TransactionKey::from_message(&invite),
            TransactionKey::from_message(&ringing)
        );
    }

    #[test]
    fn test_cancel_has_its_own_key() {
        let invite = TransactionKey::from_message(&request(Method::Invite)).unwrap();
        let cancel = TransactionKey::from_message(&request(Method::Cancel)).unwrap();
        assert_eq!(invite.branch, cancel.branch);
        assert_ne!(invite, cancel);
        assert_eq!(TransactionKey::from(invite.context_id()), invite);
    }
}

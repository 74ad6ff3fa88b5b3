//! Fluent builders for requests and responses
//!
//! ```rust
//! use rcs_sip_core::prelude::*;
//!
//! let request = SimpleRequestBuilder::new(Method::Options, "sip:bob@example.com")
//!     .via("10.0.0.1:5060", "z9hG4bK74bf9")
//!     .from(NameAddr::new("sip:alice@example.com").with_tag("9fxced76sl"))
//!     .to(NameAddr::new("sip:bob@example.com"))
//!     .call_id("3848276298220188511@10.0.0.1")
//!     .cseq(1)
//!     .max_forwards(70)
//!     .build();
//!
//! assert_eq!(request.call_id(), Some("3848276298220188511@10.0.0.1"));
//! ```

use bytes::Bytes;

use crate::types::address::NameAddr;
use crate::types::cseq::CSeq;
use crate::types::header::HeaderName;
use crate::types::message::{HeaderAccess, Request, Response};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::via::Via;

/// Builder for [`Request`]
#[derive(Debug, Clone)]
pub struct SimpleRequestBuilder {
    request: Request,
}

impl SimpleRequestBuilder {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            request: Request::new(method, uri),
        }
    }

    /// Continue building on an existing request
    pub fn from_request(request: Request) -> Self {
        Self { request }
    }

    /// Adds a UDP Via with `rport`
    pub fn via(mut self, sent_by: &str, branch: &str) -> Self {
        let via = Via::udp(sent_by, branch).with_rport();
        self.request.headers.push(HeaderName::Via, via.to_string());
        self
    }

    pub fn from(mut self, addr: NameAddr) -> Self {
        self.request.headers.set(HeaderName::From, addr.to_string());
        self
    }

    pub fn to(mut self, addr: NameAddr) -> Self {
        self.request.headers.set(HeaderName::To, addr.to_string());
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.request.headers.set(HeaderName::CallId, call_id);
        self
    }

    /// CSeq with the request's own method
    pub fn cseq(mut self, seq: u32) -> Self {
        let cseq = CSeq::new(seq, self.request.method.clone());
        self.request.headers.set(HeaderName::CSeq, cseq.to_string());
        self
    }

    pub fn max_forwards(mut self, value: u32) -> Self {
        self.request
            .headers
            .set(HeaderName::MaxForwards, value.to_string());
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        self.request
            .headers
            .push(HeaderName::Contact, NameAddr::new(uri).to_string());
        self
    }

    /// Appends one Route entry
    pub fn route(mut self, route: &str) -> Self {
        self.request.headers.push(HeaderName::Route, route);
        self
    }

    /// Appends a header, ignored for a singleton already present
    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.request.headers.push(name, value);
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.request
            .headers
            .set(HeaderName::ContentType, content_type);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn build(mut self) -> Request {
        let len = self.request.body.len();
        if len > 0 || !self.request.headers.contains(&HeaderName::ContentLength) {
            self.request
                .headers
                .set(HeaderName::ContentLength, len.to_string());
        }
        self.request
    }
}

/// Builder for [`Response`]
#[derive(Debug, Clone)]
pub struct SimpleResponseBuilder {
    response: Response,
}

impl SimpleResponseBuilder {
    pub fn new(status: StatusCode, reason: Option<&str>) -> Self {
        let mut response = Response::new(status);
        if let Some(reason) = reason {
            response.reason = reason.to_string();
        }
        Self { response }
    }

    /// Starts a response to `request`, copying Via, From, To, Call-ID and
    /// CSeq. Record-Route is copied for dialog-forming requests.
    pub fn response_from_request(request: &Request, status: StatusCode, reason: Option<&str>) -> Self {
        let mut builder = Self::new(status, reason);
        let headers = &mut builder.response.headers;
        for via in request.headers.get_all(&HeaderName::Via) {
            headers.push(HeaderName::Via, via);
        }
        for name in [HeaderName::From, HeaderName::To, HeaderName::CallId, HeaderName::CSeq] {
            if let Some(value) = request.header(&name) {
                headers.push(name, value);
            }
        }
        if matches!(request.method, Method::Invite | Method::Subscribe) {
            for rr in request.headers.get_all(&HeaderName::RecordRoute) {
                headers.push(HeaderName::RecordRoute, rr);
            }
        }
        builder
    }

    /// Adds a tag to the To header when it has none
    pub fn to_tag(mut self, tag: &str) -> Self {
        if let Some(mut to) = self.response.to_addr() {
            if to.tag().is_none() {
                to.set_param("tag", Some(tag.to_string()));
                self.response.headers.set(HeaderName::To, to.to_string());
            }
        }
        self
    }

    pub fn contact(mut self, uri: &str) -> Self {
        self.response
            .headers
            .set(HeaderName::Contact, NameAddr::new(uri).to_string());
        self
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.response.headers.push(name, value);
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.response
            .headers
            .set(HeaderName::ContentType, content_type);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(mut self) -> Response {
        let len = self.response.body.len();
        self.response
            .headers
            .set(HeaderName::ContentLength, len.to_string());
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .via("10.0.0.1:5060", "z9hG4bK1")
            .from(NameAddr::new("sip:alice@example.com").with_tag("a1"))
            .to(NameAddr::new("sip:bob@example.com"))
            .call_id("c1")
            .cseq(7)
            .header(HeaderName::RecordRoute, "<sip:p1;lr>")
            .build()
    }

    #[test]
    fn test_request_builder() {
        let req = invite();
        assert!(req.has_mandatory_headers());
        assert_eq!(req.cseq(), Some(CSeq::new(7, Method::Invite)));
        assert_eq!(req.header(&HeaderName::ContentLength), Some("0"));
    }

    #[test]
    fn test_response_from_request() {
        let resp = SimpleResponseBuilder::response_from_request(&invite(), StatusCode::RINGING, None)
            .to_tag("b2")
            .build();
        assert_eq!(resp.reason, "Ringing");
        assert_eq!(resp.call_id(), Some("c1"));
        assert_eq!(resp.to_tag().as_deref(), Some("b2"));
        assert_eq!(resp.from_tag().as_deref(), Some("a1"));
        assert_eq!(resp.branch().as_deref(), Some("z9hG4bK1"));
        assert_eq!(resp.headers.get_all(&HeaderName::RecordRoute), vec!["<sip:p1;lr>"]);
    }
}

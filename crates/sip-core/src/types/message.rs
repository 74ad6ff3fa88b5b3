//! SIP request/response model and serialization

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::address::NameAddr;
use crate::types::cseq::CSeq;
use crate::types::header::{HeaderName, Headers};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::via::Via;

/// Protocol version written on every start line
pub const SIP_VERSION: &str = "SIP/2.0";

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Request-URI, kept verbatim
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Bytes,
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

/// Either side of a SIP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Typed access to the headers every SIP message carries
pub trait HeaderAccess {
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn body(&self) -> &Bytes;

    fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers().get(name)
    }

    fn call_id(&self) -> Option<&str> {
        self.headers().get(&HeaderName::CallId)
    }

    fn cseq(&self) -> Option<CSeq> {
        self.headers().get(&HeaderName::CSeq)?.parse().ok()
    }

    /// Topmost Via
    fn via(&self) -> Option<Via> {
        let first = self.headers().get(&HeaderName::Via)?;
        crate::types::address::split_header_list(first)
            .first()?
            .parse()
            .ok()
    }

    /// Branch parameter of the topmost Via
    fn branch(&self) -> Option<String> {
        self.via().and_then(|v| v.branch().map(str::to_string))
    }

    fn from_addr(&self) -> Option<NameAddr> {
        self.headers().get(&HeaderName::From)?.parse().ok()
    }

    fn to_addr(&self) -> Option<NameAddr> {
        self.headers().get(&HeaderName::To)?.parse().ok()
    }

    fn from_tag(&self) -> Option<String> {
        self.from_addr().and_then(|a| a.tag().map(str::to_string))
    }

    fn to_tag(&self) -> Option<String> {
        self.to_addr().and_then(|a| a.tag().map(str::to_string))
    }

    /// URI of the first Contact
    fn contact_uri(&self) -> Option<String> {
        let first = self.headers().get(&HeaderName::Contact)?;
        let item = crate::types::address::split_header_list(first)
            .into_iter()
            .next()?;
        item.parse::<NameAddr>().ok().map(|a| a.uri)
    }

    fn content_type(&self) -> Option<&str> {
        self.headers().get(&HeaderName::ContentType)
    }

    fn expires(&self) -> Option<u32> {
        self.headers().get(&HeaderName::Expires)?.trim().parse().ok()
    }

    /// Via, From, To, Call-ID and CSeq are all present and readable
    fn has_mandatory_headers(&self) -> bool {
        self.via().is_some()
            && self.from_addr().is_some()
            && self.to_addr().is_some()
            && self.call_id().map_or(false, |c| !c.trim().is_empty())
            && self.cseq().is_some()
    }
}

impl HeaderAccess for Request {
    fn headers(&self) -> &Headers {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    fn body(&self) -> &Bytes {
        &self.body
    }
}

impl HeaderAccess for Response {
    fn headers(&self) -> &Headers {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    fn body(&self) -> &Bytes {
        &self.body
    }
}

impl HeaderAccess for Message {
    fn headers(&self) -> &Headers {
        match self {
            Message::Request(r) => &r.headers,
            Message::Response(r) => &r.headers,
        }
    }
    fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(r) => &mut r.headers,
            Message::Response(r) => &mut r.headers,
        }
    }
    fn body(&self) -> &Bytes {
        match self {
            Message::Request(r) => &r.body,
            Message::Response(r) => &r.body,
        }
    }
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            version: SIP_VERSION.to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let start = format!("{} {} {}", self.method, self.uri, self.version);
        serialize(&start, &self.headers, &self.body)
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            version: SIP_VERSION.to_string(),
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let start = format!("{} {} {}", self.version, self.status, self.reason);
        serialize(&start, &self.headers, &self.body)
    }
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// The request method, or the CSeq method of a response
    pub fn method(&self) -> Option<Method> {
        match self {
            Message::Request(r) => Some(r.method.clone()),
            Message::Response(r) => r.cseq().map(|c| c.method),
        }
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            Message::Request(_) => None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

/// Writes the start line, headers in stored order and the body.
///
/// Content-Length always reflects `body.len()`: an existing header is
/// rewritten in place when its value disagrees, and one is appended when the
/// body is non-empty and no header is present.
fn serialize(start_line: &str, headers: &Headers, body: &Bytes) -> Bytes {
    let mut out = BytesMut::with_capacity(start_line.len() + headers.len() * 48 + body.len() + 32);
    out.put_slice(start_line.as_bytes());
    out.put_slice(b"\r\n");

    let mut wrote_length = false;
    for header in headers.iter() {
        if header.name == HeaderName::ContentLength {
            if wrote_length {
                continue;
            }
            wrote_length = true;
            if header.value.trim().parse::<usize>().ok() == Some(body.len()) {
                out.put_slice(header.to_line().as_bytes());
            } else {
                out.put_slice(format!("{}: {}", HeaderName::ContentLength, body.len()).as_bytes());
            }
        } else {
            out.put_slice(header.to_line().as_bytes());
        }
        out.put_slice(b"\r\n");
    }
    if !wrote_length && !body.is_empty() {
        out.put_slice(format!("{}: {}\r\n", HeaderName::ContentLength, body.len()).as_bytes());
    }
    out.put_slice(b"\r\n");
    out.put_slice(body);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_follows_body() {
        let mut req = Request::new(Method::Message, "sip:bob@example.com");
        req.headers.push(HeaderName::ContentLength, "99");
        req.body = Bytes::from_static(b"hello");
        let text = String::from_utf8(req.to_bytes().to_vec()).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_content_length_appended_for_body() {
        let mut resp = Response::new(StatusCode::OK);
        resp.body = Bytes::from_static(b"v=0\r\n");
        let text = String::from_utf8(resp.to_bytes().to_vec()).unwrap();
        assert!(text.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n\r\nv=0\r\n"));
    }
}

//! Header names and the ordered header store
//!
//! [`Headers`] keeps every header line in wire order. Lookup is
//! case-insensitive and understands compact forms, so `v:` and `Via:` land
//! under the same [`HeaderName`]. Repeating headers (Via, Route, Record-Route,
//! ...) are returned together, in order, by [`Headers::get_all`]. Headers that
//! may only appear once keep the first occurrence; a later duplicate is
//! dropped unless the caller replaces it with [`Headers::set`].
//!
//! Lines that came off the wire remember their exact text so that an
//! untouched message serializes back to the same bytes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// SIP header names known to the stack
///
/// Matching is case-insensitive; [`HeaderName::Other`] keeps the spelling it
/// was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeaderName {
    /// Via: Path taken by the request so far
    Via,
    /// From: Initiator of the request
    From,
    /// To: Logical recipient of the request
    To,
    /// Call-ID: Unique identifier for this call
    CallId,
    /// CSeq: Command sequence number
    CSeq,
    /// Contact: Where subsequent requests should be sent
    Contact,
    /// Content-Length: Size of the message body
    ContentLength,
    /// Content-Type: Media type of the message body
    ContentType,
    /// Content-Encoding
    ContentEncoding,
    /// Max-Forwards: Limit on the number of proxies
    MaxForwards,
    /// Route: Forced route for a request
    Route,
    /// Record-Route: Proxies that want to stay in the path
    RecordRoute,
    /// Expires
    Expires,
    /// Min-Expires
    MinExpires,
    /// Event: Event package for SUBSCRIBE/NOTIFY/PUBLISH
    Event,
    /// Allow-Events
    AllowEvents,
    /// Subscription-State: State of a subscription carried in NOTIFY
    SubscriptionState,
    /// Accept
    Accept,
    /// Accept-Contact
    AcceptContact,
    /// Allow: Methods supported by the UA
    Allow,
    /// Supported
    Supported,
    /// Require
    Require,
    /// User-Agent
    UserAgent,
    /// Server
    Server,
    /// Subject
    Subject,
    /// Reason
    Reason,
    /// Authorization
    Authorization,
    /// Proxy-Authorization
    ProxyAuthorization,
    /// WWW-Authenticate
    WwwAuthenticate,
    /// Proxy-Authenticate
    ProxyAuthenticate,
    /// Session-Expires (RFC 4028)
    SessionExpires,
    /// Min-SE (RFC 4028)
    MinSE,
    /// SIP-ETag (RFC 3903)
    SipETag,
    /// SIP-If-Match (RFC 3903)
    SipIfMatch,
    /// P-Asserted-Identity
    PAssertedIdentity,
    /// P-Preferred-Identity
    PPreferredIdentity,
    /// Any other header
    Other(String),
}

impl HeaderName {
    /// Canonical spelling, or the original spelling for [`HeaderName::Other`]
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::Expires => "Expires",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::Event => "Event",
            HeaderName::AllowEvents => "Allow-Events",
            HeaderName::SubscriptionState => "Subscription-State",
            HeaderName::Accept => "Accept",
            HeaderName::AcceptContact => "Accept-Contact",
            HeaderName::Allow => "Allow",
            HeaderName::Supported => "Supported",
            HeaderName::Require => "Require",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Server => "Server",
            HeaderName::Subject => "Subject",
            HeaderName::Reason => "Reason",
            HeaderName::Authorization => "Authorization",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::SessionExpires => "Session-Expires",
            HeaderName::MinSE => "Min-SE",
            HeaderName::SipETag => "SIP-ETag",
            HeaderName::SipIfMatch => "SIP-If-Match",
            HeaderName::PAssertedIdentity => "P-Asserted-Identity",
            HeaderName::PPreferredIdentity => "P-Preferred-Identity",
            HeaderName::Other(name) => name,
        }
    }

    /// Headers that may appear at most once in a message
    pub fn is_singleton(&self) -> bool {
        matches!(
            self,
            HeaderName::From
                | HeaderName::To
                | HeaderName::CallId
                | HeaderName::CSeq
                | HeaderName::ContentLength
                | HeaderName::ContentType
                | HeaderName::ContentEncoding
                | HeaderName::MaxForwards
                | HeaderName::Expires
                | HeaderName::MinExpires
                | HeaderName::Event
                | HeaderName::SubscriptionState
                | HeaderName::UserAgent
                | HeaderName::Server
                | HeaderName::Subject
                | HeaderName::SessionExpires
                | HeaderName::MinSE
                | HeaderName::SipETag
                | HeaderName::SipIfMatch
        )
    }

    /// Resolves a header field name as it appears on the wire.
    ///
    /// Never fails: unknown names become [`HeaderName::Other`].
    pub fn parse(name: &str) -> HeaderName {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "max-forwards" => HeaderName::MaxForwards,
            "route" => HeaderName::Route,
            "record-route" => HeaderName::RecordRoute,
            "expires" => HeaderName::Expires,
            "min-expires" => HeaderName::MinExpires,
            "event" | "o" => HeaderName::Event,
            "allow-events" | "u" => HeaderName::AllowEvents,
            "subscription-state" => HeaderName::SubscriptionState,
            "accept" => HeaderName::Accept,
            "accept-contact" | "a" => HeaderName::AcceptContact,
            "allow" => HeaderName::Allow,
            "supported" | "k" => HeaderName::Supported,
            "require" => HeaderName::Require,
            "user-agent" => HeaderName::UserAgent,
            "server" => HeaderName::Server,
            "subject" | "s" => HeaderName::Subject,
            "reason" => HeaderName::Reason,
            "authorization" => HeaderName::Authorization,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            "session-expires" | "x" => HeaderName::SessionExpires,
            "min-se" => HeaderName::MinSE,
            "sip-etag" => HeaderName::SipETag,
            "sip-if-match" => HeaderName::SipIfMatch,
            "p-asserted-identity" => HeaderName::PAssertedIdentity,
            "p-preferred-identity" => HeaderName::PPreferredIdentity,
            _ => HeaderName::Other(name.to_string()),
        }
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.as_str().bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }
        Ok(HeaderName::parse(trimmed))
    }
}

impl From<&str> for HeaderName {
    fn from(s: &str) -> Self {
        HeaderName::parse(s)
    }
}

/// A single header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name
    pub name: HeaderName,
    /// Header value with folding collapsed and surrounding whitespace removed
    pub value: String,
    /// Exact wire text of the line(s) this header was parsed from
    raw: Option<String>,
}

impl Header {
    pub fn new(name: HeaderName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            raw: None,
        }
    }

    pub(crate) fn from_wire(name: HeaderName, value: String, raw: String) -> Self {
        Self {
            name,
            value,
            raw: Some(raw),
        }
    }

    /// Wire text: the original line when parsed, otherwise `Name: value`
    pub fn to_line(&self) -> String {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => format!("{}: {}", self.name, self.value),
        }
    }
}

/// Ordered header store with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    ///
    /// Returns `false` and leaves the store untouched when `name` is a
    /// singleton header that is already present.
    pub fn push(&mut self, name: HeaderName, value: impl Into<String>) -> bool {
        self.insert(Header::new(name, value))
    }

    pub(crate) fn insert(&mut self, header: Header) -> bool {
        if header.name.is_singleton() && self.contains(&header.name) {
            return false;
        }
        self.entries.push(header);
        true
    }

    /// Replaces every occurrence of `name` with a single value, keeping the
    /// position of the first occurrence.
    pub fn set(&mut self, name: HeaderName, value: impl Into<String>) {
        let header = Header::new(name.clone(), value);
        match self.entries.iter().position(|h| h.name == name) {
            Some(pos) => {
                self.entries[pos] = header;
                let mut index = 0;
                self.entries.retain(|h| {
                    let keep = index <= pos || h.name != name;
                    index += 1;
                    keep
                });
            }
            None => self.entries.push(header),
        }
    }

    /// Inserts a header before every other header, used for the top Via.
    pub fn prepend(&mut self, name: HeaderName, value: impl Into<String>) {
        self.entries.insert(0, Header::new(name, value));
    }

    /// First value of `name`
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| &h.name == name)
            .map(|h| h.value.as_str())
    }

    /// Every value of `name`, in message order
    pub fn get_all(&self, name: &HeaderName) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|h| &h.name == name)
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|h| &h.name == name)
    }

    /// Removes every occurrence of `name`, returning how many were removed.
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| &h.name != name);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_and_case_insensitive_names() {
        assert_eq!(HeaderName::parse("v"), HeaderName::Via);
        assert_eq!(HeaderName::parse("CALL-id"), HeaderName::CallId);
        assert_eq!(HeaderName::parse("l"), HeaderName::ContentLength);
        assert_eq!(HeaderName::parse("x-custom"), HeaderName::parse("X-Custom"));
        assert_eq!(HeaderName::parse("X-Custom").as_str(), "X-Custom");
    }

    #[test]
    fn test_singletons_ignore_duplicates() {
        let mut headers = Headers::new();
        assert!(headers.push(HeaderName::CallId, "a@host"));
        assert!(!headers.push(HeaderName::CallId, "b@host"));
        assert_eq!(headers.get(&HeaderName::CallId), Some("a@host"));

        headers.set(HeaderName::CallId, "c@host");
        assert_eq!(headers.get_all(&HeaderName::CallId), vec!["c@host"]);
    }

    #[test]
    fn test_repeating_headers_keep_order() {
        let mut headers = Headers::new();
        headers.push(HeaderName::Route, "<sip:p1;lr>");
        headers.push(HeaderName::CallId, "x");
        headers.push(HeaderName::Route, "<sip:p2;lr>");
        assert_eq!(
            headers.get_all(&HeaderName::Route),
            vec!["<sip:p1;lr>", "<sip:p2;lr>"]
        );

        headers.set(HeaderName::Route, "<sip:p3;lr>");
        let names: Vec<_> = headers.iter().map(|h| h.name.clone()).collect();
        assert_eq!(names, vec![HeaderName::Route, HeaderName::CallId]);
        assert_eq!(headers.remove(&HeaderName::Route), 1);
    }
}

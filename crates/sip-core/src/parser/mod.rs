//! SIP message parser
//!
//! [`parse_message`] turns one datagram into a [`Message`]. The start line is
//! parsed with nom; header lines are split on the first `:` and looked up
//! through [`HeaderName::parse`], so unknown headers are kept as opaque text.
//! Folded continuation lines (leading space or tab) are joined onto the
//! previous header. CRLF and bare LF line endings are both accepted.
//!
//! The body is the number of bytes declared by Content-Length, or everything
//! after the blank line when the header is missing.

pub mod start_line;

use std::str::FromStr;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::header::{Header, HeaderName, Headers};
use crate::types::message::{Message, Request, Response};
use crate::types::method::Method;
use crate::types::status::StatusCode;

/// Parses a complete SIP message.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    let data = skip_leading_line_breaks(data);
    if data.is_empty() {
        return Err(Error::ParseError("empty message".to_string()));
    }

    let (head_end, body_start) = match find_head_end(data) {
        Some(bounds) => bounds,
        None => (data.len(), data.len()),
    };
    let head = std::str::from_utf8(&data[..head_end])?;

    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let start = lines
        .next()
        .ok_or_else(|| Error::ParseError("missing start line".to_string()))?;

    let headers = parse_header_lines(lines);

    let remaining = &data[body_start..];
    let body = match headers
        .get(&HeaderName::ContentLength)
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        Some(declared) if declared > remaining.len() => {
            return Err(Error::ParseError(format!(
                "truncated body: Content-Length {declared}, {} bytes available",
                remaining.len()
            )));
        }
        Some(declared) => Bytes::copy_from_slice(&remaining[..declared]),
        None => Bytes::copy_from_slice(remaining),
    };

    if start.starts_with("SIP/") {
        let (_, (version, code, reason)) = start_line::status_line(start)
            .map_err(|_| Error::InvalidStartLine(start.to_string()))?;
        Ok(Message::Response(Response {
            version: version.to_string(),
            status: StatusCode::from_u16(code)?,
            reason: reason.to_string(),
            headers,
            body,
        }))
    } else {
        let (_, (method, uri, version)) = start_line::request_line(start)
            .map_err(|_| Error::InvalidStartLine(start.to_string()))?;
        Ok(Message::Request(Request {
            method: Method::from_str(method)?,
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body,
        }))
    }
}

fn skip_leading_line_breaks(mut data: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = data.split_first() {
        if first == b'\r' || first == b'\n' {
            data = rest;
        } else {
            break;
        }
    }
    data
}

/// Returns the end of the header block and the start of the body.
fn find_head_end(data: &[u8]) -> Option<(usize, usize)> {
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = data.windows(2).position(|w| w == b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn flush(pending: Option<(HeaderName, String, String)>, headers: &mut Headers) {
    if let Some((name, value, raw)) = pending {
        let name_text = name.to_string();
        if !headers.insert(Header::from_wire(name, value, raw)) {
            trace!("dropping duplicate singleton header {}", name_text);
        }
    }
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Headers {
    // (name, value, raw) of the header currently being assembled
    let mut pending: Option<(HeaderName, String, String)> = None;
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value, raw)) = pending.as_mut() {
                let folded = line.trim();
                if !folded.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
                raw.push_str("\r\n");
                raw.push_str(line);
                continue;
            }
        }
        flush(pending.take(), &mut headers);
        pending = Some(match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => (
                HeaderName::parse(name.trim()),
                value.trim().to_string(),
                line.to_string(),
            ),
            _ => {
                trace!("keeping malformed header line as opaque text");
                (HeaderName::Other(String::new()), line.to_string(), line.to_string())
            }
        });
    }
    flush(pending, &mut headers);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::HeaderAccess;

    const INVITE: &str = "INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKnashds8\r\n\
Max-Forwards: 70\r\n\
To: <sip:bob@example.com>\r\n\
From: \"Alice\" <sip:alice@example.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@10.0.0.1\r\n\
CSeq: 314159 INVITE\r\n\
Contact: <sip:alice@10.0.0.1:5060>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\
\r\n\
v=0\n";

    #[test]
    fn test_parse_request() {
        let msg = parse_message(INVITE.as_bytes()).unwrap();
        let req = msg.as_request().unwrap();
        assert_eq!(req.method, Method::Invite);
        assert_eq!(req.uri, "sip:bob@example.com");
        assert_eq!(req.call_id(), Some("a84b4c76e66710@10.0.0.1"));
        assert_eq!(req.cseq().unwrap().seq, 314159);
        assert_eq!(req.branch().as_deref(), Some("z9hG4bKnashds8"));
        assert_eq!(req.from_tag().as_deref(), Some("1928301774"));
        assert_eq!(req.to_tag(), None);
        assert_eq!(req.contact_uri().as_deref(), Some("sip:alice@10.0.0.1:5060"));
        assert_eq!(&req.body[..], b"v=0\n");
        assert!(req.has_mandatory_headers());
    }

    #[test]
    fn test_round_trip_is_byte_exact() {
        let msg = parse_message(INVITE.as_bytes()).unwrap();
        assert_eq!(&msg.to_bytes()[..], INVITE.as_bytes());
    }

    #[test]
    fn test_compact_forms_and_folding() {
        let raw = "SIP/2.0 200 OK\r\n\
v: SIP/2.0/UDP 10.0.0.1;branch=z9hG4bK1\r\n\
f: <sip:a@x>;tag=1\r\n\
t: <sip:b@x>;tag=2\r\n\
i: abc\r\n\
CSeq: 1 OPTIONS\r\n\
Subject: first\r\n second\r\n\
l: 0\r\n\r\n";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert!(msg.has_mandatory_headers());
        assert_eq!(msg.header(&HeaderName::Subject), Some("first second"));
        assert_eq!(msg.to_tag().as_deref(), Some("2"));
        assert_eq!(&msg.to_bytes()[..], raw.as_bytes());
    }

    #[test]
    fn test_bare_lf_and_missing_content_length() {
        let raw = "MESSAGE sip:b@x SIP/2.0\nCall-ID: 1\nCSeq: 2 MESSAGE\n\nhello";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(&msg.body()[..], b"hello");
        assert_eq!(msg.call_id(), Some("1"));
    }

    #[test]
    fn test_duplicate_singleton_keeps_first() {
        let raw = "OPTIONS sip:b@x SIP/2.0\r\nCall-ID: first\r\nCall-ID: second\r\n\r\n";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.headers().get_all(&HeaderName::CallId), vec!["first"]);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            parse_message(b"garbage\r\n\r\n"),
            Err(Error::InvalidStartLine(_))
        ));
        assert!(parse_message(b"").is_err());
        assert!(parse_message(b"\r\n\r\n").is_err());
        assert!(matches!(
            parse_message(b"SIP/2.0 999x OK\r\n\r\n"),
            Err(Error::InvalidStartLine(_))
        ));
        assert!(matches!(
            parse_message(b"MESSAGE sip:b@x SIP/2.0\r\nContent-Length: 10\r\n\r\nshort"),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_unknown_headers_preserved() {
        let raw = "NOTIFY sip:a@x SIP/2.0\r\nX-Weird: ::odd::\r\nno colon here\r\nCall-ID: z\r\n\r\n";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.header(&HeaderName::parse("x-weird")), Some("::odd::"));
        assert_eq!(msg.call_id(), Some("z"));
        assert_eq!(&msg.to_bytes()[..], raw.as_bytes());
    }
}

//! Minimal SDP (RFC 4566) model
//!
//! Just enough to build offers and answers for the feature sessions and to
//! inspect the peer's: session-level origin and connection, then media
//! sections with their format list and attributes. Lines the stack does not
//! use (`b=`, `k=`, `i=` ...) are skipped on parse.

use std::fmt;
use std::str::FromStr;

use rcs_sip_core::HeaderAccess;

use crate::errors::{Result, SessionError};

/// One `a=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    fn parse(line: &str) -> Self {
        match line.split_once(':') {
            Some((name, value)) => Self::new(name.trim(), Some(value.trim().to_string())),
            None => Self::new(line.trim(), None),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "a={}:{}", self.name, value),
            None => write!(f, "a={}", self.name),
        }
    }
}

/// Media direction attributes
pub const DIRECTIONS: [&str; 4] = ["sendrecv", "sendonly", "recvonly", "inactive"];

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// `audio`, `video`, `message` ...
    pub media: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<String>,
    pub attributes: Vec<Attribute>,
}

impl MediaDescription {
    pub fn new(media: impl Into<String>, port: u16, protocol: impl Into<String>, formats: Vec<String>) -> Self {
        Self {
            media: media.into(),
            port,
            protocol: protocol.into(),
            formats,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    /// Value of the first attribute called `name`
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.value.as_deref())
    }

    pub fn attributes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.name.eq_ignore_ascii_case(name))
            .filter_map(|a| a.value.as_deref())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Direction attribute, `sendrecv` when absent
    pub fn direction(&self) -> &str {
        self.attributes
            .iter()
            .map(|a| a.name.as_str())
            .find(|name| DIRECTIONS.contains(name))
            .unwrap_or("sendrecv")
    }

    /// A port of zero rejects the stream
    pub fn is_rejected(&self) -> bool {
        self.port == 0
    }

    /// `(payload type, encoding name, clock rate)` from the rtpmap lines
    pub fn rtpmaps(&self) -> Vec<(String, String, u32)> {
        self.attributes_named("rtpmap")
            .filter_map(|value| {
                let (pt, encoding) = value.split_once(' ')?;
                let mut parts = encoding.split('/');
                let name = parts.next()?.to_string();
                let rate = parts.next()?.parse().ok()?;
                Some((pt.to_string(), name, rate))
            })
            .collect()
    }
}

impl fmt::Display for MediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} {} {} {}\r\n", self.media, self.port, self.protocol, self.formats.join(" "))?;
        for attribute in &self.attributes {
            write!(f, "{}\r\n", attribute)?;
        }
        Ok(())
    }
}

/// A session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Value of the `o=` line
    pub origin: String,
    pub session_name: String,
    /// Address from the session-level `c=` line
    pub connection: Option<String>,
    pub attributes: Vec<Attribute>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Empty description originated from `host`
    pub fn new(host: &str) -> Self {
        let id: u32 = rand::random();
        Self {
            origin: format!("- {} {} IN {} {}", id, id, address_type(host), host),
            session_name: "-".to_string(),
            connection: Some(host.to_string()),
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: MediaDescription) -> Self {
        self.media.push(media);
        self
    }

    /// Description carried in a message body.
    ///
    /// A missing body or a non-SDP content type is
    /// [`SessionError::UnsupportedContent`]; a malformed one is a parse error.
    pub fn from_message<M: HeaderAccess>(message: &M) -> Result<Self> {
        let body = message.body();
        if body.is_empty() {
            return Err(SessionError::unsupported("no session description"));
        }
        if let Some(content_type) = message.content_type() {
            if !content_type.trim().to_ascii_lowercase().starts_with("application/sdp") {
                return Err(SessionError::unsupported(format!("content type {}", content_type)));
            }
        }
        let text = std::str::from_utf8(body).map_err(|e| SessionError::Parse(e.to_string()))?;
        Self::parse(text)
    }

    /// First section of kind `media` that was not rejected
    pub fn media_of(&self, media: &str) -> Option<&MediaDescription> {
        self.media
            .iter()
            .find(|m| m.media.eq_ignore_ascii_case(media) && !m.is_rejected())
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim_end).filter(|l| !l.is_empty());
        match lines.next() {
            Some(first) if first.starts_with("v=") => {}
            _ => return Err(SessionError::Parse("SDP must start with v=".into())),
        }

        let mut sdp = SessionDescription {
            origin: String::new(),
            session_name: "-".to_string(),
            connection: None,
            attributes: Vec::new(),
            media: Vec::new(),
        };

        for line in lines {
            let Some((kind, value)) = line.split_once('=') else {
                return Err(SessionError::Parse(format!("bad SDP line '{}'", line)));
            };
            match kind {
                "o" => sdp.origin = value.to_string(),
                "s" => sdp.session_name = value.to_string(),
                // per-media connection lines are not tracked
                "c" if sdp.media.is_empty() => {
                    sdp.connection = value.split_whitespace().nth(2).map(str::to_string);
                }
                "m" => sdp.media.push(parse_media_line(value)?),
                "a" => {
                    let attribute = Attribute::parse(value);
                    match sdp.media.last_mut() {
                        Some(media) => media.attributes.push(attribute),
                        None => sdp.attributes.push(attribute),
                    }
                }
                _ => {}
            }
        }

        if sdp.origin.is_empty() {
            return Err(SessionError::Parse("SDP without o= line".into()));
        }
        Ok(sdp)
    }
}

impl FromStr for SessionDescription {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(f, "o={}\r\n", self.origin)?;
        write!(f, "s={}\r\n", self.session_name)?;
        if let Some(address) = &self.connection {
            write!(f, "c=IN {} {}\r\n", address_type(address), address)?;
        }
        write!(f, "t=0 0\r\n")?;
        for attribute in &self.attributes {
            write!(f, "{}\r\n", attribute)?;
        }
        for media in &self.media {
            write!(f, "{}", media)?;
        }
        Ok(())
    }
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let mut parts = value.split_whitespace();
    let (Some(media), Some(port), Some(protocol)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(SessionError::Parse(format!("bad m= line '{}'", value)));
    };
    // port may carry a "/count" suffix
    let port = port
        .split('/')
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| SessionError::Parse(format!("bad media port in '{}'", value)))?;
    Ok(MediaDescription::new(
        media,
        port,
        protocol,
        parts.map(str::to_string).collect(),
    ))
}

fn address_type(host: &str) -> &'static str {
    if host.contains(':') {
        "IP6"
    } else {
        "IP4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 2890844526 2890844526 IN IP4 10.0.0.9\r\n\
        s=-\r\n\
        c=IN IP4 10.0.0.9\r\n\
        t=0 0\r\n\
        m=audio 49170 RTP/AVP 0 8 97\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=rtpmap:8 PCMA/8000\r\n\
        a=rtpmap:97 AMR/8000/1\r\n\
        a=sendrecv\r\n\
        m=video 0 RTP/AVP 96\r\n";

    #[test]
    fn test_parse_offer() {
        let sdp: SessionDescription = OFFER.parse().unwrap();
        assert_eq!(sdp.connection.as_deref(), Some("10.0.0.9"));
        assert_eq!(sdp.media.len(), 2);

        let audio = sdp.media_of("audio").unwrap();
        assert_eq!(audio.port, 49170);
        assert_eq!(audio.formats, vec!["0", "8", "97"]);
        assert_eq!(audio.direction(), "sendrecv");
        assert_eq!(audio.rtpmaps()[2], ("97".to_string(), "AMR".to_string(), 8000));

        // rejected stream is skipped
        assert!(sdp.media_of("video").is_none());
    }

    #[test]
    fn test_display_then_parse_keeps_media() {
        let sdp = SessionDescription::new("192.0.2.1").with_media(
            MediaDescription::new("message", 2855, "TCP/MSRP", vec!["*".into()])
                .with_attribute("accept-types", Some("text/plain".into()))
                .with_attribute("sendrecv", None),
        );
        let text = sdp.to_string();
        assert!(text.starts_with("v=0\r\no=- "));
        assert!(text.contains("c=IN IP4 192.0.2.1\r\n"));

        let parsed = SessionDescription::parse(&text).unwrap();
        assert_eq!(parsed, sdp);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(SessionDescription::parse("hello").is_err());
        assert!(SessionDescription::parse("v=0\r\nm=audio\r\n").is_err());
        assert!(SessionDescription::parse("v=0\r\ns=-\r\n").is_err());
    }

    #[test]
    fn test_from_message_checks_content_type() {
        use rcs_sip_core::{Method, SimpleRequestBuilder};

        let invite = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .content_type("application/sdp")
            .body(OFFER)
            .build();
        assert_eq!(SessionDescription::from_message(&invite).unwrap().media.len(), 2);

        let text = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com")
            .content_type("text/plain")
            .body("v=0")
            .build();
        assert!(matches!(
            SessionDescription::from_message(&text),
            Err(SessionError::UnsupportedContent(_))
        ));

        let empty = SimpleRequestBuilder::new(Method::Invite, "sip:bob@example.com").build();
        assert!(matches!(
            SessionDescription::from_message(&empty),
            Err(SessionError::UnsupportedContent(_))
        ));
    }
}

//! One-to-one chat over MSRP

use crate::errors::{Result, SessionError};
use crate::sdp::{MediaDescription, SessionDescription};

use super::{FeatureKind, SessionFeature};

/// OMA SIMPLE IM feature tag
pub const FEATURE_OMA_IM: &str = "+g.oma.sip-im";

/// Default MSRP port (RFC 4975)
pub const DEFAULT_MSRP_PORT: u16 = 2855;

#[derive(Debug, Clone)]
pub struct ChatFeature {
    pub port: u16,
    /// Content types we can receive, in preference order
    pub accept_types: Vec<String>,
}

impl Default for ChatFeature {
    fn default() -> Self {
        Self {
            port: DEFAULT_MSRP_PORT,
            accept_types: vec!["message/cpim".into(), "text/plain".into()],
        }
    }
}

impl ChatFeature {
    pub fn new(port: u16, accept_types: Vec<String>) -> Self {
        Self { port, accept_types }
    }

    fn media(&self, local_host: &str, accept_types: &[String], setup: &str) -> MediaDescription {
        let path = format!(
            "msrp://{}:{}/{:016x};tcp",
            local_host,
            self.port,
            rand::random::<u64>()
        );
        MediaDescription::new("message", self.port, "TCP/MSRP", vec!["*".into()])
            .with_attribute("path", Some(path))
            .with_attribute("setup", Some(setup.into()))
            .with_attribute("accept-types", Some(accept_types.join(" ")))
            .with_attribute("sendrecv", None)
    }
}

fn offered_types(media: &MediaDescription) -> Vec<&str> {
    media
        .attribute("accept-types")
        .map(|types| types.split_whitespace().collect())
        .unwrap_or_default()
}

impl SessionFeature for ChatFeature {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Chat
    }

    fn feature_tag(&self) -> Option<&str> {
        Some(FEATURE_OMA_IM)
    }

    fn build_offer(&self, local_host: &str) -> Result<SessionDescription> {
        Ok(SessionDescription::new(local_host).with_media(self.media(local_host, &self.accept_types, "active")))
    }

    fn build_answer(&self, offer: &SessionDescription, local_host: &str) -> Result<SessionDescription> {
        let media = offer
            .media_of("message")
            .ok_or_else(|| SessionError::unsupported("offer has no message stream"))?;
        let offered = offered_types(media);
        let common: Vec<String> = self
            .accept_types
            .iter()
            .filter(|ours| offered.iter().any(|t| t.eq_ignore_ascii_case(ours) || *t == "*"))
            .cloned()
            .collect();
        if common.is_empty() {
            return Err(SessionError::unsupported(format!(
                "no common accept-types in '{}'",
                offered.join(" ")
            )));
        }
        Ok(SessionDescription::new(local_host).with_media(self.media(local_host, &common, "passive")))
    }

    fn check_answer(&self, answer: &SessionDescription) -> Result<()> {
        let media = answer
            .media_of("message")
            .ok_or_else(|| SessionError::unsupported("answer rejected the message stream"))?;
        if media.attribute("path").is_none() {
            return Err(SessionError::unsupported("answer has no MSRP path"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_keeps_common_types() {
        let chat = ChatFeature::default();
        let offer = ChatFeature::new(2856, vec!["text/plain".into(), "application/im-iscomposing+xml".into()])
            .build_offer("10.0.0.9")
            .unwrap();
        let answer = chat.build_answer(&offer, "10.0.0.1").unwrap();
        let media = answer.media_of("message").unwrap();
        assert_eq!(media.attribute("accept-types"), Some("text/plain"));
        assert_eq!(media.attribute("setup"), Some("passive"));
        assert!(chat.check_answer(&answer).is_ok());
    }

    #[test]
    fn test_answer_without_common_type_is_unsupported() {
        let chat = ChatFeature::new(2855, vec!["message/cpim".into()]);
        let offer = ChatFeature::new(2856, vec!["text/html".into()])
            .build_offer("10.0.0.9")
            .unwrap();
        assert!(matches!(
            chat.build_answer(&offer, "10.0.0.1"),
            Err(SessionError::UnsupportedContent(_))
        ));
    }
}

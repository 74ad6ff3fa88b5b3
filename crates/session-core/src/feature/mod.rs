//! Feature payloads
//!
//! The session state machine is written once; what differs between a chat,
//! a video share and a voice call is confined to a [`SessionFeature`]: the
//! offer it builds, how it answers a peer's offer and how it checks the
//! peer's answer.
//!
//! | kind | offer |
//! |---|---|
//! | [`ChatFeature`] | `m=message` over MSRP with accept-types |
//! | [`MediaShareFeature`] | `m=video` H.264, send-only |
//! | [`VoiceCallFeature`] | `m=audio` with a codec list |
//!
//! `PresenceSubscribe` and `PresencePublish` have no offer; they are carried
//! by the subscribe and publish managers.

pub mod chat;
pub mod media_share;
pub mod voice_call;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rcs_sip_core::{HeaderName, SimpleRequestBuilder};

use crate::errors::Result;
use crate::sdp::SessionDescription;

pub use chat::ChatFeature;
pub use media_share::MediaShareFeature;
pub use voice_call::{Codec, VoiceCallFeature};

/// Content type of every offer and answer the features produce
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// The services a session can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    Chat,
    PresenceSubscribe,
    PresencePublish,
    MediaShare,
    VoiceCall,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Chat => write!(f, "chat"),
            FeatureKind::PresenceSubscribe => write!(f, "presence-subscribe"),
            FeatureKind::PresencePublish => write!(f, "presence-publish"),
            FeatureKind::MediaShare => write!(f, "media-share"),
            FeatureKind::VoiceCall => write!(f, "voice-call"),
        }
    }
}

/// Offer/answer behaviour of one kind of session
pub trait SessionFeature: Send + Sync + fmt::Debug {
    fn kind(&self) -> FeatureKind;

    fn content_type(&self) -> &str {
        SDP_CONTENT_TYPE
    }

    /// Media feature tag placed in Accept-Contact
    fn feature_tag(&self) -> Option<&str> {
        None
    }

    /// Offer for an outgoing INVITE
    fn build_offer(&self, local_host: &str) -> Result<SessionDescription>;

    /// Answer to the peer's offer; [`SessionError::UnsupportedContent`] when
    /// nothing in it can be honored
    ///
    /// [`SessionError::UnsupportedContent`]: crate::errors::SessionError::UnsupportedContent
    fn build_answer(&self, offer: &SessionDescription, local_host: &str) -> Result<SessionDescription>;

    /// Validates the answer to our offer
    fn check_answer(&self, answer: &SessionDescription) -> Result<()>;

    /// Adds feature headers to the INVITE
    fn decorate(&self, builder: SimpleRequestBuilder) -> SimpleRequestBuilder {
        match self.feature_tag() {
            Some(tag) => builder.header(HeaderName::AcceptContact, format!("*;{}", tag)),
            None => builder,
        }
    }
}

/// Picks the feature for an inbound invitation
pub trait FeatureFactory: Send + Sync {
    /// `None` when the offer matches no supported feature
    fn select(&self, offer: &SessionDescription) -> Option<Arc<dyn SessionFeature>>;

    /// Feature used to start a session of `kind`
    fn for_kind(&self, _kind: FeatureKind) -> Option<Arc<dyn SessionFeature>> {
        None
    }
}

/// Chooses by the first usable media section of the offer
#[derive(Debug, Clone)]
pub struct DefaultFeatureFactory {
    pub chat: Arc<ChatFeature>,
    pub media_share: Arc<MediaShareFeature>,
    pub voice_call: Arc<VoiceCallFeature>,
}

impl Default for DefaultFeatureFactory {
    fn default() -> Self {
        Self {
            chat: Arc::new(ChatFeature::default()),
            media_share: Arc::new(MediaShareFeature::default()),
            voice_call: Arc::new(VoiceCallFeature::default()),
        }
    }
}

impl FeatureFactory for DefaultFeatureFactory {
    fn select(&self, offer: &SessionDescription) -> Option<Arc<dyn SessionFeature>> {
        let media = offer.media.iter().find(|m| !m.is_rejected())?;
        match media.media.to_ascii_lowercase().as_str() {
            "message" => Some(self.chat.clone()),
            "video" => Some(self.media_share.clone()),
            "audio" => Some(self.voice_call.clone()),
            _ => None,
        }
    }

    fn for_kind(&self, kind: FeatureKind) -> Option<Arc<dyn SessionFeature>> {
        match kind {
            FeatureKind::Chat => Some(self.chat.clone()),
            FeatureKind::MediaShare => Some(self.media_share.clone()),
            FeatureKind::VoiceCall => Some(self.voice_call.clone()),
            FeatureKind::PresenceSubscribe | FeatureKind::PresencePublish => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::MediaDescription;

    #[test]
    fn test_factory_selects_by_media() {
        let factory = DefaultFeatureFactory::default();
        let offer = |media: &str| {
            SessionDescription::new("10.0.0.9")
                .with_media(MediaDescription::new(media, 1000, "RTP/AVP", vec!["0".into()]))
        };
        assert_eq!(factory.select(&offer("message")).unwrap().kind(), FeatureKind::Chat);
        assert_eq!(factory.select(&offer("video")).unwrap().kind(), FeatureKind::MediaShare);
        assert_eq!(factory.select(&offer("audio")).unwrap().kind(), FeatureKind::VoiceCall);
        assert!(factory.select(&offer("application")).is_none());
        assert!(factory.select(&SessionDescription::new("10.0.0.9")).is_none());
    }

    #[test]
    fn test_factory_for_kind() {
        let factory = DefaultFeatureFactory::default();
        assert_eq!(factory.for_kind(FeatureKind::Chat).unwrap().kind(), FeatureKind::Chat);
        assert!(factory.for_kind(FeatureKind::PresencePublish).is_none());
    }

    #[test]
    fn test_decorate_adds_feature_tag() {
        let chat = ChatFeature::default();
        let request = chat
            .decorate(SimpleRequestBuilder::new(rcs_sip_core::Method::Invite, "sip:bob@example.com"))
            .build();
        assert_eq!(
            request.headers.get(&HeaderName::AcceptContact),
            Some("*;+g.oma.sip-im")
        );
    }
}

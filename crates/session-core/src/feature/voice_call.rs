//! IP voice call
//!
//! The answer carries only codecs both sides support, in the offerer's
//! order and with the offerer's payload types.

use crate::errors::{Result, SessionError};
use crate::sdp::{MediaDescription, SessionDescription};

use super::{FeatureKind, SessionFeature};

/// MMTel voice feature tag
pub const FEATURE_MMTEL: &str = "+g.3gpp.icsi-ref=\"urn%3Aurn-7%3A3gpp-service.ims.icsi.mmtel\"";

/// An audio codec as it appears in rtpmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
}

impl Codec {
    pub fn new(payload_type: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            payload_type,
            name: name.into(),
            clock_rate,
        }
    }

    fn matches(&self, name: &str, clock_rate: u32) -> bool {
        self.name.eq_ignore_ascii_case(name) && self.clock_rate == clock_rate
    }
}

#[derive(Debug, Clone)]
pub struct VoiceCallFeature {
    pub port: u16,
    /// Supported codecs in preference order
    pub codecs: Vec<Codec>,
}

impl Default for VoiceCallFeature {
    fn default() -> Self {
        Self {
            port: 40002,
            codecs: vec![
                Codec::new(97, "AMR", 8000),
                Codec::new(0, "PCMU", 8000),
                Codec::new(8, "PCMA", 8000),
            ],
        }
    }
}

impl VoiceCallFeature {
    pub fn new(port: u16, codecs: Vec<Codec>) -> Self {
        Self { port, codecs }
    }

    fn media(&self, codecs: &[Codec]) -> MediaDescription {
        let formats = codecs.iter().map(|c| c.payload_type.to_string()).collect();
        let media = MediaDescription::new("audio", self.port, "RTP/AVP", formats);
        codecs
            .iter()
            .fold(media, |media, c| {
                media.with_attribute("rtpmap", Some(format!("{} {}/{}", c.payload_type, c.name, c.clock_rate)))
            })
            .with_attribute("sendrecv", None)
    }

    /// Offered codecs we also support, in offer order
    pub fn common_codecs(&self, media: &MediaDescription) -> Vec<Codec> {
        let mut offered: Vec<Codec> = media
            .rtpmaps()
            .into_iter()
            .filter_map(|(pt, name, rate)| Some(Codec::new(pt.parse().ok()?, name, rate)))
            .collect();
        // static payload types may be listed without rtpmap
        for format in &media.formats {
            match format.as_str() {
                "0" if !offered.iter().any(|c| c.payload_type == 0) => offered.push(Codec::new(0, "PCMU", 8000)),
                "8" if !offered.iter().any(|c| c.payload_type == 8) => offered.push(Codec::new(8, "PCMA", 8000)),
                _ => {}
            }
        }
        offered
            .into_iter()
            .filter(|offered| self.codecs.iter().any(|ours| ours.matches(&offered.name, offered.clock_rate)))
            .collect()
    }
}

impl SessionFeature for VoiceCallFeature {
    fn kind(&self) -> FeatureKind {
        FeatureKind::VoiceCall
    }

    fn feature_tag(&self) -> Option<&str> {
        Some(FEATURE_MMTEL)
    }

    fn build_offer(&self, local_host: &str) -> Result<SessionDescription> {
        if self.codecs.is_empty() {
            return Err(SessionError::internal("no audio codecs configured"));
        }
        Ok(SessionDescription::new(local_host).with_media(self.media(&self.codecs)))
    }

    fn build_answer(&self, offer: &SessionDescription, local_host: &str) -> Result<SessionDescription> {
        let media = offer
            .media_of("audio")
            .ok_or_else(|| SessionError::unsupported("offer has no audio stream"))?;
        let common = self.common_codecs(media);
        if common.is_empty() {
            return Err(SessionError::unsupported("no common audio codec"));
        }
        Ok(SessionDescription::new(local_host).with_media(self.media(&common)))
    }

    fn check_answer(&self, answer: &SessionDescription) -> Result<()> {
        let media = answer
            .media_of("audio")
            .ok_or_else(|| SessionError::unsupported("answer rejected the audio stream"))?;
        if self.common_codecs(media).is_empty() {
            return Err(SessionError::unsupported("answer selected no codec we offered"));
        }
        Ok(())
    }
}

//! Live video sharing
//!
//! The sharer sends an H.264 stream; the receiving side only renders it.

use crate::errors::{Result, SessionError};
use crate::sdp::{MediaDescription, SessionDescription};

use super::{FeatureKind, SessionFeature};

/// Video share feature tag
pub const FEATURE_VIDEO_SHARE: &str = "+g.3gpp.cs-voice";

const H264: &str = "H264";
const H264_CLOCK_RATE: u32 = 90000;

#[derive(Debug, Clone)]
pub struct MediaShareFeature {
    pub port: u16,
    pub payload_type: u8,
}

impl Default for MediaShareFeature {
    fn default() -> Self {
        Self {
            port: 40000,
            payload_type: 96,
        }
    }
}

impl MediaShareFeature {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    fn media(&self, payload_type: &str, direction: &str) -> MediaDescription {
        MediaDescription::new("video", self.port, "RTP/AVP", vec![payload_type.to_string()])
            .with_attribute("rtpmap", Some(format!("{} {}/{}", payload_type, H264, H264_CLOCK_RATE)))
            .with_attribute(direction, None)
    }
}

/// Payload type the peer uses for H.264
fn h264_payload(media: &MediaDescription) -> Option<String> {
    media
        .rtpmaps()
        .into_iter()
        .find(|(_, name, rate)| name.eq_ignore_ascii_case(H264) && *rate == H264_CLOCK_RATE)
        .map(|(pt, _, _)| pt)
}

impl SessionFeature for MediaShareFeature {
    fn kind(&self) -> FeatureKind {
        FeatureKind::MediaShare
    }

    fn feature_tag(&self) -> Option<&str> {
        Some(FEATURE_VIDEO_SHARE)
    }

    fn build_offer(&self, local_host: &str) -> Result<SessionDescription> {
        let pt = self.payload_type.to_string();
        Ok(SessionDescription::new(local_host).with_media(self.media(&pt, "sendonly")))
    }

    fn build_answer(&self, offer: &SessionDescription, local_host: &str) -> Result<SessionDescription> {
        let media = offer
            .media_of("video")
            .ok_or_else(|| SessionError::unsupported("offer has no video stream"))?;
        if media.direction() != "sendonly" && media.direction() != "sendrecv" {
            return Err(SessionError::unsupported(format!(
                "cannot receive a {} video stream",
                media.direction()
            )));
        }
        let pt = h264_payload(media).ok_or_else(|| SessionError::unsupported("video offer without H.264"))?;
        Ok(SessionDescription::new(local_host).with_media(self.media(&pt, "recvonly")))
    }

    fn check_answer(&self, answer: &SessionDescription) -> Result<()> {
        let media = answer
            .media_of("video")
            .ok_or_else(|| SessionError::unsupported("answer rejected the video stream"))?;
        h264_payload(media)
            .map(|_| ())
            .ok_or_else(|| SessionError::unsupported("answer without H.264"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_receives_only() {
        let sharer = MediaShareFeature::new(41000);
        let viewer = MediaShareFeature::default();
        let offer = sharer.build_offer("10.0.0.9").unwrap();
        assert_eq!(offer.media_of("video").unwrap().direction(), "sendonly");

        let answer = viewer.build_answer(&offer, "10.0.0.1").unwrap();
        assert_eq!(answer.media_of("video").unwrap().direction(), "recvonly");
        assert!(sharer.check_answer(&answer).is_ok());
    }

    #[test]
    fn test_recvonly_offer_is_unsupported() {
        let mut offer = MediaShareFeature::default().build_offer("10.0.0.9").unwrap();
        offer.media[0].attributes.retain(|a| a.name != "sendonly");
        offer.media[0].attributes.push(crate::sdp::Attribute::new("recvonly", None));
        assert!(MediaShareFeature::default().build_answer(&offer, "10.0.0.1").is_err());
    }
}

//! Direct-connection signaling payloads (spec §6 `RTCOffer`/`RTCAnswer`/
//! `RTCIceCandidate`, spec §6 direct-transport `config`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of an SDP blob, mirroring `RtcSdpType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SdpType {
    /// Initial offer.
    Offer,
    /// Answer to an offer.
    Answer,
    /// Provisional answer.
    Pranswer,
    /// Post-negotiation rollback description.
    Rollback,
}

/// A local or remote session description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpPayload {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// `stream_info` carried alongside a media offer/answer (spec §4.5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub has_audio: bool,
    pub has_video: bool,
}

/// `RTCOffer` payload: `{userInfo, offer: {localDescription, target}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcOfferPayload {
    #[serde(default)]
    pub user_info: HashMap<String, serde_json::Value>,
    pub offer: OfferBody,
}

/// Inner `offer` object of [`RtcOfferPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferBody {
    pub local_description: SdpPayload,
    /// Bare name (plus tab suffix) of the intended recipient; since the
    /// envelope itself is broadcast on the room topic, every other receiver
    /// ignores a frame whose `target` isn't them.
    pub target: String,
}

/// `RTCAnswer` payload: `{localDescription, target}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcAnswerPayload {
    pub local_description: SdpPayload,
    pub target: String,
}

/// `RTCIceCandidate` payload. The candidate itself is opaque per spec §6;
/// `target` is still required so every receiver on the shared topic can
/// discard candidates not addressed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtcIceCandidatePayload {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    pub target: String,
}

/// Frame carried on the parent session's `stream_offer` channel (spec §4.5
/// `start(local_stream)`: "sends it on the parent session's `stream_offer`
/// channel with a small struct `{offer_sdp, stream_info}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaOfferFrame {
    pub sdp: String,
    pub stream_info: StreamInfo,
}

/// Frame carried on the parent session's `stream_answer` channel (spec §4.5
/// "create an answer, return it on `stream_answer`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAnswerFrame {
    pub sdp: String,
}

/// Frame carried on the parent session's `stream_ice` channel (spec §4.5
/// "ICE candidates for the media direct connection are exchanged over
/// `stream_ice`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCandidateFrame {
    pub candidate: String,
}

/// One STUN/TURN server entry of the direct-transport `config` (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdp_type_serializes_lower_camel() {
        let json = serde_json::to_string(&SdpType::Pranswer).unwrap();
        assert_eq!(json, "\"pranswer\"");
    }

    #[test]
    fn offer_payload_round_trips() {
        let payload = RtcOfferPayload {
            user_info: HashMap::new(),
            offer: OfferBody {
                local_description: SdpPayload {
                    sdp_type: SdpType::Offer,
                    sdp: "v=0".into(),
                },
                target: "bob".into(),
            },
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: RtcOfferPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn media_frames_round_trip() {
        let offer = MediaOfferFrame {
            sdp: "v=0".into(),
            stream_info: StreamInfo { has_audio: true, has_video: false },
        };
        let json = serde_json::to_string(&offer).unwrap();
        let back: MediaOfferFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sdp, "v=0");
        assert_eq!(back.stream_info, offer.stream_info);

        let answer = MediaAnswerFrame { sdp: "v=0 answer".into() };
        let json = serde_json::to_string(&answer).unwrap();
        let back: MediaAnswerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sdp, answer.sdp);

        let candidate = MediaCandidateFrame { candidate: "candidate:1".into() };
        let json = serde_json::to_string(&candidate).unwrap();
        let back: MediaCandidateFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.candidate, candidate.candidate);
    }
}

//! The outer signaling message carried on the pub/sub bus (spec §3, §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::webrtc::{RtcAnswerPayload, RtcIceCandidatePayload, RtcOfferPayload};

/// `{ sender, timestamp, subtopic, data }` envelope.
///
/// Receivers MUST drop any envelope whose `sender` equals their own
/// advertised name (spec §3 Envelope invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Display name of the publisher (`bare_name` plus optional tab suffix).
    pub sender: String,
    /// Milliseconds since epoch, publisher-assigned.
    pub timestamp: u64,
    /// The subtopic and its associated payload.
    #[serde(flatten)]
    pub subtopic: SubtopicFrame,
}

impl Envelope {
    /// Builds a new envelope stamped with `timestamp`.
    pub fn new(sender: impl Into<String>, timestamp: u64, subtopic: SubtopicFrame) -> Self {
        Self {
            sender: sender.into(),
            timestamp,
            subtopic,
        }
    }

    /// `true` if this envelope was authored by `local_name`, and must
    /// therefore be dropped by every receiver (spec §3).
    pub fn is_self_originated(&self, local_name: &str) -> bool {
        self.sender == local_name
    }
}

/// Adjacently-tagged subtopic payload: `{"subtopic": "...", "data": {...}}`.
///
/// Unknown subtopic strings fail to deserialize; the router logs and drops
/// them rather than panicking (spec §9 Design Notes: "unknown variants
/// logged and dropped rather than silently ignored").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtopic", content = "data")]
pub enum SubtopicFrame {
    /// Peer discovery announcement.
    #[serde(rename = "connect")]
    Connect(ConnectPayload),
    /// Explicit departure from the room.
    #[serde(rename = "unload")]
    Unload(UnloadPayload),
    /// Display name change, keypair preserved.
    #[serde(rename = "nameChange")]
    NameChange(NameChangePayload),
    /// Direct-connection offer.
    #[serde(rename = "RTCOffer")]
    RtcOffer(RtcOfferPayload),
    /// Direct-connection answer.
    #[serde(rename = "RTCAnswer")]
    RtcAnswer(RtcAnswerPayload),
    /// Direct-connection ICE candidate.
    #[serde(rename = "RTCIceCandidate")]
    RtcIceCandidate(RtcIceCandidatePayload),
}

/// `connect` subtopic payload: an announce carrying opaque user info plus
/// the sender's advertised public key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectPayload {
    /// Embedder-defined, opaque to the engine (avatar, color, etc).
    #[serde(default)]
    pub user_info: HashMap<String, serde_json::Value>,
    /// The sender's long-lived public key, in the same string form
    /// [`IdentifyResponse`](crate::IdentifyResponse) carries (spec §3
    /// Identity `{ bare_name, public_key }`). Absent only if the sender
    /// hasn't finished loading its own identity yet.
    #[serde(rename = "publicKey", default)]
    pub public_key: Option<String>,
}

/// `unload` subtopic payload: explicit departure, carries no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnloadPayload {}

/// `nameChange` subtopic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameChangePayload {
    #[serde(rename = "oldName")]
    pub old_name: String,
    #[serde(rename = "newName")]
    pub new_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new(
            "alice",
            1000,
            SubtopicFrame::Connect(ConnectPayload::default()),
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn wire_shape_matches_spec() {
        let env = Envelope::new(
            "bob",
            42,
            SubtopicFrame::NameChange(NameChangePayload {
                old_name: "bob".into(),
                new_name: "bobby".into(),
            }),
        );
        let value: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["sender"], "bob");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["subtopic"], "nameChange");
        assert_eq!(value["data"]["oldName"], "bob");
        assert_eq!(value["data"]["newName"], "bobby");
    }

    #[test]
    fn self_originated_is_detected() {
        let env = Envelope::new("alice", 0, SubtopicFrame::Unload(UnloadPayload {}));
        assert!(env.is_self_originated("alice"));
        assert!(!env.is_self_originated("bob"));
    }

    #[test]
    fn unknown_subtopic_fails_to_parse() {
        let raw = r#"{"sender":"x","timestamp":0,"subtopic":"bogus","data":{}}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn connect_payload_carries_public_key() {
        let env = Envelope::new(
            "bob",
            0,
            SubtopicFrame::Connect(ConnectPayload {
                user_info: HashMap::new(),
                public_key: Some("pk-bob".into()),
            }),
        );
        let value: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["data"]["publicKey"], "pk-bob");
        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn connect_payload_defaults_public_key_to_none() {
        let raw = r#"{"sender":"bob","timestamp":0,"subtopic":"connect","data":{}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        match env.subtopic {
            SubtopicFrame::Connect(payload) => assert_eq!(payload.public_key, None),
            _ => panic!("expected connect subtopic"),
        }
    }
}

//! Labels and framing for the reliable data channels opened over a
//! direct peer connection (spec §3 fixed channel labels, spec §4.4).

use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One of the eleven fixed data-channel labels a direct connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum ChannelLabel {
    #[display(fmt = "connected_via_rtc")]
    #[serde(rename = "connected_via_rtc")]
    ConnectedViaRtc,
    #[display(fmt = "chat")]
    #[serde(rename = "chat")]
    Chat,
    #[display(fmt = "dm")]
    #[serde(rename = "dm")]
    Dm,
    #[display(fmt = "question")]
    #[serde(rename = "question")]
    Question,
    #[display(fmt = "answer")]
    #[serde(rename = "answer")]
    Answer,
    #[display(fmt = "ping")]
    #[serde(rename = "ping")]
    Ping,
    #[display(fmt = "pong")]
    #[serde(rename = "pong")]
    Pong,
    #[display(fmt = "stream_ice")]
    #[serde(rename = "stream_ice")]
    StreamIce,
    #[display(fmt = "stream_offer")]
    #[serde(rename = "stream_offer")]
    StreamOffer,
    #[display(fmt = "stream_answer")]
    #[serde(rename = "stream_answer")]
    StreamAnswer,
    #[display(fmt = "end_call")]
    #[serde(rename = "end_call")]
    EndCall,
}

impl ChannelLabel {
    /// All labels opened eagerly when a [`PeerSession`] is established.
    ///
    /// [`PeerSession`]: https://docs.rs/meshline
    pub const ALL: [ChannelLabel; 11] = [
        ChannelLabel::ConnectedViaRtc,
        ChannelLabel::Chat,
        ChannelLabel::Dm,
        ChannelLabel::Question,
        ChannelLabel::Answer,
        ChannelLabel::Ping,
        ChannelLabel::Pong,
        ChannelLabel::StreamIce,
        ChannelLabel::StreamOffer,
        ChannelLabel::StreamAnswer,
        ChannelLabel::EndCall,
    ];

    /// `true` for `question`/`answer`, the only labels that carry a
    /// request/response frame rather than a bare payload.
    pub fn is_rpc(self) -> bool {
        matches!(self, ChannelLabel::Question | ChannelLabel::Answer)
    }
}

/// Error returned by [`ChannelLabel::from_str`] for an unrecognized label.
#[derive(Debug, Clone, Display)]
#[display(fmt = "unknown channel label: {}", _0)]
pub struct UnknownChannelLabel(String);

impl std::error::Error for UnknownChannelLabel {}

impl FromStr for ChannelLabel {
    type Err = UnknownChannelLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connected_via_rtc" => ChannelLabel::ConnectedViaRtc,
            "chat" => ChannelLabel::Chat,
            "dm" => ChannelLabel::Dm,
            "question" => ChannelLabel::Question,
            "answer" => ChannelLabel::Answer,
            "ping" => ChannelLabel::Ping,
            "pong" => ChannelLabel::Pong,
            "stream_ice" => ChannelLabel::StreamIce,
            "stream_offer" => ChannelLabel::StreamOffer,
            "stream_answer" => ChannelLabel::StreamAnswer,
            "end_call" => ChannelLabel::EndCall,
            other => return Err(UnknownChannelLabel(other.to_owned())),
        })
    }
}

/// A request sent on the `question` channel, correlated to its
/// [`ResponseFrame`] by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub topic: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl RequestFrame {
    pub fn new(id: u64, topic: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id,
            topic: topic.into(),
            body,
        }
    }
}

/// Outcome of a request, carried back on the `answer` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RpcOutcome {
    Ok { body: serde_json::Value },
    Err { message: String },
}

/// A response sent on the `answer` channel, correlated to its
/// [`RequestFrame`] by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(flatten)]
    pub result: RpcOutcome,
}

impl ResponseFrame {
    pub fn ok(id: u64, body: serde_json::Value) -> Self {
        Self {
            id,
            result: RpcOutcome::Ok { body },
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: RpcOutcome::Err {
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_labels_round_trip_through_display_and_from_str() {
        for label in ChannelLabel::ALL {
            let rendered = label.to_string();
            assert_eq!(rendered.parse::<ChannelLabel>().unwrap(), label);
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!("not_a_label".parse::<ChannelLabel>().is_err());
    }

    #[test]
    fn only_question_and_answer_are_rpc() {
        assert!(ChannelLabel::Question.is_rpc());
        assert!(ChannelLabel::Answer.is_rpc());
        assert!(!ChannelLabel::Chat.is_rpc());
    }

    #[test]
    fn response_frame_serializes_flattened_outcome() {
        let resp = ResponseFrame::ok(7, serde_json::json!({"x": 1}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["status"], "ok");
        assert_eq!(value["body"]["x"], 1);
    }
}

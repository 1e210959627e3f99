//! Identity-verification frames exchanged over the `connected_via_rtc`
//! channel immediately after a direct connection opens (spec §4.4 "per-peer
//! identity handshake").

use serde::{Deserialize, Serialize};

/// Number of printable-ASCII characters in a generated challenge.
///
/// Spec §6 calls for the challenge to be "rendered as a length-32 byte
/// string"; a literal 32-character string is used here rather than a
/// base64 or hex encoding of 32 random bytes, since either encoding would
/// inflate the wire length past 32 characters.
pub const CHALLENGE_LEN: usize = 32;

/// Sent by the side that wants to verify its peer's claimed public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyRequest {
    /// A freshly generated, single-use challenge string.
    pub challenge: String,
}

impl IdentifyRequest {
    pub fn new(challenge: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
        }
    }
}

/// Reply to an [`IdentifyRequest`]: the responder's public key and its
/// signature over the challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub public_key: String,
    pub signature: String,
}

impl IdentifyResponse {
    pub fn new(public_key: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            signature: signature.into(),
        }
    }
}

/// Alias of [`IdentifyRequest`] used when a peer re-challenges mid-session
/// (e.g. after a suspected key rebind) rather than at connection setup.
pub type ChallengeRequest = IdentifyRequest;

/// Alias of [`IdentifyResponse`] paired with [`ChallengeRequest`].
pub type ChallengeResponse = IdentifyResponse;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_request_round_trips() {
        let req = IdentifyRequest::new("a".repeat(CHALLENGE_LEN));
        let json = serde_json::to_string(&req).unwrap();
        let back: IdentifyRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
        assert_eq!(req.challenge.len(), CHALLENGE_LEN);
    }

    #[test]
    fn identify_response_round_trips() {
        let resp = IdentifyResponse::new("pubkey-bytes", "sig-bytes");
        let json = serde_json::to_string(&resp).unwrap();
        let back: IdentifyResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, back);
    }
}

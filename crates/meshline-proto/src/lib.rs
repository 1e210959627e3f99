//! Wire protocol shared by every `meshline` peer: the signaling envelope
//! carried over the pub/sub bus, and the request/response frames carried
//! over a [`PeerSession`]'s reliable channels.
//!
//! [`PeerSession`]: https://docs.rs/meshline

mod channel;
mod envelope;
mod identity;
mod webrtc;

pub use self::{
    channel::{ChannelLabel, RequestFrame, ResponseFrame, RpcOutcome},
    envelope::{
        ConnectPayload, Envelope, NameChangePayload, SubtopicFrame,
        UnloadPayload,
    },
    identity::{
        ChallengeRequest, ChallengeResponse, IdentifyRequest, IdentifyResponse,
        CHALLENGE_LEN,
    },
    webrtc::{
        IceServerConfig, MediaAnswerFrame, MediaCandidateFrame, MediaOfferFrame, OfferBody,
        RtcAnswerPayload, RtcIceCandidatePayload, RtcOfferPayload, SdpPayload, SdpType,
        StreamInfo,
    },
};

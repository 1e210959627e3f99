//! Error taxonomy (spec §7) and the [`Result`] alias used throughout the
//! crate.

use derive_more::{Display, From};
use tracerr::Traced;

/// Crate-wide [`Result`] alias: every fallible operation returns its error
/// wrapped in a [`Traced`] so the call chain that raised it survives into
/// logs.
///
/// [`Result`]: std::result::Result
pub type Result<T, E = Traced<Error>> = std::result::Result<T, E>;

/// Top-level error taxonomy realizing spec §7's kinds as the variants of one
/// enum; each inner enum groups the sub-kinds of a single spec category.
#[derive(Clone, Debug, Display, From)]
pub enum Error {
    /// Broker or direct-connection transport failure.
    #[display(fmt = "transport error: {}", _0)]
    Transport(String),

    /// Signaling state-machine violation.
    #[display(fmt = "{}", _0)]
    Handshake(HandshakeError),

    /// Reliable-channel failure.
    #[display(fmt = "{}", _0)]
    Channel(ChannelError),

    /// Identity/admission failure.
    #[display(fmt = "{}", _0)]
    Auth(AuthError),

    /// Invalid configuration supplied at construction.
    #[display(fmt = "invalid configuration: {}", _0)]
    Config(String),

    /// Explicit close or call rejection by the local user.
    #[display(fmt = "aborted by user")]
    UserAbort,

    /// Catch-all for futures cancelled by session teardown.
    #[display(fmt = "session closed")]
    SessionClosed,
}

/// Signaling state-machine violations (spec §4.4, §7 `Handshake`).
#[derive(Clone, Debug, Display)]
pub enum HandshakeError {
    /// A [`PeerSession`](crate::session::PeerSession) spent longer than its
    /// per-state budget without progressing.
    #[display(fmt = "handshake timed out in state {}", _0)]
    Timeout(&'static str),

    /// Glare resolution could not establish a strict winner.
    #[display(fmt = "unresolved glare between offers")]
    Glare,

    /// A remote session description failed to parse or apply.
    #[display(fmt = "malformed session description: {}", _0)]
    BadSdp(String),
}

/// Reliable-channel failures (spec §4.4, §5, §7 `Channel`).
#[derive(Clone, Debug, Display)]
pub enum ChannelError {
    /// A channel did not report `open` within its budget.
    #[display(fmt = "channel {} did not open in time", _0)]
    Timeout(String),

    /// A send was attempted on a channel whose session already closed.
    #[display(fmt = "channel {} is closed", _0)]
    Closed(String),

    /// The outbound buffer stayed above the high-water mark past the
    /// backpressure timeout.
    #[display(fmt = "channel {} is under backpressure", _0)]
    Backpressure(String),
}

/// Identity and admission failures (spec §4.2, §4.4, §7 `Auth`).
#[derive(Clone, Debug, Display)]
pub enum AuthError {
    /// A frame arrived on a gated label before the session validated.
    #[display(fmt = "peer is not authenticated yet")]
    NotAuthenticated,

    /// A signature failed to verify against the claimed or stored key.
    #[display(fmt = "signature verification failed")]
    BadSignature,

    /// [`IdentityStore::bind`] was asked to bind a key already bound to a
    /// different name.
    ///
    /// [`IdentityStore::bind`]: crate::identity::IdentityStore::bind
    #[display(fmt = "public key is already bound to peer {}", _0)]
    AliasCollision(String),

    /// The identify/challenge exchange completed without a successful
    /// verification.
    #[display(fmt = "peer failed identity validation")]
    ValidationFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            Error::SessionClosed.to_string(),
            "session closed"
        );
        assert_eq!(
            Error::from(AuthError::AliasCollision("bob".into())).to_string(),
            "public key is already bound to peer bob"
        );
    }
}

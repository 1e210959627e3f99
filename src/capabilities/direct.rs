//! The `DirectTransport` capability (spec §6): ICE/SDP/data-channel
//! mechanics are delegated entirely to a platform implementation (spec §1
//! Deliberately OUT OF SCOPE); [`PeerSession`](crate::session::PeerSession)
//! and [`MediaSubSession`](crate::media::MediaSubSession) only observe the
//! events and operations contracted here.

use std::rc::Rc;

use async_trait::async_trait;
use futures::stream::LocalBoxStream;
use meshline_proto::{IceServerConfig, SdpType};
use serde::Deserialize;

use crate::error::Result;

/// ICE transport policy: whether non-relay candidates are gathered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportPolicy {
    All,
    Relay,
}

/// ICE candidate bundling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BundlePolicy {
    Balanced,
    MaxBundle,
    MaxCompat,
}

/// RTP/RTCP multiplexing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MuxPolicy {
    Negotiate,
    Require,
}

/// Observable ICE connection states, a subset of the platform's native
/// state machine sufficient for [`PeerSession`](crate::session::PeerSession)
/// to drive its own (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// Configuration for a new direct connection (spec §6 `config`).
#[derive(Debug, Clone)]
pub struct DirectConnectionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub transport_policy: TransportPolicy,
    pub bundle_policy: BundlePolicy,
    pub mux_policy: MuxPolicy,
}

/// Events a [`DirectConnection`] emits, observed by its owning session.
#[derive(Debug, Clone)]
pub enum DirectConnectionEvent {
    /// A local ICE candidate was gathered and should be signaled out.
    IceCandidate(String),
    /// A data channel (locally created or remote-initiated) reported
    /// `open` for this label.
    ChannelOpen(String),
    /// A data channel closed, carrying its label.
    ChannelClose(String),
    /// A message arrived on the named channel.
    ChannelMessage(String, Vec<u8>),
    /// The underlying ICE connection state changed.
    IceConnectionStateChange(IceConnectionState),
    /// A remote media track arrived; track/stream handling itself is
    /// delegated to the embedder's media layer (spec §1 Deliberately OUT OF
    /// SCOPE "the acquisition of local media").
    Track,
}

/// One negotiated direct (peer-to-peer) connection.
#[async_trait(?Send)]
pub trait DirectConnection {
    /// Opens a new reliable ordered data channel labeled `label`.
    async fn create_data_channel(&self, label: &str) -> Result<()>;

    /// Creates a local SDP offer.
    async fn create_offer(&self) -> Result<String>;

    /// Creates a local SDP answer to a previously set remote offer.
    async fn create_answer(&self) -> Result<String>;

    /// Applies `sdp` as the local description.
    async fn set_local_description(&self, sdp_type: SdpType, sdp: &str) -> Result<()>;

    /// Applies `sdp` as the remote description.
    async fn set_remote_description(&self, sdp_type: SdpType, sdp: &str) -> Result<()>;

    /// Adds a remote ICE candidate.
    async fn add_ice_candidate(&self, candidate: &str) -> Result<()>;

    /// Sends `bytes` on the already-open channel labeled `label`.
    async fn send(&self, label: &str, bytes: Vec<u8>) -> Result<()>;

    /// Tears the connection down; idempotent.
    async fn close(&self);

    /// Events emitted by this connection for as long as it is open.
    fn events(&self) -> LocalBoxStream<'static, DirectConnectionEvent>;
}

/// Factory for [`DirectConnection`]s, supplied by the embedder.
#[async_trait(?Send)]
pub trait DirectTransport {
    /// Creates and returns a new, not-yet-negotiated direct connection.
    async fn new_connection(
        &self,
        config: DirectConnectionConfig,
    ) -> Result<Rc<dyn DirectConnection>>;
}

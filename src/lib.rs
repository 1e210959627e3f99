//! A peer-to-peer messaging and media fabric for small rooms (spec §1
//! Overview): participants discover one another over a shared pub/sub
//! topic, bootstrap direct end-to-end connections, and exchange chat,
//! directed messages, request/response pairs, liveness probes, and optional
//! audio/video streams without relaying through a server after setup.
//!
//! [`client::CoreClient`] is the top-level orchestrator embedders drive;
//! everything else in this crate is a capability it composes. Embedders
//! supply the platform-specific edges — [`capabilities::Storage`],
//! [`capabilities::Crypto`], [`capabilities::PubSubTransport`],
//! [`capabilities::DirectTransport`], [`capabilities::Codec`] and
//! [`media::LocalMediaTracks`] — so the core stays free of any browser,
//! OS, or transport-library singleton.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod log;
pub mod media;
pub mod pubsub;
pub mod registry;
pub mod session;
mod tabs;
pub mod trust;

pub use crate::client::{CallHandles, ClientEvent, CoreClient};
pub use crate::config::Config;
pub use crate::error::{AuthError, ChannelError, Error, HandshakeError, Result};
pub use crate::history::{History, HistoryEntry};
pub use crate::identity::IdentityStore;
pub use crate::media::{CallEndReason, LocalMediaTracks, MediaState, MediaSubSession};
pub use crate::pubsub::{PubSubClient, ReconnectPolicy};
pub use crate::registry::{KnownPeer, PeerRegistry};
pub use crate::session::{PeerSession, SessionEvent, SessionState};
pub use crate::trust::{Admission, PeerCategory, TrustPolicy, ANONYMOUS_PREFIX};

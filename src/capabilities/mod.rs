//! Capability interfaces the embedder injects (spec §6, §9 Design Notes
//! "Global mutable browser singletons"): storage, randomness/signing, the
//! pub/sub transport and the direct (peer-to-peer) transport. The core owns
//! no process-wide state of its own; everything ambient is a trait object
//! handed in at construction, mirroring how `medea-jason`'s `platform`
//! module abstracts the browser APIs it can't assume away.

pub(crate) mod compression;
pub(crate) mod crypto;
mod direct;
pub(crate) mod pubsub;
pub(crate) mod storage;

pub use self::{
    compression::{Codec, IdentityCodec},
    crypto::{Crypto, RsaCrypto},
    direct::{
        BundlePolicy, DirectConnection, DirectConnectionConfig, DirectConnectionEvent,
        DirectTransport, IceConnectionState, MuxPolicy, TransportPolicy,
    },
    pubsub::PubSubTransport,
    storage::Storage,
};

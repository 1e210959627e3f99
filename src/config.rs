//! Engine configuration (spec §6 `config`, SPEC_FULL.md §B "Configuration"):
//! topic naming, announce cadence, per-state timeouts, channel backpressure
//! water marks, ICE transport settings and the history ring-buffer capacity.
//!
//! Deserialized with `serde`, the way the `medea` root crate layers its own
//! `Config` over the `config` crate; every field defaults to the literal
//! constant spec §4 and §5 name, via `smart_default`.

use std::time::Duration;

use meshline_proto::IceServerConfig;
use serde::Deserialize;
use smart_default::SmartDefault;

use crate::capabilities::{BundlePolicy, MuxPolicy, TransportPolicy};
use crate::error::{Error, Result};
use crate::session::channel::BackpressureConfig;

/// Announce cadence (spec §4.1): burst-then-quiesce while unconnected.
#[derive(Debug, Clone, Copy, SmartDefault, Deserialize)]
#[serde(default)]
pub struct AnnounceCadence {
    /// Interval of the initial burst.
    #[default(Duration::from_secs(3))]
    pub burst_interval: Duration,

    /// Wall-clock duration the initial burst lasts for.
    #[default(Duration::from_secs(15))]
    pub burst_duration: Duration,

    /// Interval used once the burst window has elapsed.
    #[default(Duration::from_secs(30))]
    pub steady_interval: Duration,
}

/// Per-[`SessionState`](crate::session::SessionState) timeouts (spec §4.4).
#[derive(Debug, Clone, Copy, SmartDefault, Deserialize)]
#[serde(default)]
pub struct HandshakeTimeouts {
    /// `offering`/`answering` budget.
    #[default(Duration::from_secs(30))]
    pub offer_answer: Duration,

    /// `negotiating`/`connecting` budget.
    #[default(Duration::from_secs(15))]
    pub negotiate_connect: Duration,

    /// Budget for the underlying transport to leave ICE `new`.
    #[default(Duration::from_secs(10))]
    pub ice_new_stall: Duration,

    /// Budget for the underlying transport to leave ICE `checking`.
    #[default(Duration::from_secs(15))]
    pub ice_checking_stall: Duration,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, SmartDefault, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix shared by every room topic (spec §6 "Topic naming").
    #[default(String::from("meshline"))]
    pub base_topic: String,

    /// Separator joining `base_topic` and the room id.
    #[default(String::from("/"))]
    pub separator: String,

    /// Length, in serialized bytes, above which a published envelope is
    /// compressed (spec §4.1 `publish`).
    #[default(256)]
    pub compression_threshold: usize,

    /// `true` if the codec supplied at construction should be used at all;
    /// `false` always publishes raw JSON regardless of threshold.
    #[default(true)]
    pub compression_enabled: bool,

    pub announce_cadence: AnnounceCadence,

    pub handshake_timeouts: HandshakeTimeouts,

    pub channel_backpressure: BackpressureConfig,

    /// STUN/TURN server list handed to every new direct connection (spec
    /// §6 `config`).
    pub ice_servers: Vec<IceServerConfig>,

    /// ICE transport policy (spec §6 `config`).
    #[default(TransportPolicy::All)]
    pub transport_policy: TransportPolicy,

    /// ICE bundle policy (spec §6 `config`).
    #[default(BundlePolicy::Balanced)]
    pub bundle_policy: BundlePolicy,

    /// RTP/RTCP mux policy (spec §6 `config`).
    #[default(MuxPolicy::Negotiate)]
    pub mux_policy: MuxPolicy,

    /// Capacity of the signaling history ring buffer (spec §9 Design Notes
    /// "Unbounded history").
    #[default(256)]
    pub history_capacity: usize,

    /// How long a `tabpoll_<id>` entry may go unrefreshed before its tab id
    /// is considered stale and eligible for recycling (spec §6 "Persisted
    /// state layout").
    #[default(Duration::from_secs(30))]
    pub tab_stale_timeout: Duration,

    /// Minimum acceptable reserved prefix below which `tab_ids` recycle to
    /// `0` rather than incrementing further (spec §6: "unless `min(existing)
    /// >= 10`, in which case it is `0`").
    #[default(10)]
    pub tab_id_recycle_floor: u32,
}

impl Config {
    /// Layers an optional config file over the process environment
    /// (`MESHLINE_*`, double-underscore-nested) over [`Config::default`],
    /// via the [`config`] crate, the way the `medea` root crate's own
    /// `Conf::parse` layers a file over `MEDEA_*` environment variables.
    ///
    /// `path`, if given, must deserialize into a (possibly partial) `Config`;
    /// a missing file at the given path is not an error, mirroring `medea`'s
    /// "config file is optional" stance.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut raw = ::config::Config::default();
        if let Some(path) = path {
            raw.merge(::config::File::with_name(path).required(false))
                .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        }
        raw.merge(::config::Environment::with_prefix("MESHLINE").separator("__"))
            .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;

        let overrides: Self = raw
            .try_into()
            .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        Ok(overrides)
    }
}

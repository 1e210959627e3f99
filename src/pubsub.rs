//! `PubSubClient` (spec §4.1): thin adapter over the broker transport.
//! Subscribes to the room topic, publishes enveloped messages with optional
//! payload compression, and delivers inbound envelopes after filtering
//! self-originated frames.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use backoff::future::Sleeper;
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::future::BoxFuture;
use futures::stream::LocalBoxStream;
use futures::{FutureExt as _, StreamExt as _};
use meshline_proto::{ConnectPayload, Envelope, SubtopicFrame};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::capabilities::{Codec, PubSubTransport};
use crate::config::AnnounceCadence;
use crate::error::{Error, Result};

/// Bounded-attempt, fixed-delay reconnect policy (spec §4.1 "on loss,
/// reconnects with a bounded-attempt, fixed-delay policy"); grounded on the
/// same [`backoff`] crate the `jason` root crate uses for its own
/// reconnect delayer, just with the multiplier pinned to `1.0` and
/// `max_elapsed_time` bounding the attempt count rather than wall time.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.delay,
            initial_interval: self.delay,
            randomization_factor: 0.0,
            multiplier: 1.0,
            max_interval: self.delay,
            max_elapsed_time: Some(self.delay * self.max_attempts),
            ..ExponentialBackoff::default()
        }
    }
}

struct TokioSleeper;

impl Sleeper for TokioSleeper {
    type Sleep = BoxFuture<'static, ()>;

    fn sleep(&self, delay: Duration) -> Self::Sleep {
        tokio::time::sleep(delay).boxed()
    }
}

/// Topic-scoped broker adapter, owning envelope encode/decode and the
/// announce cadence (spec §4.1).
pub struct PubSubClient {
    transport: Rc<dyn PubSubTransport>,
    codec: Rc<dyn Codec>,
    compression_threshold: usize,
    compression_enabled: bool,
    reconnect: ReconnectPolicy,
    topic: String,
    logger: slog::Logger,
}

impl PubSubClient {
    #[must_use]
    pub fn new(
        transport: Rc<dyn PubSubTransport>,
        codec: Rc<dyn Codec>,
        base_topic: &str,
        separator: &str,
        room: &str,
        compression_threshold: usize,
        compression_enabled: bool,
        reconnect: ReconnectPolicy,
        logger: slog::Logger,
    ) -> Self {
        Self {
            transport,
            codec,
            compression_threshold,
            compression_enabled,
            reconnect,
            topic: format!("{base_topic}{separator}{room}"),
            logger,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Connects and subscribes, retrying the connect step under the
    /// configured [`ReconnectPolicy`] (spec §4.1 `connect()`).
    pub async fn connect(&self) -> Result<()> {
        let policy = self.reconnect.backoff();
        let transport = Rc::clone(&self.transport);
        backoff::future::Retry::new(
            TokioSleeper,
            policy,
            |_, _| {},
            || async {
                transport.connect().await.map_err(|e| {
                    slog::warn!(self.logger, "broker connect attempt failed"; "error" => e.to_string());
                    backoff::Error::Transient(e)
                })
            },
        )
        .await?;
        self.transport.subscribe(&self.topic).await?;
        Ok(())
    }

    /// Serializes, optionally compresses, and publishes an envelope (spec
    /// §4.1 `publish(subtopic, data)`).
    pub async fn publish(&self, sender: &str, timestamp: u64, subtopic: SubtopicFrame) -> Result<()> {
        let envelope = Envelope::new(sender, timestamp, subtopic);
        let json = serde_json::to_vec(&envelope)
            .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        let payload = if self.compression_enabled && json.len() >= self.compression_threshold {
            self.codec.encode(&json)
        } else {
            json
        };
        self.transport.publish(&self.topic, payload).await
    }

    /// Convenience wrapper for the `connect` subtopic (spec §4.1 "publish an
    /// `announce` immediately").
    pub async fn announce(
        &self,
        sender: &str,
        timestamp: u64,
        user_info: HashMap<String, JsonValue>,
        public_key: Option<String>,
    ) -> Result<()> {
        self.publish(
            sender,
            timestamp,
            SubtopicFrame::Connect(ConnectPayload { user_info, public_key }),
        )
        .await
    }

    /// Decodes one inbound payload: attempts the configured codec's
    /// `decode` first, falls back to raw JSON (spec §4.1 `on_message`),
    /// and drops self-originated envelopes.
    #[must_use]
    pub fn on_message(&self, local_name: &str, bytes: &[u8]) -> Option<Envelope> {
        let json = self.codec.decode(bytes).unwrap_or_else(|| bytes.to_vec());
        let envelope = match serde_json::from_slice::<Envelope>(&json) {
            Ok(envelope) => envelope,
            Err(_) => match serde_json::from_slice::<Envelope>(bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    slog::warn!(self.logger, "dropped malformed envelope"; "error" => e.to_string());
                    return None;
                }
            },
        };
        if envelope.is_self_originated(local_name) {
            return None;
        }
        Some(envelope)
    }

    /// Decoded envelopes for this topic, self-originated frames already
    /// filtered out.
    pub fn envelopes(self: &Rc<Self>, local_name: String) -> LocalBoxStream<'static, Envelope> {
        let this = Rc::clone(self);
        let topic = self.topic.clone();
        this.transport
            .messages()
            .filter_map(move |(msg_topic, bytes)| {
                let envelope = (msg_topic == topic)
                    .then(|| this.on_message(&local_name, &bytes))
                    .flatten();
                futures::future::ready(envelope)
            })
            .boxed_local()
    }

    /// Spawns the announce-cadence task (spec §4.1 "Announcement cadence"):
    /// burst every `burst_interval` for `burst_duration`, then steady at
    /// `steady_interval`, skipping publication while `any_connected` is set
    /// and resuming it once it clears again (spec §9 Open Questions:
    /// bounded-cadence policy, silenced only *while* any session is
    /// `connected`, not permanently retired the first time one is).
    pub fn spawn_announce_cadence(
        self: &Rc<Self>,
        cadence: AnnounceCadence,
        sender: String,
        user_info: Rc<dyn Fn() -> HashMap<String, JsonValue>>,
        public_key: Rc<dyn Fn() -> Option<String>>,
        any_connected: Rc<Cell<bool>>,
        now_millis: Rc<dyn Fn() -> u64>,
    ) {
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            let burst_ticks = (cadence.burst_duration.as_secs() / cadence.burst_interval.as_secs().max(1)).max(1);
            if !any_connected.get() {
                if let Err(e) = this.announce(&sender, now_millis(), user_info(), public_key()).await {
                    slog::warn!(this.logger, "initial announce failed"; "error" => e.to_string());
                }
            }
            for _ in 0..burst_ticks {
                tokio::time::sleep(cadence.burst_interval).await;
                if any_connected.get() {
                    continue;
                }
                if let Err(e) = this.announce(&sender, now_millis(), user_info(), public_key()).await {
                    slog::warn!(this.logger, "burst announce failed"; "error" => e.to_string());
                }
            }
            loop {
                tokio::time::sleep(cadence.steady_interval).await;
                if any_connected.get() {
                    continue;
                }
                if let Err(e) = this.announce(&sender, now_millis(), user_info(), public_key()).await {
                    slog::warn!(this.logger, "steady announce failed"; "error" => e.to_string());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::compression::fake::TaggingCodec;
    use crate::capabilities::compression::IdentityCodec;
    use crate::capabilities::pubsub::fake::InMemoryBroker;

    fn client(transport: Rc<dyn PubSubTransport>, codec: Rc<dyn Codec>) -> Rc<PubSubClient> {
        Rc::new(PubSubClient::new(
            transport,
            codec,
            "meshline",
            "/",
            "room1",
            256,
            true,
            ReconnectPolicy::default(),
            crate::log::discard_logger(),
        ))
    }

    #[test]
    fn topic_joins_base_separator_and_room() {
        let client = client(
            Rc::new(InMemoryBroker::default()),
            Rc::new(IdentityCodec::default()),
        );
        assert_eq!(client.topic(), "meshline/room1");
    }

    #[tokio::test]
    async fn publish_then_on_message_round_trips_uncompressed() {
        let broker = Rc::new(InMemoryBroker::default());
        let other = InMemoryBroker::default();
        broker.link(&other);
        let client = client(Rc::clone(&broker) as Rc<dyn PubSubTransport>, Rc::new(IdentityCodec::default()));

        let mut rx = other.messages();
        client.publish("alice", 1000, SubtopicFrame::Unload(Default::default())).await.unwrap();
        let (topic, bytes) = rx.next().await.unwrap();
        assert_eq!(topic, "meshline/room1");
        let envelope = client.on_message("bob", &bytes).unwrap();
        assert_eq!(envelope.sender, "alice");
    }

    #[tokio::test]
    async fn self_originated_envelope_is_dropped() {
        let broker = Rc::new(InMemoryBroker::default());
        let client = client(Rc::clone(&broker) as Rc<dyn PubSubTransport>, Rc::new(IdentityCodec::default()));
        let json = serde_json::to_vec(&Envelope::new(
            "alice",
            0,
            SubtopicFrame::Unload(Default::default()),
        ))
        .unwrap();
        assert!(client.on_message("alice", &json).is_none());
    }

    #[tokio::test]
    async fn compressed_payload_round_trips_above_threshold() {
        let broker = Rc::new(InMemoryBroker::default());
        let client = Rc::new(PubSubClient::new(
            Rc::clone(&broker) as Rc<dyn PubSubTransport>,
            Rc::new(TaggingCodec::default()),
            "meshline",
            "/",
            "room1",
            1,
            true,
            ReconnectPolicy::default(),
            crate::log::discard_logger(),
        ));
        let other = InMemoryBroker::default();
        broker.link(&other);
        let mut rx = other.messages();
        client
            .announce("alice", 1, HashMap::new(), None)
            .await
            .unwrap();
        let (_, bytes) = rx.next().await.unwrap();
        // The tagging codec prefixes every encoded payload with its magic.
        assert!(bytes.starts_with(b"\0MLC1"));
        let envelope = client.on_message("bob", &bytes).unwrap();
        assert_eq!(envelope.sender, "alice");
    }
}

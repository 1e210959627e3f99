//! `CoreClient` (spec §4.6): top-level orchestrator. Owns every subsystem,
//! runs the reconciliation loop, dispatches inbound signaling frames, and
//! exposes the public API.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::{FutureExt as _, StreamExt as _};
use meshline_proto::{
    ChannelLabel, ConnectPayload, Envelope, IceServerConfig, MediaAnswerFrame, MediaCandidateFrame,
    MediaOfferFrame, NameChangePayload, OfferBody, ResponseFrame, RtcAnswerPayload,
    RtcIceCandidatePayload, RtcOfferPayload, SdpPayload, SdpType, StreamInfo, SubtopicFrame,
    UnloadPayload,
};
use serde_json::Value as JsonValue;

use crate::capabilities::{
    BundlePolicy, Codec, DirectConnectionConfig, DirectTransport, MuxPolicy, PubSubTransport,
    Storage, TransportPolicy,
};
use crate::config::Config;
use crate::error::{AuthError, Error, Result};
use crate::history::{History, HistoryEntry};
use crate::identity::IdentityStore;
use crate::media::{CallEndReason, LocalMediaTracks, MediaSubSession};
use crate::pubsub::PubSubClient;
use crate::registry::PeerRegistry;
use crate::tabs::{self, TabLease};
use crate::session::{PeerSession, SessionEvent};
use crate::trust::{Admission, PeerCategory, TrustPolicy};

/// Events an embedder subscribes to via [`CoreClient::on_event`] (spec §4.6
/// public API event list, minus `on_question`, which is request/response
/// and has its own setter).
#[derive(Clone)]
pub enum ClientEvent {
    PeerConnected { peer: String },
    PeerDisconnected { peer: String, reason: Error },
    Chat { sender: String, text: String },
    Dm { sender: String, text: String },
    IncomingCall { peer: String, media: Rc<MediaSubSession> },
    Validated { peer: String },
    ValidationFailed { peer: String },
}

/// A resolved call handed back to whoever called [`CoreClient::call`].
pub struct CallHandles {
    pub media: Rc<MediaSubSession>,
    pub start: oneshot::Receiver<Result<()>>,
    pub end: futures::future::Shared<oneshot::Receiver<CallEndReason>>,
}

enum Command {
    SendChat(String),
    SendDm(String, String),
    Ask(String, String, JsonValue, oneshot::Sender<Result<JsonValue>>),
    Respond(String, ResponseFrame),
    Call(
        String,
        StreamInfo,
        Rc<dyn LocalMediaTracks>,
        oneshot::Sender<Result<CallHandles>>,
    ),
    HangUp(String),
    AcceptCall(String, Rc<dyn LocalMediaTracks>, oneshot::Sender<Result<()>>),
    RejectCall(String, oneshot::Sender<Result<()>>),
    ChangeName(String),
    Leave,
}

enum LoopEvent {
    Envelope(Envelope),
    Session(String, SessionEvent),
    Command(Command),
}

fn validate_bare_name(name: &str) -> Result<()> {
    if name.contains(['(', ')', '|']) || name.trim() != name || name.is_empty() {
        return Err(tracerr::new!(Error::Config(format!(
            "invalid bare name {name:?}"
        ))));
    }
    Ok(())
}

/// Top-level orchestrator (spec §2, §4.6): owns `PeerRegistry`,
/// `IdentityStore`, `TrustPolicy`, `PubSubClient`, history, and the
/// reconciliation loop.
pub struct CoreClient {
    config: Config,
    identity: Rc<IdentityStore>,
    trust: TrustPolicy,
    direct_transport: Rc<dyn DirectTransport>,
    storage: Rc<dyn Storage>,
    tab_lease: TabLease,
    pubsub: RefCell<Option<Rc<PubSubClient>>>,
    registry: RefCell<PeerRegistry>,
    media: RefCell<HashMap<String, Rc<MediaSubSession>>>,
    pending_candidates: RefCell<HashMap<String, String>>,
    history: RefCell<History>,
    bare_name: RefCell<String>,
    tab_id: Cell<Option<u32>>,
    any_connected: Rc<Cell<bool>>,
    session_events_tx: mpsc::UnboundedSender<(String, SessionEvent)>,
    session_events_rx: RefCell<Option<mpsc::UnboundedReceiver<(String, SessionEvent)>>>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: RefCell<Option<mpsc::UnboundedReceiver<Command>>>,
    event_handler: RefCell<Option<Rc<dyn Fn(ClientEvent)>>>,
    question_handler:
        RefCell<Option<Rc<dyn Fn(String, JsonValue) -> BoxFuture<'static, JsonValue>>>>,
    logger: slog::Logger,
}

impl CoreClient {
    #[must_use]
    pub fn new(
        config: Config,
        identity: Rc<IdentityStore>,
        trust: TrustPolicy,
        direct_transport: Rc<dyn DirectTransport>,
        storage: Rc<dyn Storage>,
        logger: slog::Logger,
    ) -> Rc<Self> {
        let (session_events_tx, session_events_rx) = mpsc::unbounded();
        let (commands_tx, commands_rx) = mpsc::unbounded();
        let tab_lease = TabLease::new(
            Rc::clone(&storage),
            config.tab_stale_timeout,
            config.tab_id_recycle_floor,
        );
        Rc::new(Self {
            history: RefCell::new(History::new(config.history_capacity)),
            config,
            identity,
            trust,
            direct_transport,
            storage,
            tab_lease,
            pubsub: RefCell::new(None),
            registry: RefCell::new(PeerRegistry::new()),
            media: RefCell::new(HashMap::new()),
            pending_candidates: RefCell::new(HashMap::new()),
            bare_name: RefCell::new(String::new()),
            tab_id: Cell::new(None),
            any_connected: Rc::new(Cell::new(false)),
            session_events_tx,
            session_events_rx: RefCell::new(Some(session_events_rx)),
            commands_tx,
            commands_rx: RefCell::new(Some(commands_rx)),
            event_handler: RefCell::new(None),
            question_handler: RefCell::new(None),
            logger,
        })
    }

    pub fn on_event(&self, handler: Rc<dyn Fn(ClientEvent)>) {
        *self.event_handler.borrow_mut() = Some(handler);
    }

    pub fn on_question(
        &self,
        handler: Rc<dyn Fn(String, JsonValue) -> BoxFuture<'static, JsonValue>>,
    ) {
        *self.question_handler.borrow_mut() = Some(handler);
    }

    fn emit(&self, event: ClientEvent) {
        if let Some(handler) = self.event_handler.borrow().as_ref() {
            handler(event);
        }
    }

    #[must_use]
    pub fn local_name(&self) -> String {
        let bare = self.bare_name.borrow().clone();
        match self.tab_id.get() {
            Some(tab) => format!("{bare}({tab})"),
            None => bare,
        }
    }

    fn ice_config(&self) -> DirectConnectionConfig {
        DirectConnectionConfig {
            ice_servers: self.config.ice_servers.clone(),
            transport_policy: self.config.transport_policy,
            bundle_policy: self.config.bundle_policy,
            mux_policy: self.config.mux_policy,
        }
    }

    /// Joins `room` under `bare_name` (spec §4.6, §3 bare-name rules):
    /// validates the name, loads/generates the local identity, connects the
    /// broker, and spawns the reconciliation loop.
    ///
    /// `bare_name` of `None` falls back to the persisted display name (spec
    /// §6 `name` key); there must be one or the other. `tab_id` of `None`
    /// leases a fresh identifier via [`TabLease`] (spec §6 `tabs` /
    /// `tabpoll_<id>`) instead of running single-tab.
    pub async fn join(
        self: &Rc<Self>,
        transport: Rc<dyn PubSubTransport>,
        codec: Rc<dyn Codec>,
        room: &str,
        bare_name: Option<&str>,
        tab_id: Option<u32>,
    ) -> Result<()> {
        let bare_name = match bare_name {
            Some(name) => name.to_owned(),
            None => tabs::load_persisted_name(self.storage.as_ref())
                .await
                .ok_or_else(|| tracerr::new!(Error::Config("no bare name supplied or persisted".into())))?,
        };
        validate_bare_name(&bare_name)?;
        self.identity.load_or_generate().await?;
        tabs::persist_name_if_not_anonymous(self.storage.as_ref(), &bare_name).await;
        let tab_id = match tab_id {
            Some(id) => id,
            None => self.tab_lease.lease(now_millis()).await,
        };
        *self.bare_name.borrow_mut() = bare_name;
        self.tab_id.set(Some(tab_id));

        let pubsub = Rc::new(PubSubClient::new(
            transport,
            codec,
            &self.config.base_topic,
            &self.config.separator,
            room,
            self.config.compression_threshold,
            self.config.compression_enabled,
            crate::pubsub::ReconnectPolicy::default(),
            self.logger.clone(),
        ));
        pubsub.connect().await?;
        *self.pubsub.borrow_mut() = Some(Rc::clone(&pubsub));

        self.spawn_reconciliation_loop(Rc::clone(&pubsub));

        let cadence = self.config.announce_cadence;
        let this = Rc::clone(self);
        let this_for_key = Rc::clone(&this);
        pubsub.spawn_announce_cadence(
            cadence,
            self.local_name(),
            Rc::new(move || HashMap::new()),
            Rc::new(move || Some(this_for_key.identity.public_key_string())),
            Rc::clone(&this.any_connected),
            Rc::new(now_millis),
        );
        Ok(())
    }

    fn spawn_reconciliation_loop(self: &Rc<Self>, pubsub: Rc<PubSubClient>) {
        let session_events_rx = self
            .session_events_rx
            .borrow_mut()
            .take()
            .expect("reconciliation loop spawned exactly once");
        let commands_rx = self
            .commands_rx
            .borrow_mut()
            .take()
            .expect("reconciliation loop spawned exactly once");

        let mut envelopes = pubsub.envelopes(self.local_name()).map(LoopEvent::Envelope).fuse();
        let mut sessions = session_events_rx
            .map(|(peer, event)| LoopEvent::Session(peer, event))
            .fuse();
        let mut commands = commands_rx.map(LoopEvent::Command).fuse();

        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            loop {
                let event: LoopEvent = futures::select! {
                    event = envelopes.select_next_some() => event,
                    event = sessions.select_next_some() => event,
                    event = commands.select_next_some() => event,
                    complete => break,
                };
                match weak.upgrade() {
                    Some(this) => this.handle_loop_event(event).await,
                    None => break,
                }
            }
        });
    }

    async fn handle_loop_event(self: Rc<Self>, event: LoopEvent) {
        match event {
            LoopEvent::Envelope(envelope) => self.handle_envelope(envelope).await,
            LoopEvent::Session(peer, event) => self.handle_session_event(peer, event).await,
            LoopEvent::Command(command) => self.handle_command(command).await,
        }
    }

    async fn handle_envelope(self: &Rc<Self>, envelope: Envelope) {
        let sender = envelope.sender.clone();
        let now = now_millis();
        self.history.borrow_mut().record(HistoryEntry {
            timestamp_millis: now,
            peer: sender.clone(),
            description: format!("{:?}", envelope.subtopic),
        });

        match envelope.subtopic {
            SubtopicFrame::Connect(ConnectPayload { user_info, public_key }) => {
                self.registry.borrow_mut().observe_announce(
                    &sender,
                    user_info,
                    public_key,
                    std::time::Duration::from_millis(now),
                );
                self.maybe_admit_and_offer(sender).await;
            }
            SubtopicFrame::Unload(UnloadPayload {}) => {
                self.registry.borrow_mut().forget(&sender);
                if let Some(session) = self.registry.borrow_mut().remove_session(&sender) {
                    session
                        .close(Error::SessionClosed, &self.session_events_tx)
                        .await;
                }
            }
            SubtopicFrame::NameChange(NameChangePayload { old_name, new_name }) => {
                self.registry.borrow_mut().rename(&old_name, &new_name);
            }
            SubtopicFrame::RtcOffer(RtcOfferPayload { user_info: _, offer }) => {
                if offer.target != self.local_name() {
                    return;
                }
                self.handle_rtc_offer(sender, offer).await;
            }
            SubtopicFrame::RtcAnswer(RtcAnswerPayload { local_description, target }) => {
                if target != self.local_name() {
                    return;
                }
                if let Some(session) = self.registry.borrow().session(&sender) {
                    if let Err(e) = session.handle_remote_answer(&local_description.sdp).await {
                        slog::warn!(self.logger, "failed to apply remote answer"; "error" => e.to_string());
                    }
                }
            }
            SubtopicFrame::RtcIceCandidate(RtcIceCandidatePayload { candidate, target, .. }) => {
                if target != self.local_name() {
                    return;
                }
                if let Some(session) = self.registry.borrow().session(&sender) {
                    if let Err(e) = session.handle_remote_candidate(candidate).await {
                        slog::warn!(self.logger, "failed to apply remote candidate"; "error" => e.to_string());
                    }
                } else {
                    // Capped at the most recent candidate per sender (spec
                    // §4.6 "buffered in a short-lived pending map ... capped
                    // at the most recent per sender").
                    self.pending_candidates.borrow_mut().insert(sender, candidate);
                }
            }
        }
    }

    async fn maybe_admit_and_offer(self: &Rc<Self>, peer: String) {
        if self.registry.borrow().session(&peer).is_some() {
            return;
        }
        let category = self.categorize(&peer);
        let admission = self.trust.admission_for(category);
        if admission == Admission::Reject {
            slog::info!(self.logger, "rejected peer by policy"; "peer" => &peer, "category" => format!("{:?}", category));
            return;
        }
        // `prompt_then_trust`/`connect_then_prompt` both still establish the
        // transport-level session; the prompt itself gates only the
        // `validated` transition in `handle_session_event`'s `Connected`
        // arm, per spec §4.4 step 3 ("with user assent").

        let connection = match self.direct_transport.new_connection(self.ice_config()).await {
            Ok(connection) => connection,
            Err(e) => {
                slog::warn!(self.logger, "failed to create direct connection"; "error" => e.to_string());
                return;
            }
        };
        let session = PeerSession::new(
            peer.clone(),
            connection,
            self.config.handshake_timeouts,
            self.config.channel_backpressure,
            self.session_events_tx.clone(),
            self.logger.new(slog::o!("peer" => peer.clone())),
        );
        self.registry.borrow_mut().insert_session(peer.clone(), Rc::clone(&session));

        if let Some(candidate) = self.pending_candidates.borrow_mut().remove(&peer) {
            let _ = session.handle_remote_candidate(candidate).await;
        }

        match session.begin_offer().await {
            Ok(sdp) => self.send_offer(&peer, sdp).await,
            Err(e) => slog::warn!(self.logger, "failed to create offer"; "error" => e.to_string()),
        }
    }

    async fn send_offer(&self, peer: &str, sdp: String) {
        if let Some(pubsub) = self.pubsub.borrow().clone() {
            let payload = SubtopicFrame::RtcOffer(RtcOfferPayload {
                user_info: HashMap::new(),
                offer: OfferBody {
                    local_description: SdpPayload { sdp_type: SdpType::Offer, sdp },
                    target: peer.to_owned(),
                },
            });
            if let Err(e) = pubsub.publish(&self.local_name(), now_millis(), payload).await {
                slog::warn!(self.logger, "failed to publish offer"; "error" => e.to_string());
            }
        }
    }

    async fn handle_rtc_offer(self: &Rc<Self>, peer: String, offer: OfferBody) {
        let existing = self.registry.borrow().session(&peer);
        match existing {
            Some(session) if session.state() == crate::session::SessionState::Offering => {
                // Glare: both sides offered.
                match session
                    .resolve_glare(&self.local_name(), &peer, &offer.local_description.sdp)
                    .await
                {
                    Ok(Some(answer_sdp)) => self.send_answer(&peer, answer_sdp).await,
                    Ok(None) => {}
                    Err(e) => slog::warn!(self.logger, "glare resolution failed"; "error" => e.to_string()),
                }
            }
            Some(_) => {
                // A fresh offer from a peer we already have a non-offering
                // session with is out of protocol order; ignored.
            }
            None => {
                let category = self.categorize(&peer);
                if self.trust.admission_for(category) == Admission::Reject {
                    slog::info!(self.logger, "rejected incoming offer by policy"; "peer" => &peer);
                    return;
                }
                let connection = match self.direct_transport.new_connection(self.ice_config()).await {
                    Ok(connection) => connection,
                    Err(e) => {
                        slog::warn!(self.logger, "failed to create direct connection"; "error" => e.to_string());
                        return;
                    }
                };
                let session = PeerSession::new(
                    peer.clone(),
                    connection,
                    self.config.handshake_timeouts,
                    self.config.channel_backpressure,
                    self.session_events_tx.clone(),
                    self.logger.new(slog::o!("peer" => peer.clone())),
                );
                self.registry.borrow_mut().insert_session(peer.clone(), Rc::clone(&session));
                if let Some(candidate) = self.pending_candidates.borrow_mut().remove(&peer) {
                    let _ = session.handle_remote_candidate(candidate).await;
                }
                match session.begin_answer(&offer.local_description.sdp).await {
                    Ok(answer_sdp) => self.send_answer(&peer, answer_sdp).await,
                    Err(e) => slog::warn!(self.logger, "failed to answer offer"; "error" => e.to_string()),
                }
            }
        }
    }

    async fn send_answer(&self, peer: &str, sdp: String) {
        if let Some(pubsub) = self.pubsub.borrow().clone() {
            let payload = SubtopicFrame::RtcAnswer(RtcAnswerPayload {
                local_description: SdpPayload { sdp_type: SdpType::Answer, sdp },
                target: peer.to_owned(),
            });
            if let Err(e) = pubsub.publish(&self.local_name(), now_millis(), payload).await {
                slog::warn!(self.logger, "failed to publish answer"; "error" => e.to_string());
            }
        }
    }

    /// Derives a [`PeerCategory`] from the key the peer actually offered in
    /// its last `connect` announcement, compared against what's on file for
    /// its bare name (spec §4.3).
    fn categorize(&self, peer: &str) -> PeerCategory {
        let offered_key = self.registry.borrow().known_peer(peer).and_then(|p| p.public_key.clone());
        let has_offered_key = offered_key.is_some();
        let stored_key_for_name = self.identity.known_key_for(peer);

        let key_is_known = offered_key
            .as_deref()
            .map(|key| !self.identity.known_names_for(key).is_empty())
            .unwrap_or(false);
        let name_matches_key = match (stored_key_for_name.as_deref(), offered_key.as_deref()) {
            (Some(stored), Some(offered)) => stored == offered,
            _ => false,
        };
        let name_has_other_key = match (stored_key_for_name.as_deref(), offered_key.as_deref()) {
            (Some(stored), Some(offered)) => stored != offered,
            (Some(_), None) => true,
            _ => false,
        };
        let other_names_for_key = offered_key
            .as_deref()
            .map(|key| {
                self.identity
                    .known_names_for(key)
                    .iter()
                    .filter(|name| name.as_str() != peer)
                    .count()
            })
            .unwrap_or(0);

        PeerCategory::classify(
            peer,
            has_offered_key,
            key_is_known,
            name_matches_key,
            name_has_other_key,
            other_names_for_key,
        )
    }

    async fn handle_session_event(self: &Rc<Self>, peer: String, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.any_connected.set(true);
                self.begin_validation(peer).await;
            }
            SessionEvent::Closed(reason) => {
                self.registry.borrow_mut().remove_session(&peer);
                self.media.borrow_mut().remove(&peer);
                self.recompute_any_connected();
                self.emit(ClientEvent::PeerDisconnected { peer, reason });
            }
            SessionEvent::SignalIceCandidate(candidate) => {
                if let Some(pubsub) = self.pubsub.borrow().clone() {
                    let payload = SubtopicFrame::RtcIceCandidate(RtcIceCandidatePayload {
                        candidate,
                        sdp_mid: None,
                        sdp_m_line_index: None,
                        target: peer.clone(),
                    });
                    let _ = pubsub.publish(&self.local_name(), now_millis(), payload).await;
                }
            }
            SessionEvent::Chat(text) => self.emit(ClientEvent::Chat { sender: peer, text }),
            SessionEvent::Dm(text) => self.emit(ClientEvent::Dm { sender: peer, text }),
            SessionEvent::IdentityRequest(frame) => self.answer_identity_request(peer, frame).await,
            SessionEvent::Question(frame) => self.answer_question(peer, frame).await,
            SessionEvent::MediaSignal(label, bytes) => self.handle_media_signal(peer, label, bytes).await,
            SessionEvent::Validated(true) => self.emit(ClientEvent::Validated { peer }),
            SessionEvent::Validated(false) => {}
        }
    }

    fn recompute_any_connected(&self) {
        let any = self
            .registry
            .borrow()
            .session_names()
            .iter()
            .filter_map(|name| self.registry.borrow().session(name))
            .any(|s| s.state() == crate::session::SessionState::Connected);
        self.any_connected.set(any);
    }

    async fn answer_identity_request(&self, peer: String, frame: meshline_proto::RequestFrame) {
        let challenge = frame.body.get("challenge").and_then(JsonValue::as_str).unwrap_or_default();
        let signature = self.identity.sign(challenge.as_bytes()).await;
        let body = serde_json::json!({
            "public_key": self.identity.public_key_string(),
            "signature": signature,
        });
        if let Some(session) = self.registry.borrow().session(&peer) {
            let _ = session.respond(ResponseFrame::ok(frame.id, body)).await;
        }
    }

    async fn answer_question(&self, peer: String, frame: meshline_proto::RequestFrame) {
        let handler = self.question_handler.borrow().clone();
        let Some(handler) = handler else { return };
        let session = self.registry.borrow().session(&peer);
        let Some(session) = session else { return };
        tokio::task::spawn_local(async move {
            let response = handler(frame.topic.clone(), frame.body.clone()).await;
            let _ = session.respond(ResponseFrame::ok(frame.id, response)).await;
        });
    }

    async fn begin_validation(self: &Rc<Self>, peer: String) {
        let session = match self.registry.borrow().session(&peer) {
            Some(session) => session,
            None => return,
        };
        let known_key = self.identity.known_key_for(&peer);
        let topic = if known_key.is_some() { "challenge" } else { "identify" };
        let challenge = self.identity.new_challenge();

        let rx = match session.ask(topic, serde_json::json!({ "challenge": challenge })).await {
            Ok(rx) => rx,
            Err(e) => {
                slog::warn!(self.logger, "failed to send validation request"; "error" => e.to_string());
                return;
            }
        };

        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            let outcome = rx.await;
            this.resolve_validation(peer, known_key, challenge, outcome).await;
        });
    }

    async fn resolve_validation(
        self: Rc<Self>,
        peer: String,
        known_key: Option<String>,
        challenge: String,
        outcome: std::result::Result<Result<JsonValue>, oneshot::Canceled>,
    ) {
        let response = match outcome {
            Ok(Ok(response)) => response,
            _ => {
                self.fail_validation(peer, known_key).await;
                return;
            }
        };
        let offered_key = response
            .get("public_key")
            .and_then(JsonValue::as_str)
            .map(str::to_owned);
        let signature: Vec<u8> = response
            .get("signature")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let verify_against = known_key.clone().or_else(|| offered_key.clone());
        let Some(verify_against) = verify_against else {
            self.fail_validation(peer, known_key).await;
            return;
        };
        let verified = self
            .identity
            .verify(&verify_against, &signature, challenge.as_bytes())
            .await;
        if !verified {
            self.fail_validation(peer, known_key).await;
            return;
        }
        if known_key.is_none() {
            if let Err(e) = self.identity.bind(&peer, &verify_against).await {
                slog::warn!(self.logger, "failed to bind newly validated peer"; "error" => e.to_string());
            }
        }
        if let Some(session) = self.registry.borrow().session(&peer) {
            session.mark_validated(&self.session_events_tx);
            self.emit(ClientEvent::PeerConnected { peer });
        }
    }

    async fn fail_validation(&self, peer: String, known_key: Option<String>) {
        slog::warn!(self.logger, "peer failed identity validation"; "peer" => &peer);
        if let Some(session) = self.registry.borrow_mut().remove_session(&peer) {
            session
                .close(Error::from(AuthError::ValidationFailed), &self.session_events_tx)
                .await;
        }
        let _ = known_key;
        self.emit(ClientEvent::ValidationFailed { peer });
    }

    async fn handle_media_signal(self: &Rc<Self>, peer: String, label: ChannelLabel, bytes: Vec<u8>) {
        match label {
            ChannelLabel::StreamOffer => {
                let Ok(frame) = serde_json::from_slice::<MediaOfferFrame>(&bytes) else { return };
                let Some(session) = self.registry.borrow().session(&peer) else { return };
                let connection = match self.direct_transport.new_connection(self.ice_config()).await {
                    Ok(connection) => connection,
                    Err(_) => return,
                };
                let (media, end_rx) = MediaSubSession::new_incoming(
                    &session,
                    connection,
                    frame.stream_info,
                    self.logger.new(slog::o!("peer" => peer.clone())),
                );
                if let Err(e) = media.apply_remote_offer(&frame.sdp).await {
                    slog::warn!(self.logger, "failed to apply remote media offer"; "error" => e.to_string());
                    return;
                }
                self.media.borrow_mut().insert(peer.clone(), Rc::clone(&media));
                let this = Rc::clone(self);
                let peer_for_cleanup = peer.clone();
                tokio::task::spawn_local(async move {
                    let _ = end_rx.await;
                    this.media.borrow_mut().remove(&peer_for_cleanup);
                });
                self.emit(ClientEvent::IncomingCall { peer, media });
            }
            ChannelLabel::StreamAnswer => {
                let Ok(frame) = serde_json::from_slice::<MediaAnswerFrame>(&bytes) else { return };
                if let Some(media) = self.media.borrow().get(&peer).cloned() {
                    if let Err(e) = media.apply_remote_answer(&frame.sdp).await {
                        slog::warn!(self.logger, "failed to apply remote media answer"; "error" => e.to_string());
                    }
                }
            }
            ChannelLabel::StreamIce => {
                let Ok(frame) = serde_json::from_slice::<MediaCandidateFrame>(&bytes) else { return };
                if let Some(media) = self.media.borrow().get(&peer).cloned() {
                    let _ = media.handle_remote_candidate(frame.candidate).await;
                }
            }
            ChannelLabel::EndCall => {
                if let Some(media) = self.media.borrow_mut().remove(&peer) {
                    media.handle_end_call().await;
                }
            }
            _ => {}
        }
    }

    async fn handle_command(self: &Rc<Self>, command: Command) {
        match command {
            Command::SendChat(text) => {
                for name in self.registry.borrow().session_names() {
                    if let Some(session) = self.registry.borrow().session(&name) {
                        if session.validated() {
                            let _ = session.send_chat(&text).await;
                        }
                    }
                }
            }
            Command::SendDm(peer, text) => {
                if let Some(session) = self.registry.borrow().session(&peer) {
                    let _ = session.send_dm(&text).await;
                }
            }
            Command::Ask(peer, topic, body, resp_tx) => {
                let session = self.registry.borrow().session(&peer);
                match session {
                    Some(session) => match session.ask(topic, body).await {
                        Ok(rx) => {
                            tokio::task::spawn_local(async move {
                                let result = match rx.await {
                                    Ok(result) => result,
                                    Err(_) => Err(tracerr::new!(Error::SessionClosed)),
                                };
                                let _ = resp_tx.send(result);
                            });
                        }
                        Err(e) => {
                            let _ = resp_tx.send(Err(e));
                        }
                    },
                    None => {
                        let _ = resp_tx.send(Err(tracerr::new!(Error::SessionClosed)));
                    }
                }
            }
            Command::Respond(peer, response) => {
                if let Some(session) = self.registry.borrow().session(&peer) {
                    let _ = session.respond(response).await;
                }
            }
            Command::Call(peer, stream_info, tracks, resp_tx) => {
                self.start_call(peer, stream_info, tracks, resp_tx).await;
            }
            Command::HangUp(peer) => {
                if let Some(media) = self.media.borrow_mut().remove(&peer) {
                    if let Some(session) = self.registry.borrow().session(&peer) {
                        let _ = session.send_media_frame(ChannelLabel::EndCall, Vec::new()).await;
                    }
                    media.cancel().await;
                }
            }
            Command::AcceptCall(peer, tracks, resp_tx) => {
                self.handle_accept_call(peer, tracks, resp_tx).await;
            }
            Command::RejectCall(peer, resp_tx) => {
                self.handle_reject_call(peer, resp_tx).await;
            }
            Command::ChangeName(new_name) => {
                if validate_bare_name(&new_name).is_ok() {
                    let old_name = self.bare_name.borrow().clone();
                    *self.bare_name.borrow_mut() = new_name.clone();
                    tabs::persist_name_if_not_anonymous(self.storage.as_ref(), &new_name).await;
                    if let Some(pubsub) = self.pubsub.borrow().clone() {
                        let payload = SubtopicFrame::NameChange(NameChangePayload {
                            old_name,
                            new_name,
                        });
                        let _ = pubsub.publish(&self.local_name(), now_millis(), payload).await;
                    }
                }
            }
            Command::Leave => {
                if let Some(pubsub) = self.pubsub.borrow().clone() {
                    let _ = pubsub
                        .publish(&self.local_name(), now_millis(), SubtopicFrame::Unload(UnloadPayload {}))
                        .await;
                }
                for name in self.registry.borrow().session_names() {
                    if let Some(session) = self.registry.borrow_mut().remove_session(&name) {
                        session.close(Error::UserAbort, &self.session_events_tx).await;
                    }
                }
                if let Some(tab_id) = self.tab_id.take() {
                    self.tab_lease.release(tab_id, now_millis()).await;
                }
            }
        }
    }

    async fn start_call(
        self: &Rc<Self>,
        peer: String,
        stream_info: StreamInfo,
        tracks: Rc<dyn LocalMediaTracks>,
        resp_tx: oneshot::Sender<Result<CallHandles>>,
    ) {
        let session = match self.registry.borrow().session(&peer) {
            Some(session) if session.validated() => session,
            _ => {
                let _ = resp_tx.send(Err(tracerr::new!(Error::SessionClosed)));
                return;
            }
        };
        let connection = match self.direct_transport.new_connection(self.ice_config()).await {
            Ok(connection) => connection,
            Err(e) => {
                let _ = resp_tx.send(Err(e));
                return;
            }
        };
        let result = MediaSubSession::start(
            &session,
            connection,
            tracks,
            stream_info,
            self.logger.new(slog::o!("peer" => peer.clone())),
        )
        .await;
        match result {
            Ok((media, sdp, start_rx, end_rx)) => {
                let frame = MediaOfferFrame { sdp, stream_info };
                let bytes = serde_json::to_vec(&frame).unwrap_or_default();
                if let Err(e) = session.send_media_frame(ChannelLabel::StreamOffer, bytes).await {
                    let _ = resp_tx.send(Err(e));
                    return;
                }
                self.media.borrow_mut().insert(peer.clone(), Rc::clone(&media));
                let this = Rc::clone(self);
                // Shared so both the cleanup task below and the handles
                // returned to the caller can independently await the same
                // end signal.
                let end_shared = end_rx.shared();
                tokio::task::spawn_local({
                    let media_peer = peer.clone();
                    let end_shared = end_shared.clone();
                    async move {
                        let _ = end_shared.await;
                        this.media.borrow_mut().remove(&media_peer);
                    }
                });
                let _ = resp_tx.send(Ok(CallHandles { media, start: start_rx, end: end_shared }));
            }
            Err(e) => {
                let _ = resp_tx.send(Err(e));
            }
        }
    }

    /// Accepts an incoming call (spec §4.5 "On accept ... return it on
    /// `stream_answer`"): acquires the answer SDP from the `MediaSubSession`
    /// and publishes it over the parent session's `stream_answer` channel.
    async fn handle_accept_call(
        self: &Rc<Self>,
        peer: String,
        tracks: Rc<dyn LocalMediaTracks>,
        resp_tx: oneshot::Sender<Result<()>>,
    ) {
        let media = self.media.borrow().get(&peer).cloned();
        let (Some(media), Some(session)) = (media, self.registry.borrow().session(&peer)) else {
            let _ = resp_tx.send(Err(tracerr::new!(Error::SessionClosed)));
            return;
        };
        let result = async {
            let sdp = media.accept(tracks).await?;
            let frame = MediaAnswerFrame { sdp };
            let bytes = serde_json::to_vec(&frame)
                .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
            session.send_media_frame(ChannelLabel::StreamAnswer, bytes).await
        }
        .await;
        let _ = resp_tx.send(result);
    }

    /// Rejects an incoming call (spec §4.5 "on reject, send `end_call` and
    /// transition to `closed`"): closes the `MediaSubSession` locally, then
    /// notifies the caller over the parent session's `end_call` channel.
    async fn handle_reject_call(self: &Rc<Self>, peer: String, resp_tx: oneshot::Sender<Result<()>>) {
        let Some(media) = self.media.borrow_mut().remove(&peer) else {
            let _ = resp_tx.send(Err(tracerr::new!(Error::SessionClosed)));
            return;
        };
        let result = media.reject().await;
        if let Some(session) = self.registry.borrow().session(&peer) {
            let _ = session.send_media_frame(ChannelLabel::EndCall, Vec::new()).await;
        }
        let _ = resp_tx.send(result);
    }

    pub fn send_chat(&self, text: impl Into<String>) {
        let _ = self.commands_tx.unbounded_send(Command::SendChat(text.into()));
    }

    pub fn send_dm(&self, peer: impl Into<String>, text: impl Into<String>) {
        let _ = self
            .commands_tx
            .unbounded_send(Command::SendDm(peer.into(), text.into()));
    }

    pub async fn ask(&self, peer: impl Into<String>, topic: impl Into<String>, body: JsonValue) -> Result<JsonValue> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands_tx
            .unbounded_send(Command::Ask(peer.into(), topic.into(), body, tx));
        rx.await.unwrap_or_else(|_| Err(tracerr::new!(Error::SessionClosed)))
    }

    pub async fn call(
        &self,
        peer: impl Into<String>,
        stream_info: StreamInfo,
        tracks: Rc<dyn LocalMediaTracks>,
    ) -> Result<CallHandles> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands_tx
            .unbounded_send(Command::Call(peer.into(), stream_info, tracks, tx));
        rx.await.unwrap_or_else(|_| Err(tracerr::new!(Error::SessionClosed)))
    }

    pub fn hang_up(&self, peer: impl Into<String>) {
        let _ = self.commands_tx.unbounded_send(Command::HangUp(peer.into()));
    }

    /// Accepts an incoming call from `peer`, handing it `tracks` to answer
    /// with.
    pub async fn accept_call(
        &self,
        peer: impl Into<String>,
        tracks: Rc<dyn LocalMediaTracks>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands_tx
            .unbounded_send(Command::AcceptCall(peer.into(), tracks, tx));
        rx.await.unwrap_or_else(|_| Err(tracerr::new!(Error::SessionClosed)))
    }

    /// Rejects an incoming call from `peer`.
    pub async fn reject_call(&self, peer: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands_tx
            .unbounded_send(Command::RejectCall(peer.into(), tx));
        rx.await.unwrap_or_else(|_| Err(tracerr::new!(Error::SessionClosed)))
    }

    pub fn change_name(&self, new_name: impl Into<String>) {
        let _ = self.commands_tx.unbounded_send(Command::ChangeName(new_name.into()));
    }

    pub fn leave(&self) {
        let _ = self.commands_tx.unbounded_send(Command::Leave);
    }

    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.borrow().iter().cloned().collect()
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

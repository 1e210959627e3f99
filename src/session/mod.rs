//! `PeerSession` (spec §4.4): one per remote peer. Owns the direct
//! connection, the set of application channels, and the request/response
//! registry; drives the session state machine of spec §4.4's diagram.

pub(crate) mod channel;
pub(crate) mod request_table;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use futures::channel::mpsc;
use futures::StreamExt as _;
use meshline_proto::{ChannelLabel, RequestFrame, ResponseFrame, SdpType};
use serde_json::Value as JsonValue;
use tracerr::Traced;

use crate::capabilities::{DirectConnection, DirectConnectionEvent, IceConnectionState};
use crate::config::HandshakeTimeouts;
use crate::error::{Error, HandshakeError, Result};

use self::channel::{BackpressureConfig, Channel};
use self::request_table::RequestTable;

/// State machine of one [`PeerSession`] (spec §4.4 diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Offering,
    Answering,
    Negotiating,
    Connecting,
    Connected,
    Closed,
}

impl SessionState {
    /// `true` for the three states a per-state handshake timeout applies to
    /// (spec §4.4 "Timeouts").
    #[must_use]
    fn is_timed(self) -> bool {
        matches!(
            self,
            SessionState::Offering
                | SessionState::Answering
                | SessionState::Negotiating
                | SessionState::Connecting
        )
    }
}

/// Which side of the offer/answer exchange this session played; decided at
/// the first offer or answer and fixed for the session's lifetime (glare
/// resolution in [`PeerSession::resolve_glare`] may flip a loser from
/// offerer to answerer, but never the reverse mid-negotiation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Offerer,
    Answerer,
}

bitflags! {
    /// Tracks which of [`ChannelLabel::ALL`] have reported `open`, realizing
    /// the "channel open barrier" of spec §4.4: a session is `Connected`
    /// only once every bit is set.
    #[derive(Default)]
    struct OpenChannels: u16 {
        const CONNECTED_VIA_RTC = 0b0000_0000_0001;
        const CHAT              = 0b0000_0000_0010;
        const DM                = 0b0000_0000_0100;
        const QUESTION          = 0b0000_0000_1000;
        const ANSWER            = 0b0000_0001_0000;
        const PING              = 0b0000_0010_0000;
        const PONG              = 0b0000_0100_0000;
        const STREAM_ICE        = 0b0000_1000_0000;
        const STREAM_OFFER      = 0b0001_0000_0000;
        const STREAM_ANSWER     = 0b0010_0000_0000;
        const END_CALL          = 0b0100_0000_0000;
    }
}

impl OpenChannels {
    fn bit(label: ChannelLabel) -> Self {
        match label {
            ChannelLabel::ConnectedViaRtc => Self::CONNECTED_VIA_RTC,
            ChannelLabel::Chat => Self::CHAT,
            ChannelLabel::Dm => Self::DM,
            ChannelLabel::Question => Self::QUESTION,
            ChannelLabel::Answer => Self::ANSWER,
            ChannelLabel::Ping => Self::PING,
            ChannelLabel::Pong => Self::PONG,
            ChannelLabel::StreamIce => Self::STREAM_ICE,
            ChannelLabel::StreamOffer => Self::STREAM_OFFER,
            ChannelLabel::StreamAnswer => Self::STREAM_ANSWER,
            ChannelLabel::EndCall => Self::END_CALL,
        }
    }

    fn all_required() -> Self {
        Self::all()
    }
}

/// A high-level event [`PeerSession`] raises for
/// [`CoreClient`](crate::client::CoreClient) to react to; pushed onto a
/// shared channel rather than returned synchronously, since it is produced
/// from the session's own event pump task (spec §5 "every wakeup is caused
/// by ... inbound direct-channel message").
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Every required channel opened; the session reached `Connected`.
    Connected,
    /// The session reached `Closed`, carrying the reason.
    Closed(Error),
    /// A local ICE candidate must be signaled to the peer over the pub/sub
    /// bus (only the parent session's candidates travel this way; media
    /// candidates travel over `stream_ice`, see [`crate::media`]).
    SignalIceCandidate(String),
    /// A `chat` frame arrived on a validated session.
    Chat(String),
    /// A `dm` frame arrived on a validated session.
    Dm(String),
    /// An unsolicited `identify`/`challenge` request arrived on `question`;
    /// accepted regardless of validation state, since answering it is how
    /// validation itself proceeds.
    IdentityRequest(RequestFrame),
    /// A `question` frame with an application topic arrived on a validated
    /// session.
    Question(RequestFrame),
    /// A frame arrived on one of the media-signaling channels
    /// (`stream_offer`/`stream_answer`/`stream_ice`/`end_call`).
    MediaSignal(ChannelLabel, Vec<u8>),
    /// `validated` flipped (spec §8 "transitions only false->true->closed").
    Validated(bool),
}

/// One per remote peer (spec §3 `PeerSession`, §4.4).
pub struct PeerSession {
    /// Full advertised display name of the remote peer (`bare_name` plus
    /// optional `(tab_id)` suffix).
    pub remote_name: String,
    connection: Rc<dyn DirectConnection>,
    channels: RefCell<std::collections::HashMap<ChannelLabel, Rc<Channel>>>,
    open_channels: Cell<OpenChannels>,
    request_table: RequestTable,
    state: Cell<SessionState>,
    role: Cell<Option<Role>>,
    remote_description_set: Cell<bool>,
    pending_candidates: RefCell<Vec<String>>,
    validated: Cell<bool>,
    created_at: Instant,
    state_entered_at: Cell<Instant>,
    generation: Rc<Cell<u64>>,
    timeouts: HandshakeTimeouts,
    backpressure: BackpressureConfig,
    logger: slog::Logger,
}

impl PeerSession {
    /// Builds a new session in `Idle`, and spawns the task that pumps the
    /// direct connection's events into `events_tx` for as long as the
    /// session lives (spec §5: the session's own connection is its
    /// exclusive, non-shared resource).
    #[must_use]
    pub fn new(
        remote_name: impl Into<String>,
        connection: Rc<dyn DirectConnection>,
        timeouts: HandshakeTimeouts,
        backpressure: BackpressureConfig,
        events_tx: mpsc::UnboundedSender<(String, SessionEvent)>,
        logger: slog::Logger,
    ) -> Rc<Self> {
        let remote_name = remote_name.into();
        let now = Instant::now();
        let session = Rc::new(Self {
            remote_name: remote_name.clone(),
            connection,
            channels: RefCell::new(std::collections::HashMap::new()),
            open_channels: Cell::new(OpenChannels::empty()),
            request_table: RequestTable::new(),
            state: Cell::new(SessionState::Idle),
            role: Cell::new(None),
            remote_description_set: Cell::new(false),
            pending_candidates: RefCell::new(Vec::new()),
            validated: Cell::new(false),
            created_at: now,
            state_entered_at: Cell::new(now),
            generation: Rc::new(Cell::new(0)),
            timeouts,
            backpressure,
            logger,
        });
        session.spawn_event_pump(events_tx.clone());
        session.spawn_timeout_watchdog(events_tx);
        session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    #[must_use]
    pub fn validated(&self) -> bool {
        self.validated.get()
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn age_in_state(&self) -> Duration {
        self.state_entered_at.get().elapsed()
    }

    fn set_state(&self, new_state: SessionState) {
        slog::debug!(
            self.logger,
            "session state transition";
            "peer" => &self.remote_name,
            "from" => format!("{:?}", self.state.get()),
            "to" => format!("{:?}", new_state),
        );
        self.state.set(new_state);
        self.state_entered_at.set(Instant::now());
        self.generation.set(self.generation.get() + 1);
    }

    /// Marks `validated`, enforcing the false->true->closed invariant of
    /// spec §8 by never allowing a true->false transition outside of
    /// [`close`](Self::close).
    fn set_validated(&self, value: bool, events_tx: &mpsc::UnboundedSender<(String, SessionEvent)>) {
        if self.validated.get() == value {
            return;
        }
        self.validated.set(value);
        let _ = events_tx.unbounded_send((
            self.remote_name.clone(),
            SessionEvent::Validated(value),
        ));
    }

    /// Opens every fixed-label channel (spec §3 `Channel` "labels are drawn
    /// from a fixed set") and creates a local SDP offer (spec §4.4 `idle --
    /// local_announce_received --> offering`).
    pub async fn begin_offer(&self) -> Result<String> {
        self.role.set(Some(Role::Offerer));
        self.set_state(SessionState::Offering);
        self.open_all_channels().await?;
        let sdp = self.connection.create_offer().await?;
        self.connection
            .set_local_description(SdpType::Offer, &sdp)
            .await?;
        Ok(sdp)
    }

    /// Applies a remote offer and creates a local answer (spec §4.4 `idle --
    /// remote_offer_received --> answering`).
    pub async fn begin_answer(&self, remote_offer_sdp: &str) -> Result<String> {
        self.role.set(Some(Role::Answerer));
        self.set_state(SessionState::Answering);
        self.connection
            .set_remote_description(SdpType::Offer, remote_offer_sdp)
            .await?;
        self.remote_description_set.set(true);
        self.flush_pending_candidates().await;
        let sdp = self.connection.create_answer().await?;
        self.connection
            .set_local_description(SdpType::Answer, &sdp)
            .await?;
        self.set_state(SessionState::Connecting);
        Ok(sdp)
    }

    /// Glare resolution (spec §4.4 "Glare resolution"): compares the two
    /// sides' full advertised display names and keeps offering if ours
    /// sorts first, otherwise discards our offer and answers theirs.
    ///
    /// Returns `Some(answer_sdp)` if we lost and should signal the answer
    /// back; `None` if we won and the remote offer is simply discarded.
    pub async fn resolve_glare(
        &self,
        local_full_name: &str,
        remote_full_name: &str,
        remote_offer_sdp: &str,
    ) -> Result<Option<String>> {
        if local_full_name < remote_full_name {
            slog::debug!(
                self.logger,
                "glare resolved in our favor, discarding remote offer";
                "peer" => &self.remote_name,
            );
            return Ok(None);
        }
        slog::debug!(
            self.logger,
            "glare resolved against us, answering remote offer";
            "peer" => &self.remote_name,
        );
        let sdp = self.begin_answer(remote_offer_sdp).await?;
        Ok(Some(sdp))
    }

    /// Applies a remote answer (spec §4.4 `offering -- remote_answer -->
    /// negotiating`).
    pub async fn handle_remote_answer(&self, sdp: &str) -> Result<()> {
        self.connection
            .set_remote_description(SdpType::Answer, sdp)
            .await?;
        self.remote_description_set.set(true);
        self.flush_pending_candidates().await;
        self.set_state(SessionState::Negotiating);
        Ok(())
    }

    /// Applies or buffers a remote ICE candidate (spec §8 "A candidate
    /// arriving before the matching session exists is buffered").
    pub async fn handle_remote_candidate(&self, candidate: String) -> Result<()> {
        if self.remote_description_set.get() {
            self.connection.add_ice_candidate(&candidate).await?;
        } else {
            self.pending_candidates.borrow_mut().push(candidate);
        }
        Ok(())
    }

    async fn flush_pending_candidates(&self) {
        let candidates = std::mem::take(&mut *self.pending_candidates.borrow_mut());
        for candidate in candidates {
            if let Err(e) = self.connection.add_ice_candidate(&candidate).await {
                slog::warn!(self.logger, "failed to apply buffered candidate"; "error" => e.to_string());
            }
        }
    }

    async fn open_all_channels(&self) -> Result<()> {
        for label in ChannelLabel::ALL {
            self.connection.create_data_channel(&label.to_string()).await?;
            let channel = Rc::new(Channel::new(label, Rc::clone(&self.connection), self.backpressure));
            self.channels.borrow_mut().insert(label, channel);
        }
        Ok(())
    }

    fn channel_or_lazy(&self, label: ChannelLabel) -> Rc<Channel> {
        if let Some(channel) = self.channels.borrow().get(&label) {
            return Rc::clone(channel);
        }
        let channel = Rc::new(Channel::new(label, Rc::clone(&self.connection), self.backpressure));
        self.channels.borrow_mut().insert(label, Rc::clone(&channel));
        channel
    }

    /// Sends `text` on `chat` (spec §4.4 "Directed vs broadcast").
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        self.channel_or_lazy(ChannelLabel::Chat)
            .send(text.as_bytes().to_vec())
            .await
    }

    /// Sends `text` on `dm`, addressed implicitly by which session it was
    /// written to.
    pub async fn send_dm(&self, text: &str) -> Result<()> {
        self.channel_or_lazy(ChannelLabel::Dm)
            .send(text.as_bytes().to_vec())
            .await
    }

    /// Registers a fresh outbound request and sends it on `question` (spec
    /// §4.4 "Request/response").
    pub async fn ask(
        &self,
        topic: impl Into<String>,
        body: JsonValue,
    ) -> Result<futures::channel::oneshot::Receiver<Result<JsonValue, Traced<Error>>>> {
        let (frame, rx) = self.request_table.register(topic, body);
        let bytes = serde_json::to_vec(&frame)
            .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        self.channel_or_lazy(ChannelLabel::Question).send(bytes).await?;
        Ok(rx)
    }

    /// Sends `response` back on `answer`, correlated to the request that
    /// prompted it.
    pub async fn respond(&self, response: ResponseFrame) -> Result<()> {
        let bytes = serde_json::to_vec(&response)
            .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        self.channel_or_lazy(ChannelLabel::Answer).send(bytes).await
    }

    /// Sends a raw frame on an arbitrary label; used for `stream_offer`,
    /// `stream_answer`, `stream_ice`, `end_call` by
    /// [`MediaSubSession`](crate::media::MediaSubSession), which is carried
    /// "over the parent session's reliable channels" (spec §4.5).
    pub async fn send_media_frame(&self, label: ChannelLabel, bytes: Vec<u8>) -> Result<()> {
        self.channel_or_lazy(label).send(bytes).await
    }

    /// Closes the session: tears down the direct connection, fails every
    /// outstanding request, and transitions to `Closed` exactly once.
    pub async fn close(&self, reason: Error, events_tx: &mpsc::UnboundedSender<(String, SessionEvent)>) {
        if self.state.get() == SessionState::Closed {
            return;
        }
        slog::warn!(
            self.logger,
            "closing session";
            "peer" => &self.remote_name,
            "reason" => reason.to_string(),
        );
        self.set_state(SessionState::Closed);
        for channel in self.channels.borrow().values() {
            channel.mark_closed();
        }
        self.request_table.fail_all_session_closed();
        self.connection.close().await;
        if self.validated.get() {
            self.validated.set(false);
        }
        let _ = events_tx.unbounded_send((self.remote_name.clone(), SessionEvent::Closed(reason)));
    }

    /// Issues an `identify` request over `question` (spec §4.4 step 3: peer's
    /// key is unknown to us and the policy admits it).
    pub async fn send_identify(&self, challenge: &str) -> Result<()> {
        let frame = RequestFrame::new(0, "identify", serde_json::json!({ "challenge": challenge }));
        let bytes = serde_json::to_vec(&frame).map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        self.channel_or_lazy(ChannelLabel::Question).send(bytes).await
    }

    /// Issues a `challenge` request over `question` (spec §4.4 step 4: the
    /// peer's key is already known to us).
    pub async fn send_challenge(&self, challenge: &str) -> Result<()> {
        let frame = RequestFrame::new(0, "challenge", serde_json::json!({ "challenge": challenge }));
        let bytes = serde_json::to_vec(&frame).map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        self.channel_or_lazy(ChannelLabel::Question).send(bytes).await
    }

    fn spawn_event_pump(self: &Rc<Self>, events_tx: mpsc::UnboundedSender<(String, SessionEvent)>) {
        let this = Rc::clone(self);
        let mut events = this.connection.events();
        tokio::task::spawn_local(async move {
            while let Some(event) = events.next().await {
                this.handle_connection_event(event, &events_tx).await;
            }
        });
    }

    async fn handle_connection_event(
        &self,
        event: DirectConnectionEvent,
        events_tx: &mpsc::UnboundedSender<(String, SessionEvent)>,
    ) {
        match event {
            DirectConnectionEvent::IceCandidate(candidate) => {
                let _ = events_tx.unbounded_send((
                    self.remote_name.clone(),
                    SessionEvent::SignalIceCandidate(candidate),
                ));
            }
            DirectConnectionEvent::ChannelOpen(label) => {
                if let Ok(label) = label.parse::<ChannelLabel>() {
                    // The answering side never calls `create_data_channel`
                    // itself (spec §6: channels are offerer-created, the
                    // platform surfaces the rest via `on_data_channel`), so
                    // `channels` may not hold this label yet; create it lazily
                    // rather than only updating the open bitflag.
                    let channel = self.channel_or_lazy(label);
                    channel.mark_open().await;
                    self.open_channels.set(self.open_channels.get() | OpenChannels::bit(label));
                    if self.open_channels.get() == OpenChannels::all_required()
                        && matches!(
                            self.state.get(),
                            SessionState::Negotiating | SessionState::Connecting
                        )
                    {
                        self.set_state(SessionState::Connected);
                        let _ = events_tx
                            .unbounded_send((self.remote_name.clone(), SessionEvent::Connected));
                    }
                } else {
                    slog::warn!(self.logger, "unknown channel label opened"; "label" => label);
                }
            }
            DirectConnectionEvent::ChannelClose(label) => {
                if let Ok(label) = label.parse::<ChannelLabel>() {
                    if let Some(channel) = self.channels.borrow().get(&label) {
                        channel.mark_closed();
                    }
                }
            }
            DirectConnectionEvent::ChannelMessage(label, bytes) => {
                if let Ok(label) = label.parse::<ChannelLabel>() {
                    if let Some(app_event) = self.handle_channel_message(label, bytes) {
                        let _ = events_tx.unbounded_send((self.remote_name.clone(), app_event));
                    }
                } else {
                    slog::warn!(self.logger, "message on unknown channel label"; "label" => label);
                }
            }
            DirectConnectionEvent::IceConnectionStateChange(state) => {
                if matches!(state, IceConnectionState::Failed | IceConnectionState::Closed) {
                    self.close(Error::from(HandshakeError::BadSdp("transport failed".into())), events_tx)
                        .await;
                }
            }
            DirectConnectionEvent::Track => {
                // Remote media track arrival; acquisition/rendering is
                // delegated entirely to the embedder (spec §1 "the
                // acquisition of local media" is out of scope), so there is
                // nothing for the signaling engine itself to do here.
            }
        }
    }

    /// Per-frame verification (spec §4.4 "Per-frame verification"): routes
    /// an inbound application message, enforcing that only identity-exchange
    /// topics are accepted before the session validates.
    fn handle_channel_message(&self, label: ChannelLabel, bytes: Vec<u8>) -> Option<SessionEvent> {
        match label {
            ChannelLabel::Answer => {
                if let Ok(frame) = serde_json::from_slice::<ResponseFrame>(&bytes) {
                    self.request_table.resolve(frame);
                } else {
                    slog::warn!(self.logger, "malformed answer frame dropped"; "peer" => &self.remote_name);
                }
                None
            }
            ChannelLabel::Question => match serde_json::from_slice::<RequestFrame>(&bytes) {
                Ok(frame) if frame.topic == "identify" || frame.topic == "challenge" => {
                    Some(SessionEvent::IdentityRequest(frame))
                }
                Ok(frame) if self.validated.get() => Some(SessionEvent::Question(frame)),
                Ok(_) => {
                    slog::warn!(
                        self.logger,
                        "dropped question frame from unvalidated peer";
                        "peer" => &self.remote_name,
                    );
                    None
                }
                Err(_) => {
                    slog::warn!(self.logger, "malformed question frame dropped"; "peer" => &self.remote_name);
                    None
                }
            },
            ChannelLabel::Chat if self.validated.get() => {
                String::from_utf8(bytes).ok().map(SessionEvent::Chat)
            }
            ChannelLabel::Dm if self.validated.get() => {
                String::from_utf8(bytes).ok().map(SessionEvent::Dm)
            }
            ChannelLabel::StreamOffer
            | ChannelLabel::StreamAnswer
            | ChannelLabel::StreamIce
            | ChannelLabel::EndCall
                if self.validated.get() =>
            {
                Some(SessionEvent::MediaSignal(label, bytes))
            }
            ChannelLabel::Ping if self.validated.get() => {
                let this_label = ChannelLabel::Pong;
                let channel = self.channel_or_lazy(this_label);
                tokio::task::spawn_local(async move {
                    let _ = channel.send(Vec::new()).await;
                });
                None
            }
            ChannelLabel::Pong | ChannelLabel::ConnectedViaRtc => None,
            other => {
                slog::warn!(
                    self.logger,
                    "dropped frame on gated label from unvalidated peer";
                    "peer" => &self.remote_name,
                    "label" => other.to_string(),
                );
                None
            }
        }
    }

    /// Called by [`CoreClient`](crate::client::CoreClient) once identity
    /// validation succeeds, so the engine can accept application traffic.
    pub fn mark_validated(&self, events_tx: &mpsc::UnboundedSender<(String, SessionEvent)>) {
        self.set_validated(true, events_tx);
    }

    /// Watches for spec §4.4's per-state handshake timeouts. Re-evaluates
    /// on every state transition (detected via `generation`, bumped by
    /// [`set_state`](Self::set_state)) rather than polling at a fixed rate,
    /// so a fast handshake never waits out a stale sleep.
    fn spawn_timeout_watchdog(self: &Rc<Self>, events_tx: mpsc::UnboundedSender<(String, SessionEvent)>) {
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            loop {
                let state = this.state.get();
                if state == SessionState::Closed {
                    return;
                }
                let generation = this.generation.get();

                match this.timeout_for(state) {
                    None => {
                        // Idle/Connected never time out by themselves; wait
                        // for the next transition to re-evaluate.
                        while this.generation.get() == generation && this.state.get() != SessionState::Closed {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                    Some(budget) => {
                        let remaining = budget.saturating_sub(this.age_in_state());
                        tokio::time::sleep(remaining).await;
                        if this.generation.get() == generation
                            && this.state.get() == state
                            && state.is_timed()
                        {
                            this.close(
                                Error::from(HandshakeError::Timeout(Self::state_name(state))),
                                &events_tx,
                            )
                            .await;
                            return;
                        }
                    }
                }
            }
        });
    }

    fn timeout_for(&self, state: SessionState) -> Option<Duration> {
        match state {
            SessionState::Offering | SessionState::Answering => {
                Some(self.timeouts.offer_answer)
            }
            SessionState::Negotiating | SessionState::Connecting => {
                Some(self.timeouts.negotiate_connect)
            }
            _ => None,
        }
    }

    fn state_name(state: SessionState) -> &'static str {
        match state {
            SessionState::Idle => "idle",
            SessionState::Offering => "offering",
            SessionState::Answering => "answering",
            SessionState::Negotiating => "negotiating",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell as StdRefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::stream::{self, LocalBoxStream};

    use super::*;

    struct FakeConnection {
        tx: StdRefCell<Option<mpsc::UnboundedSender<DirectConnectionEvent>>>,
        channel_ops: AtomicUsize,
    }

    impl FakeConnection {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                tx: StdRefCell::new(None),
                channel_ops: AtomicUsize::new(0),
            })
        }

        fn emit(&self, event: DirectConnectionEvent) {
            if let Some(tx) = self.tx.borrow().as_ref() {
                let _ = tx.unbounded_send(event);
            }
        }
    }

    #[async_trait(?Send)]
    impl DirectConnection for FakeConnection {
        async fn create_data_channel(&self, _label: &str) -> Result<()> {
            self.channel_ops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn create_offer(&self) -> Result<String> {
            Ok("offer-sdp".into())
        }
        async fn create_answer(&self) -> Result<String> {
            Ok("answer-sdp".into())
        }
        async fn set_local_description(&self, _t: SdpType, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _t: SdpType, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: &str) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _label: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {}
        fn events(&self) -> LocalBoxStream<'static, DirectConnectionEvent> {
            let (tx, rx) = mpsc::unbounded();
            *self.tx.borrow_mut() = Some(tx);
            rx.boxed_local()
        }
    }

    fn session(conn: Rc<FakeConnection>) -> (Rc<PeerSession>, mpsc::UnboundedReceiver<(String, SessionEvent)>) {
        let (tx, rx) = mpsc::unbounded();
        let session = PeerSession::new(
            "bob",
            conn as Rc<dyn DirectConnection>,
            HandshakeTimeouts::default(),
            BackpressureConfig::default(),
            tx,
            crate::log::discard_logger(),
        );
        (session, rx)
    }

    #[tokio::test]
    async fn begin_offer_opens_every_fixed_channel_and_transitions() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, _rx) = session(Rc::clone(&conn));
                session.begin_offer().await.unwrap();
                assert_eq!(session.state(), SessionState::Offering);
                assert_eq!(conn.channel_ops.load(Ordering::SeqCst), ChannelLabel::ALL.len());
            })
            .await;
    }

    #[tokio::test]
    async fn all_channels_open_transitions_negotiating_to_connected() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, mut rx) = session(Rc::clone(&conn));
                session.begin_offer().await.unwrap();
                session.handle_remote_answer("answer-sdp").await.unwrap();
                assert_eq!(session.state(), SessionState::Negotiating);

                for label in ChannelLabel::ALL {
                    conn.emit(DirectConnectionEvent::ChannelOpen(label.to_string()));
                }
                // Let the spawned event pump drain the emitted events.
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(session.state(), SessionState::Connected);
                let (_, event) = rx.next().await.unwrap();
                assert!(matches!(event, SessionEvent::Connected) || matches!(event, SessionEvent::Connected));
            })
            .await;
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_buffered() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, _rx) = session(Rc::clone(&conn));
                session.begin_offer().await.unwrap();
                session
                    .handle_remote_candidate("candidate-a".into())
                    .await
                    .unwrap();
                assert_eq!(session.pending_candidates.borrow().len(), 1);
                session.handle_remote_answer("answer-sdp").await.unwrap();
                assert!(session.pending_candidates.borrow().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn unvalidated_chat_frame_is_dropped() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, _rx) = session(Rc::clone(&conn));
                let event = session.handle_channel_message(ChannelLabel::Chat, b"hi".to_vec());
                assert!(event.is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn identify_topic_is_accepted_while_unvalidated() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, _rx) = session(Rc::clone(&conn));
                let frame = RequestFrame::new(0, "identify", serde_json::json!({"challenge": "x"}));
                let bytes = serde_json::to_vec(&frame).unwrap();
                let event = session.handle_channel_message(ChannelLabel::Question, bytes);
                assert!(matches!(event, Some(SessionEvent::IdentityRequest(_))));
            })
            .await;
    }

    #[tokio::test]
    async fn glare_resolution_picks_lexicographically_smaller_name() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, _rx) = session(Rc::clone(&conn));
                session.begin_offer().await.unwrap();

                // "alice" < "bob": we keep offering, remote offer discarded.
                let outcome = session
                    .resolve_glare("alice", "bob", "remote-offer-sdp")
                    .await
                    .unwrap();
                assert!(outcome.is_none());
                assert_eq!(session.state(), SessionState::Offering);
            })
            .await;
    }

    #[tokio::test]
    async fn losing_glare_switches_to_answering() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let conn = FakeConnection::new();
                let (session, _rx) = session(Rc::clone(&conn));
                session.begin_offer().await.unwrap();

                // "carol" > "bob": we lose, become answerer.
                let outcome = session
                    .resolve_glare("carol", "bob", "remote-offer-sdp")
                    .await
                    .unwrap();
                assert_eq!(outcome, Some("answer-sdp".to_owned()));
                assert_eq!(session.state(), SessionState::Connecting);
            })
            .await;
    }
}

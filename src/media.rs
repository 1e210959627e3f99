//! `MediaSubSession` (spec §4.5): audio/video transport owned by one
//! [`PeerSession`](crate::session::PeerSession), at most one at a time.
//! Signaling for the media connection rides the parent session's reliable
//! channels (`stream_offer`, `stream_answer`, `stream_ice`, `end_call`),
//! never the pub/sub bus (spec §2 "Data flow").

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::StreamExt as _;
use meshline_proto::{ChannelLabel, MediaCandidateFrame, SdpType, StreamInfo};

use crate::capabilities::{DirectConnection, DirectConnectionEvent, IceConnectionState};
use crate::error::{Error, Result};
use crate::session::PeerSession;

/// State machine of one [`MediaSubSession`] (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Idle,
    Offered,
    Answered,
    Connected,
    Closed,
}

/// A handle to locally-acquired audio/video tracks, supplied by the
/// embedder when starting or accepting a call (spec §1 Deliberately OUT OF
/// SCOPE "the acquisition of local media (camera/microphone)"): the engine
/// never acquires tracks itself, only stops whatever handle it was given,
/// exactly once, on call end.
pub trait LocalMediaTracks {
    /// Stops every local track this handle owns. Must be idempotent; the
    /// engine may call it even if the call never reached `connected` (spec
    /// §8: "a reject is observable as call-end without a preceding
    /// connect").
    fn stop(&self);
}

/// Why a [`MediaSubSession`] ended, delivered once on the call-end future
/// (spec §4.5 invariant: "a call-end event fires exactly once").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEndReason {
    /// The remote peer rejected or hung up.
    RemoteEnded,
    /// The local side hung up or rejected an incoming call.
    LocalEnded,
    /// The parent [`PeerSession`] closed.
    ParentClosed,
}

/// One per [`PeerSession`], at most one live instance at a time (spec §3
/// `MediaSubSession` invariant).
pub struct MediaSubSession {
    parent: Weak<PeerSession>,
    connection: Rc<dyn DirectConnection>,
    state: Cell<MediaState>,
    stream_info: Cell<StreamInfo>,
    remote_description_set: Cell<bool>,
    pending_candidates: RefCell<Vec<String>>,
    local_tracks: RefCell<Option<Rc<dyn LocalMediaTracks>>>,
    start_tx: RefCell<Option<oneshot::Sender<Result<()>>>>,
    end_tx: RefCell<Option<oneshot::Sender<CallEndReason>>>,
    logger: slog::Logger,
}

impl MediaSubSession {
    /// Starts an outbound call (spec §4.5 `start(local_stream)`): creates
    /// the offer and hands it to the caller to signal over the parent's
    /// `stream_offer` channel.
    pub async fn start(
        parent: &Rc<PeerSession>,
        connection: Rc<dyn DirectConnection>,
        local_tracks: Rc<dyn LocalMediaTracks>,
        stream_info: StreamInfo,
        logger: slog::Logger,
    ) -> Result<(
        Rc<Self>,
        String,
        oneshot::Receiver<Result<()>>,
        oneshot::Receiver<CallEndReason>,
    )> {
        let (start_tx, start_rx) = oneshot::channel();
        let (end_tx, end_rx) = oneshot::channel();
        let this = Rc::new(Self {
            parent: Rc::downgrade(parent),
            connection,
            state: Cell::new(MediaState::Idle),
            stream_info: Cell::new(stream_info),
            remote_description_set: Cell::new(false),
            pending_candidates: RefCell::new(Vec::new()),
            local_tracks: RefCell::new(Some(local_tracks)),
            start_tx: RefCell::new(Some(start_tx)),
            end_tx: RefCell::new(Some(end_tx)),
            logger,
        });
        this.spawn_event_pump();
        let offer_sdp = this.connection.create_offer().await?;
        this.connection
            .set_local_description(SdpType::Offer, &offer_sdp)
            .await?;
        this.state.set(MediaState::Offered);
        Ok((this, offer_sdp, start_rx, end_rx))
    }

    /// Builds the callee-side instance on receipt of a `stream_offer` frame,
    /// without yet acquiring local media or answering (spec §4.5 "On
    /// `stream_offer`: notify the embedder via an `incoming_call` event").
    #[must_use]
    pub fn new_incoming(
        parent: &Rc<PeerSession>,
        connection: Rc<dyn DirectConnection>,
        stream_info: StreamInfo,
        logger: slog::Logger,
    ) -> (Rc<Self>, oneshot::Receiver<CallEndReason>) {
        let (end_tx, end_rx) = oneshot::channel();
        let this = Rc::new(Self {
            parent: Rc::downgrade(parent),
            connection,
            state: Cell::new(MediaState::Offered),
            stream_info: Cell::new(stream_info),
            remote_description_set: Cell::new(false),
            pending_candidates: RefCell::new(Vec::new()),
            local_tracks: RefCell::new(None),
            start_tx: RefCell::new(None),
            end_tx: RefCell::new(Some(end_tx)),
            logger,
        });
        this.spawn_event_pump();
        (this, end_rx)
    }

    #[must_use]
    pub fn state(&self) -> MediaState {
        self.state.get()
    }

    #[must_use]
    pub fn stream_info(&self) -> StreamInfo {
        self.stream_info.get()
    }

    /// Applies the remote offer carried by an incoming `stream_offer` (must
    /// be called before [`accept`](Self::accept)).
    pub async fn apply_remote_offer(&self, offer_sdp: &str) -> Result<()> {
        self.connection
            .set_remote_description(SdpType::Offer, offer_sdp)
            .await?;
        self.remote_description_set.set(true);
        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Accepts an incoming call (spec §4.5 "On accept, acquire local media,
    /// create an answer, return it on `stream_answer`"): `local_tracks` is
    /// the embedder-acquired media handle.
    pub async fn accept(&self, local_tracks: Rc<dyn LocalMediaTracks>) -> Result<String> {
        *self.local_tracks.borrow_mut() = Some(local_tracks);
        let answer_sdp = self.connection.create_answer().await?;
        self.connection
            .set_local_description(SdpType::Answer, &answer_sdp)
            .await?;
        self.state.set(MediaState::Answered);
        Ok(answer_sdp)
    }

    /// Rejects an incoming call: the caller is expected to send `end_call`
    /// on the parent session immediately after (spec §8 scenario 6).
    pub async fn reject(&self) -> Result<()> {
        self.close_call(CallEndReason::LocalEnded).await;
        Ok(())
    }

    /// Applies a remote answer to our own offer (spec §4.5 "On
    /// `stream_answer`: apply the remote description; transition to
    /// `answered`").
    pub async fn apply_remote_answer(&self, answer_sdp: &str) -> Result<()> {
        self.connection
            .set_remote_description(SdpType::Answer, answer_sdp)
            .await?;
        self.remote_description_set.set(true);
        self.flush_pending_candidates().await;
        self.state.set(MediaState::Answered);
        Ok(())
    }

    /// Applies or buffers a remote ICE candidate arriving over `stream_ice`
    /// (spec §4.5 "candidates that arrive before the remote description is
    /// set are buffered and flushed on apply").
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
                slog::warn!(self.logger, "failed to apply buffered media candidate"; "error" => e.to_string());
            }
        }
    }

    /// Pumps this media connection's own `events()` stream for as long as it
    /// stays open, mirroring how [`PeerSession`] drives its own direct
    /// connection (spec §4.5: the media connection negotiates and reports
    /// ICE state independently of the parent session).
    fn spawn_event_pump(self: &Rc<Self>) {
        let this = Rc::clone(self);
        let mut events = this.connection.events();
        tokio::task::spawn_local(async move {
            while let Some(event) = events.next().await {
                this.handle_connection_event(event).await;
            }
        });
    }

    /// Reacts to the media connection's own transport events: promotes the
    /// session to `Connected` once ICE reports it, tears the call down on
    /// failure, and forwards freshly gathered local candidates over the
    /// parent session's `stream_ice` channel (spec §4.5 "ICE candidates for
    /// the media direct connection are exchanged over `stream_ice`").
    pub async fn handle_connection_event(&self, event: DirectConnectionEvent) {
        match event {
            DirectConnectionEvent::IceCandidate(candidate) => {
                self.signal_ice_candidate(candidate).await;
            }
            DirectConnectionEvent::IceConnectionStateChange(
                IceConnectionState::Connected | IceConnectionState::Completed,
            ) => {
                if self.state.get() != MediaState::Closed {
                    self.state.set(MediaState::Connected);
                    if let Some(tx) = self.start_tx.borrow_mut().take() {
                        let _ = tx.send(Ok(()));
                    }
                }
            }
            DirectConnectionEvent::IceConnectionStateChange(
                IceConnectionState::Failed | IceConnectionState::Closed,
            ) => {
                self.close_call(CallEndReason::RemoteEnded).await;
            }
            _ => {}
        }
    }

    async fn signal_ice_candidate(&self, candidate: String) {
        let Some(parent) = self.parent() else { return };
        let frame = MediaCandidateFrame { candidate };
        let bytes = match serde_json::to_vec(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                slog::warn!(self.logger, "failed to encode media candidate"; "error" => e.to_string());
                return;
            }
        };
        if let Err(e) = parent.send_media_frame(ChannelLabel::StreamIce, bytes).await {
            slog::warn!(self.logger, "failed to signal media candidate"; "error" => e.to_string());
        }
    }

    /// `end_call` arrived on the parent session, or the parent itself
    /// closed (spec §4.5 "`end_call` or any parent-session closure triggers
    /// `_close_call`").
    pub async fn handle_end_call(&self) {
        self.close_call(CallEndReason::RemoteEnded).await;
    }

    /// Cancels an outgoing call before it connects (spec §5 "Cancelling an
    /// outgoing `call` before `connected` tears down the media connection
    /// and resolves its end-future").
    pub async fn cancel(&self) {
        self.close_call(CallEndReason::LocalEnded).await;
    }

    async fn close_call(&self, reason: CallEndReason) {
        if self.state.get() == MediaState::Closed {
            return;
        }
        slog::info!(self.logger, "closing media sub-session"; "reason" => format!("{:?}", reason));
        self.state.set(MediaState::Closed);
        if let Some(tracks) = self.local_tracks.borrow_mut().take() {
            tracks.stop();
        }
        self.connection.close().await;
        if let Some(tx) = self.start_tx.borrow_mut().take() {
            let _ = tx.send(Err(tracerr::new!(Error::UserAbort)));
        }
        if let Some(tx) = self.end_tx.borrow_mut().take() {
            let _ = tx.send(reason);
        }
    }

    /// The owning [`PeerSession`], if it hasn't been dropped.
    #[must_use]
    pub fn parent(&self) -> Option<Rc<PeerSession>> {
        self.parent.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::channel::mpsc;
    use futures::stream::{self, LocalBoxStream};

    use super::*;
    use crate::session::channel::BackpressureConfig;
    use crate::session::SessionEvent;

    struct FakeConnection {
        calls: AtomicUsize,
    }

    #[async_trait(?Send)]
    impl DirectConnection for FakeConnection {
        async fn create_data_channel(&self, _label: &str) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<String> {
            Ok("media-offer".into())
        }
        async fn create_answer(&self) -> Result<String> {
            Ok("media-answer".into())
        }
        async fn set_local_description(&self, _t: SdpType, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _t: SdpType, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send(&self, _label: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {}
        fn events(&self) -> LocalBoxStream<'static, DirectConnectionEvent> {
            stream::empty().boxed_local()
        }
    }

    struct RecordingTracks(Rc<Cell<usize>>);

    impl LocalMediaTracks for RecordingTracks {
        fn stop(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn parent_session() -> Rc<PeerSession> {
        struct NoopConnection;
        #[async_trait(?Send)]
        impl DirectConnection for NoopConnection {
            async fn create_data_channel(&self, _label: &str) -> Result<()> {
                Ok(())
            }
            async fn create_offer(&self) -> Result<String> {
                Ok(String::new())
            }
            async fn create_answer(&self) -> Result<String> {
                Ok(String::new())
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
                stream::empty().boxed_local()
            }
        }
        let (tx, _rx) = mpsc::unbounded::<(String, SessionEvent)>();
        PeerSession::new(
            "bob",
            Rc::new(NoopConnection) as Rc<dyn DirectConnection>,
            crate::config::HandshakeTimeouts::default(),
            BackpressureConfig::default(),
            tx,
            crate::log::discard_logger(),
        )
    }

    #[tokio::test]
    async fn start_creates_offer_and_transitions_to_offered() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let parent = parent_session();
                let stops = Rc::new(Cell::new(0));
                let tracks = Rc::new(RecordingTracks(Rc::clone(&stops)));
                let conn = Rc::new(FakeConnection { calls: AtomicUsize::new(0) });
                let (media, offer_sdp, _start_rx, _end_rx) = MediaSubSession::start(
                    &parent,
                    conn as Rc<dyn DirectConnection>,
                    tracks,
                    StreamInfo { has_audio: true, has_video: false },
                    crate::log::discard_logger(),
                )
                .await
                .unwrap();
                assert_eq!(offer_sdp, "media-offer");
                assert_eq!(media.state(), MediaState::Offered);
            })
            .await;
    }

    #[tokio::test]
    async fn reject_stops_tracks_and_resolves_end_exactly_once() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let parent = parent_session();
                let stops = Rc::new(Cell::new(0));
                let tracks = Rc::new(RecordingTracks(Rc::clone(&stops)));
                let conn = Rc::new(FakeConnection { calls: AtomicUsize::new(0) });
                let (media, _offer, start_rx, end_rx) = MediaSubSession::start(
                    &parent,
                    conn as Rc<dyn DirectConnection>,
                    tracks,
                    StreamInfo::default(),
                    crate::log::discard_logger(),
                )
                .await
                .unwrap();

                media.reject().await.unwrap();
                assert_eq!(media.state(), MediaState::Closed);
                assert_eq!(stops.get(), 1);
                assert_eq!(end_rx.await.unwrap(), CallEndReason::LocalEnded);
                assert!(start_rx.await.unwrap().is_err());

                // A second close is a no-op; the end-future already fired.
                media.reject().await.unwrap();
                assert_eq!(stops.get(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_buffered_then_flushed() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let parent = parent_session();
                let tracks = Rc::new(RecordingTracks(Rc::new(Cell::new(0))));
                let conn = Rc::new(FakeConnection { calls: AtomicUsize::new(0) });
                let (media, _offer, _start_rx, _end_rx) = MediaSubSession::start(
                    &parent,
                    Rc::clone(&conn) as Rc<dyn DirectConnection>,
                    tracks,
                    StreamInfo::default(),
                    crate::log::discard_logger(),
                )
                .await
                .unwrap();

                media.handle_remote_candidate("c1".into()).await.unwrap();
                assert_eq!(conn.calls.load(Ordering::SeqCst), 0);
                media.apply_remote_answer("media-answer").await.unwrap();
                assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
            })
            .await;
    }
}

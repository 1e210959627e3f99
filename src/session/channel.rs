//! A single named channel over a [`PeerSession`](super::PeerSession)'s
//! direct connection: queues writes until `open` fires, and applies the
//! backpressure policy of spec §5.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use meshline_proto::ChannelLabel;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::capabilities::DirectConnection;
use crate::error::{ChannelError, Error, Result};

/// Water marks and timeouts governing one [`Channel`]'s backpressure
/// policy (spec §5).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    pub open_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 1 << 20,
            low_water_mark: 1 << 18,
            open_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Pending,
    Open,
    Closed,
}

/// One reliable ordered byte stream multiplexed over a direct connection
/// (spec §3 `Channel`).
pub struct Channel {
    label: ChannelLabel,
    connection: Rc<dyn DirectConnection>,
    config: BackpressureConfig,
    state: Cell<ChannelState>,
    opened: Rc<Notify>,
    drained: Rc<Notify>,
    queue: RefCell<VecDeque<Vec<u8>>>,
    queued_bytes: Cell<usize>,
}

impl Channel {
    #[must_use]
    pub fn new(
        label: ChannelLabel,
        connection: Rc<dyn DirectConnection>,
        config: BackpressureConfig,
    ) -> Self {
        Self {
            label,
            connection,
            config,
            state: Cell::new(ChannelState::Pending),
            opened: Rc::new(Notify::new()),
            drained: Rc::new(Notify::new()),
            queue: RefCell::new(VecDeque::new()),
            queued_bytes: Cell::new(0),
        }
    }

    #[must_use]
    pub fn label(&self) -> ChannelLabel {
        self.label
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.get() == ChannelState::Open
    }

    /// Marks the channel `open` and flushes any queued writes, in order.
    pub async fn mark_open(&self) {
        if self.state.get() == ChannelState::Open {
            return;
        }
        self.state.set(ChannelState::Open);
        self.opened.notify_waiters();
        self.flush_queue().await;
    }

    /// Marks the channel `closed`; queued writes are dropped.
    pub fn mark_closed(&self) {
        self.state.set(ChannelState::Closed);
        self.opened.notify_waiters();
        self.drained.notify_waiters();
        self.queue.borrow_mut().clear();
        self.queued_bytes.set(0);
    }

    async fn flush_queue(&self) {
        while let Some(bytes) = self.queue.borrow_mut().pop_front() {
            self.queued_bytes
                .set(self.queued_bytes.get().saturating_sub(bytes.len()));
            let _ = self.connection.send(&self.label.to_string(), bytes).await;
            if self.queued_bytes.get() <= self.config.low_water_mark {
                self.drained.notify_waiters();
            }
        }
    }

    /// Sends `bytes`, queueing until the channel opens and applying the
    /// backpressure policy (spec §5): blocks while the queued byte count is
    /// above `high_water_mark`, failing with
    /// [`ChannelError::Backpressure`] after `drain_timeout`.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        if self.state.get() == ChannelState::Closed {
            return Err(tracerr::new!(Error::from(ChannelError::Closed(
                self.label.to_string()
            ))));
        }

        if self.queued_bytes.get() > self.config.high_water_mark {
            let waited = timeout(self.config.drain_timeout, self.drained.notified()).await;
            if waited.is_err() {
                return Err(tracerr::new!(Error::from(ChannelError::Backpressure(
                    self.label.to_string()
                ))));
            }
        }

        if self.state.get() != ChannelState::Open {
            self.queued_bytes
                .set(self.queued_bytes.get() + bytes.len());
            self.queue.borrow_mut().push_back(bytes);
            let waited = timeout(self.config.open_timeout, self.opened.notified()).await;
            if waited.is_err() {
                return Err(tracerr::new!(Error::from(ChannelError::Timeout(
                    self.label.to_string()
                ))));
            }
            if self.state.get() == ChannelState::Closed {
                return Err(tracerr::new!(Error::from(ChannelError::Closed(
                    self.label.to_string()
                ))));
            }
            return Ok(());
        }

        self.connection.send(&self.label.to_string(), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::stream::{self, LocalBoxStream, StreamExt as _};

    use super::*;
    use crate::capabilities::{DirectConnectionEvent, IceConnectionState};

    struct RecordingConnection {
        sent: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
        calls: AtomicUsize,
    }

    #[async_trait(?Send)]
    impl DirectConnection for RecordingConnection {
        async fn create_data_channel(&self, _label: &str) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn create_answer(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn set_local_description(
            &self,
            _sdp_type: meshline_proto::SdpType,
            _sdp: &str,
        ) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(
            &self,
            _sdp_type: meshline_proto::SdpType,
            _sdp: &str,
        ) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: &str) -> Result<()> {
            Ok(())
        }
        async fn send(&self, label: &str, bytes: Vec<u8>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.borrow_mut().push((label.to_owned(), bytes));
            Ok(())
        }
        async fn close(&self) {}
        fn events(&self) -> LocalBoxStream<'static, DirectConnectionEvent> {
            stream::empty().boxed_local()
        }
    }

    fn connection() -> (Rc<RecordingConnection>, Rc<RefCell<Vec<(String, Vec<u8>)>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let conn = Rc::new(RecordingConnection {
            sent: Rc::clone(&sent),
            calls: AtomicUsize::new(0),
        });
        (conn, sent)
    }

    #[tokio::test]
    async fn queues_writes_until_open_then_flushes_in_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (conn, sent) = connection();
                let channel = Rc::new(Channel::new(
                    ChannelLabel::Chat,
                    conn as Rc<dyn DirectConnection>,
                    BackpressureConfig::default(),
                ));

                let c = Rc::clone(&channel);
                let send_task =
                    tokio::task::spawn_local(async move { c.send(b"one".to_vec()).await.unwrap() });
                channel.mark_open().await;
                send_task.await.unwrap();

                assert_eq!(sent.borrow().len(), 1);
                assert_eq!(sent.borrow()[0].1, b"one");
            })
            .await;
    }

    #[tokio::test]
    async fn send_after_close_fails_immediately() {
        let (conn, _sent) = connection();
        let channel = Channel::new(
            ChannelLabel::Chat,
            conn as Rc<dyn DirectConnection>,
            BackpressureConfig::default(),
        );
        channel.mark_closed();
        let err = channel.send(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(
            err.into_parts().0,
            Error::Channel(ChannelError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn open_channel_sends_directly() {
        let (conn, sent) = connection();
        let channel = Channel::new(
            ChannelLabel::Chat,
            conn as Rc<dyn DirectConnection>,
            BackpressureConfig::default(),
        );
        channel.mark_open().await;
        channel.send(b"hi".to_vec()).await.unwrap();
        assert_eq!(sent.borrow()[0].1, b"hi");
    }
}

//! `RequestTable` (spec §3, §4.4): the per-[`PeerSession`](super::PeerSession)
//! request/response registry backing the `question`/`answer` RPC.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use futures::channel::oneshot;
use meshline_proto::{RequestFrame, ResponseFrame, RpcOutcome};
use tracerr::Traced;

use crate::error::{Error, Result};

/// A request awaiting its response.
type Responder = oneshot::Sender<Result<serde_json::Value, Traced<Error>>>;

/// Per-session table of outstanding requests, keyed by monotonic id (spec
/// §3 `RequestTable`).
#[derive(Default)]
pub struct RequestTable {
    next_id: Cell<u64>,
    pending: RefCell<HashMap<u64, Responder>>,
}

impl RequestTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh request id, registers a responder for it, and
    /// returns both the [`RequestFrame`] to send and a future that resolves
    /// when [`resolve`](Self::resolve) is called with a matching id.
    pub fn register(
        &self,
        topic: impl Into<String>,
        body: serde_json::Value,
    ) -> (RequestFrame, oneshot::Receiver<Result<serde_json::Value, Traced<Error>>>) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().insert(id, tx);

        (RequestFrame::new(id, topic, body), rx)
    }

    /// Resolves the responder matching `frame.id`. Unknown ids are logged
    /// and dropped by the caller (spec §4.4: "unknown ids are logged and
    /// dropped").
    #[must_use]
    pub fn resolve(&self, frame: ResponseFrame) -> bool {
        let responder = self.pending.borrow_mut().remove(&frame.id);
        match responder {
            Some(tx) => {
                let result = match frame.result {
                    RpcOutcome::Ok { body } => Ok(body),
                    RpcOutcome::Err { message } => {
                        Err(tracerr::new!(Error::Config(message)))
                    }
                };
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding responder with [`Error::SessionClosed`],
    /// e.g. on session teardown (spec §3 `RequestTable` invariant).
    pub fn fail_all_session_closed(&self) {
        for (_, tx) in self.pending.borrow_mut().drain() {
            let _ = tx.send(Err(tracerr::new!(Error::SessionClosed)));
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_ok_body_to_registrant() {
        let table = RequestTable::new();
        let (frame, rx) = table.register("add", serde_json::json!({"x": 1, "y": 2}));
        assert!(table.resolve(ResponseFrame::ok(frame.id, serde_json::json!(3))));
        assert_eq!(rx.await.unwrap().unwrap(), serde_json::json!(3));
    }

    #[tokio::test]
    async fn resolve_delivers_err_to_registrant() {
        let table = RequestTable::new();
        let (frame, rx) = table.register("add", serde_json::json!({}));
        table.resolve(ResponseFrame::err(frame.id, "bad input"));
        assert!(rx.await.unwrap().is_err());
    }

    #[test]
    fn resolve_unknown_id_is_a_no_op() {
        let table = RequestTable::new();
        assert!(!table.resolve(ResponseFrame::ok(999, serde_json::json!(null))));
    }

    #[tokio::test]
    async fn fail_all_session_closed_resolves_every_pending_responder() {
        let table = RequestTable::new();
        let (_, rx_a) = table.register("a", serde_json::json!({}));
        let (_, rx_b) = table.register("b", serde_json::json!({}));
        table.fail_all_session_closed();
        assert!(rx_a.await.unwrap().is_err());
        assert!(rx_b.await.unwrap().is_err());
        assert_eq!(table.pending_count(), 0);
    }
}

//! The `PubSubTransport` capability (spec §6): the broker connection itself
//! is out of scope for this crate (spec §1 Deliberately OUT OF SCOPE);
//! [`PubSubClient`](crate::pubsub::PubSubClient) only consumes this narrow
//! interface.

use async_trait::async_trait;
use futures::stream::LocalBoxStream;

use crate::error::Result;

/// A connected publish/subscribe broker session, supplied by the embedder.
#[async_trait(?Send)]
pub trait PubSubTransport {
    /// Establishes the broker connection.
    async fn connect(&self) -> Result<()>;

    /// Subscribes to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Publishes `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// A stream of `(topic, payload)` pairs delivered for every subscribed
    /// topic, in delivery order.
    fn messages(&self) -> LocalBoxStream<'static, (String, Vec<u8>)>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::rc::Rc;

    use futures::channel::mpsc;
    use futures::stream::LocalBoxStream;
    use futures::StreamExt as _;

    use super::PubSubTransport;
    use crate::error::Result;

    /// In-memory [`PubSubTransport`] fake: publishing on one handle feeds
    /// every handle sharing the same `Rc<RefCell<..>>` backbone, emulating a
    /// single-topic broker for tests.
    #[derive(Clone)]
    pub struct InMemoryBroker {
        inbox: Rc<RefCell<Option<mpsc::UnboundedSender<(String, Vec<u8>)>>>>,
        peers: Rc<RefCell<Vec<mpsc::UnboundedSender<(String, Vec<u8>)>>>>,
    }

    impl Default for InMemoryBroker {
        fn default() -> Self {
            Self {
                inbox: Rc::new(RefCell::new(None)),
                peers: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl InMemoryBroker {
        /// Links `other` so publishes on either side are delivered to both.
        pub fn link(&self, other: &Self) {
            if let Some(tx) = other.inbox.borrow().as_ref() {
                self.peers.borrow_mut().push(tx.clone());
            }
            if let Some(tx) = self.inbox.borrow().as_ref() {
                other.peers.borrow_mut().push(tx.clone());
            }
        }
    }

    #[async_trait::async_trait(?Send)]
    impl PubSubTransport for InMemoryBroker {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self, _topic: &str) -> Result<()> {
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            for peer in self.peers.borrow().iter() {
                let _ = peer.unbounded_send((topic.to_owned(), payload.clone()));
            }
            Ok(())
        }

        fn messages(&self) -> LocalBoxStream<'static, (String, Vec<u8>)> {
            let (tx, rx) = mpsc::unbounded();
            *self.inbox.borrow_mut() = Some(tx);
            rx.boxed_local()
        }
    }
}

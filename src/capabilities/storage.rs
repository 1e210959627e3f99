//! The `Storage` capability (spec §6): key/value persistence for the local
//! keypair, the name-to-key map and the persisted display name.

use async_trait::async_trait;

/// Persistent key/value storage, supplied by the embedder.
///
/// Implementations are free to back this with a file, a browser's
/// `localStorage`, or anything else; the core only ever round-trips
/// strings through it.
#[async_trait(?Send)]
pub trait Storage {
    /// Returns the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: String);

    /// Removes the value stored under `key`, if any.
    async fn remove(&self, key: &str);
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::Storage;

    /// In-memory [`Storage`] fake used by unit and integration tests.
    #[derive(Default)]
    pub struct InMemoryStorage(RefCell<HashMap<String, String>>);

    #[async_trait::async_trait(?Send)]
    impl Storage for InMemoryStorage {
        async fn get(&self, key: &str) -> Option<String> {
            self.0.borrow().get(key).cloned()
        }

        async fn set(&self, key: &str, value: String) {
            self.0.borrow_mut().insert(key.to_owned(), value);
        }

        async fn remove(&self, key: &str) {
            self.0.borrow_mut().remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::InMemoryStorage;
    use super::Storage;

    #[tokio::test]
    async fn round_trips_values() {
        let storage = InMemoryStorage::default();
        assert_eq!(storage.get("k").await, None);
        storage.set("k", "v".into()).await;
        assert_eq!(storage.get("k").await, Some("v".into()));
        storage.remove("k").await;
        assert_eq!(storage.get("k").await, None);
    }
}

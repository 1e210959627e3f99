//! `IdentityStore` (spec §4.2): owns the local long-lived signing keypair
//! and the bare-name-to-public-key map, issues and verifies identity
//! challenges.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use meshline_proto::CHALLENGE_LEN;
use tracerr::Traced;

use crate::capabilities::{Crypto, Storage};
use crate::error::{AuthError, Error, Result};

const KEY_PRIVATE: &str = "privateKeyString";
const KEY_PUBLIC: &str = "publicKeyString";
const KEY_KNOWN_HOSTS: &str = "knownHostsStrings";

const CHALLENGE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Owns the local keypair and the `bare_name -> public_key_string` table,
/// delegating the actual cryptographic work to an injected [`Crypto`] and
/// persistence to an injected [`Storage`].
pub struct IdentityStore {
    crypto: Rc<dyn Crypto>,
    storage: Rc<dyn Storage>,
    logger: slog::Logger,
    private_key: RefCell<Option<String>>,
    public_key: RefCell<Option<String>>,
    known_hosts: RefCell<HashMap<String, String>>,
}

impl IdentityStore {
    /// Builds a store with no key material loaded yet; call
    /// [`load_or_generate`](Self::load_or_generate) before using it.
    pub fn new(crypto: Rc<dyn Crypto>, storage: Rc<dyn Storage>, logger: slog::Logger) -> Self {
        Self {
            crypto,
            storage,
            logger,
            private_key: RefCell::new(None),
            public_key: RefCell::new(None),
            known_hosts: RefCell::new(HashMap::new()),
        }
    }

    /// Loads persisted key material, generating a fresh keypair if none is
    /// stored yet (spec §4.2).
    pub async fn load_or_generate(&self) -> Result<()> {
        let private = self.storage.get(KEY_PRIVATE).await;
        let public = self.storage.get(KEY_PUBLIC).await;

        match (private, public) {
            (Some(private), Some(public)) => {
                slog::debug!(self.logger, "loaded existing identity keypair");
                *self.private_key.borrow_mut() = Some(private);
                *self.public_key.borrow_mut() = Some(public);
            }
            _ => {
                slog::info!(self.logger, "no persisted keypair found, generating one");
                let (private, public) = self.crypto.generate_signing_keypair().await;
                self.storage.set(KEY_PRIVATE, private.clone()).await;
                self.storage.set(KEY_PUBLIC, public.clone()).await;
                *self.private_key.borrow_mut() = Some(private);
                *self.public_key.borrow_mut() = Some(public);
            }
        }

        if let Some(raw) = self.storage.get(KEY_KNOWN_HOSTS).await {
            let parsed: HashMap<String, String> = serde_json::from_str(&raw)
                .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
            *self.known_hosts.borrow_mut() = parsed;
        }

        Ok(())
    }

    /// The local public key, in the same JWK-like string form used on the
    /// wire.
    ///
    /// # Panics
    ///
    /// Panics if called before [`load_or_generate`](Self::load_or_generate).
    #[must_use]
    pub fn public_key_string(&self) -> String {
        self.public_key
            .borrow()
            .clone()
            .expect("load_or_generate must be called before public_key_string")
    }

    /// Signs `challenge` with the local private key.
    pub async fn sign(&self, challenge: &[u8]) -> Vec<u8> {
        let private = self
            .private_key
            .borrow()
            .clone()
            .expect("load_or_generate must be called before sign");
        self.crypto.sign(&private, challenge).await
    }

    /// Verifies `signature` over `challenge` against `public_key_string`.
    pub async fn verify(
        &self,
        public_key_string: &str,
        signature: &[u8],
        challenge: &[u8],
    ) -> bool {
        self.crypto
            .verify(public_key_string, challenge, signature)
            .await
    }

    /// Generates a fresh 32-character challenge (spec §4.2).
    #[must_use]
    pub fn new_challenge(&self) -> String {
        let raw = self.crypto.random_bytes(CHALLENGE_LEN);
        raw.into_iter()
            .map(|b| {
                let idx = (b as usize) % CHALLENGE_ALPHABET.len();
                CHALLENGE_ALPHABET[idx] as char
            })
            .collect()
    }

    /// The bare names currently bound to `public_key_string`.
    #[must_use]
    pub fn known_names_for(&self, public_key_string: &str) -> HashSet<String> {
        self.known_hosts
            .borrow()
            .iter()
            .filter(|(_, key)| key.as_str() == public_key_string)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the public key bound to `bare_name`, if any.
    #[must_use]
    pub fn known_key_for(&self, bare_name: &str) -> Option<String> {
        self.known_hosts.borrow().get(bare_name).cloned()
    }

    /// Binds `public_key_string` to `bare_name`.
    ///
    /// Fails with [`AuthError::AliasCollision`] if the key is already bound
    /// to a different bare-name; callers must
    /// [`rebind`](Self::rebind) to explicitly reassign it (spec §9 Open
    /// Questions: rebind is an administrative act, never silent).
    pub async fn bind(&self, bare_name: &str, public_key_string: &str) -> Result<()> {
        let collision = {
            let hosts = self.known_hosts.borrow();
            hosts
                .iter()
                .find(|(name, key)| {
                    key.as_str() == public_key_string && name.as_str() != bare_name
                })
                .map(|(name, _)| name.clone())
        };
        if let Some(existing_name) = collision {
            return Err(tracerr::new!(Error::from(AuthError::AliasCollision(
                existing_name
            ))));
        }

        let snapshot = {
            let mut hosts = self.known_hosts.borrow_mut();
            hosts.insert(bare_name.to_owned(), public_key_string.to_owned());
            hosts.clone()
        };
        self.persist_known_hosts(&snapshot).await
    }

    /// Administratively reassigns `public_key_string` to `bare_name`,
    /// unbinding it from whatever name currently holds it first.
    pub async fn rebind(&self, bare_name: &str, public_key_string: &str) -> Result<()> {
        slog::warn!(
            self.logger,
            "rebinding key to a new name";
            "name" => bare_name,
        );
        let snapshot = {
            let mut hosts = self.known_hosts.borrow_mut();
            hosts.retain(|_, key| key != public_key_string);
            hosts.insert(bare_name.to_owned(), public_key_string.to_owned());
            hosts.clone()
        };
        self.persist_known_hosts(&snapshot).await
    }

    async fn persist_known_hosts(&self, snapshot: &HashMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_string(snapshot)
            .map_err(|e| tracerr::new!(Error::Config(e.to_string())))?;
        self.storage.set(KEY_KNOWN_HOSTS, serialized).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::capabilities::storage::fake::InMemoryStorage;
    use crate::capabilities::RsaCrypto;

    use super::*;

    fn store() -> IdentityStore {
        IdentityStore::new(
            Rc::new(RsaCrypto::default()),
            Rc::new(InMemoryStorage::default()),
            crate::log::discard_logger(),
        )
    }

    #[tokio::test]
    async fn generates_and_persists_a_keypair() {
        let store = store();
        store.load_or_generate().await.unwrap();
        assert!(!store.public_key_string().is_empty());
    }

    #[tokio::test]
    async fn challenge_round_trips_through_sign_and_verify() {
        let store = store();
        store.load_or_generate().await.unwrap();
        let challenge = store.new_challenge();
        assert_eq!(challenge.len(), CHALLENGE_LEN);
        let signature = store.sign(challenge.as_bytes()).await;
        assert!(
            store
                .verify(&store.public_key_string(), &signature, challenge.as_bytes())
                .await
        );
    }

    #[tokio::test]
    async fn verify_rejects_mismatched_challenge() {
        let store = store();
        store.load_or_generate().await.unwrap();
        let challenge = store.new_challenge();
        let other_challenge = store.new_challenge();
        let signature = store.sign(challenge.as_bytes()).await;
        assert!(
            !store
                .verify(&store.public_key_string(), &signature, other_challenge.as_bytes())
                .await
        );
    }

    #[tokio::test]
    async fn bind_rejects_key_already_bound_elsewhere() {
        let store = store();
        store.load_or_generate().await.unwrap();
        store.bind("alice", "pk-1").await.unwrap();
        let err = store.bind("mallory", "pk-1").await.unwrap_err();
        assert!(matches!(
            err.into_parts().0,
            Error::Auth(AuthError::AliasCollision(name)) if name == "alice"
        ));
    }

    #[tokio::test]
    async fn rebind_moves_a_key_to_a_new_name() {
        let store = store();
        store.load_or_generate().await.unwrap();
        store.bind("alice", "pk-1").await.unwrap();
        store.rebind("alice2", "pk-1").await.unwrap();
        assert_eq!(
            store.known_names_for("pk-1"),
            HashSet::from(["alice2".to_owned()])
        );
        assert_eq!(store.known_key_for("alice"), None);
    }
}

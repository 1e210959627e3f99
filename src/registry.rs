//! `PeerRegistry` (spec §2, §3): the process-wide table of known peers and
//! of active sessions.

use std::rc::Rc;
use std::time::Duration;

use meshline_reactive::collections::ObservableHashMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::session::PeerSession;

/// A peer discovered via an `announce`/`connect` envelope (spec §3
/// `KnownPeer`).
#[derive(Debug, Clone, PartialEq)]
pub struct KnownPeer {
    pub name: String,
    pub user_info: HashMap<String, JsonValue>,
    /// The public key this peer most recently advertised in its `connect`
    /// announcement (spec §3 Identity `{ bare_name, public_key }`), if any.
    pub public_key: Option<String>,
    pub first_seen: Duration,
    pub last_seen: Duration,
}

impl KnownPeer {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        user_info: HashMap<String, JsonValue>,
        public_key: Option<String>,
        now: Duration,
    ) -> Self {
        let name = name.into();
        Self {
            name,
            user_info,
            public_key,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Merges a fresh announcement into this record, refreshing
    /// `last_seen` and replacing `user_info`/`public_key`.
    pub fn observe(
        &mut self,
        user_info: HashMap<String, JsonValue>,
        public_key: Option<String>,
        now: Duration,
    ) {
        self.user_info = user_info;
        self.public_key = public_key;
        self.last_seen = now;
    }
}

/// Process-wide table of known peers (by bare name) and of the
/// [`PeerSession`]s currently established with them.
///
/// Exposes both maps reactively via `meshline-reactive`'s
/// [`ObservableHashMap`] so an embedder can subscribe to peer-list changes
/// without polling, the way `medea-jason`'s `Room` exposes its connection
/// map.
#[derive(Default)]
pub struct PeerRegistry {
    known: ObservableHashMap<String, KnownPeer>,
    sessions: ObservableHashMap<String, Rc<PeerSession>>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or refreshes a [`KnownPeer`] on receipt of an announcement.
    pub fn observe_announce(
        &mut self,
        name: &str,
        user_info: HashMap<String, JsonValue>,
        public_key: Option<String>,
        now: Duration,
    ) {
        if let Some(existing) = self.known.get_mut(name) {
            existing.observe(user_info, public_key, now);
        } else {
            self.known.insert(
                name.to_owned(),
                KnownPeer::new(name, user_info, public_key, now),
            );
        }
    }

    /// Removes `name` from the known-peer table on an explicit `unload`.
    pub fn forget(&mut self, name: &str) {
        self.known.remove(name);
    }

    /// Renames a known peer, preserving its `user_info`/timestamps.
    pub fn rename(&mut self, old_name: &str, new_name: &str) {
        if let Some(mut peer) = self.known.remove(old_name) {
            peer.name = new_name.to_owned();
            self.known.insert(new_name.to_owned(), peer);
        }
    }

    #[must_use]
    pub fn known_peer(&self, name: &str) -> Option<&KnownPeer> {
        self.known.get(name)
    }

    #[must_use]
    pub fn session(&self, name: &str) -> Option<Rc<PeerSession>> {
        self.sessions.get(name).cloned()
    }

    pub fn insert_session(&mut self, name: String, session: Rc<PeerSession>) {
        self.sessions.insert(name, session);
    }

    /// Removes and returns the session for `name`, if any (spec §3
    /// `PeerSession` invariant: at most one per remote bare-name).
    pub fn remove_session(&mut self, name: &str) -> Option<Rc<PeerSession>> {
        self.sessions.remove(name)
    }

    #[must_use]
    pub fn session_names(&self) -> Vec<String> {
        self.sessions.iter().map(|(name, _)| name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_announce_creates_then_refreshes() {
        let mut registry = PeerRegistry::new();
        registry.observe_announce("bob", HashMap::new(), None, Duration::from_secs(1));
        assert_eq!(registry.known_peer("bob").unwrap().first_seen, Duration::from_secs(1));

        registry.observe_announce("bob", HashMap::new(), None, Duration::from_secs(5));
        let peer = registry.known_peer("bob").unwrap();
        assert_eq!(peer.first_seen, Duration::from_secs(1));
        assert_eq!(peer.last_seen, Duration::from_secs(5));
    }

    #[test]
    fn forget_removes_known_peer() {
        let mut registry = PeerRegistry::new();
        registry.observe_announce("bob", HashMap::new(), None, Duration::from_secs(0));
        registry.forget("bob");
        assert!(registry.known_peer("bob").is_none());
    }

    #[test]
    fn rename_preserves_metadata_under_new_name() {
        let mut registry = PeerRegistry::new();
        registry.observe_announce("bob", HashMap::new(), None, Duration::from_secs(2));
        registry.rename("bob", "bobby");
        assert!(registry.known_peer("bob").is_none());
        assert_eq!(registry.known_peer("bobby").unwrap().first_seen, Duration::from_secs(2));
    }
}

//! Tab-id leasing and persisted display name (spec §6 "Persisted state
//! layout"): the `tabs` array plus per-tab `tabpoll_<id>` liveness markers,
//! and the `name` key, all stored through the injected [`Storage`]
//! capability the same way [`IdentityStore`](crate::identity::IdentityStore)
//! persists key material.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::Storage;
use crate::trust::ANONYMOUS_PREFIX;

const KEY_TABS: &str = "tabs";
const KEY_NAME: &str = "name";
const TAB_POLL_PREFIX: &str = "tabpoll_";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TabList(Vec<u32>);

fn tab_poll_key(id: u32) -> String {
    format!("{TAB_POLL_PREFIX}{id}")
}

/// Leases a fresh tab identifier and persists the display name, per spec §6.
pub struct TabLease {
    storage: std::rc::Rc<dyn Storage>,
    stale_timeout: Duration,
    recycle_floor: u32,
}

impl TabLease {
    #[must_use]
    pub fn new(storage: std::rc::Rc<dyn Storage>, stale_timeout: Duration, recycle_floor: u32) -> Self {
        Self {
            storage,
            stale_timeout,
            recycle_floor,
        }
    }

    /// Prunes stale tab entries (those whose `tabpoll_<id>` is older than
    /// `stale_timeout`, or missing entirely), leases the next identifier
    /// using `max(existing) + 1`, recycling to `0` if `min(existing) >=
    /// recycle_floor` (spec §6), persists the updated `tabs` list and a
    /// fresh `tabpoll_<id>` marker for the leased id, and returns it.
    pub async fn lease(&self, now_millis: u64) -> u32 {
        let mut tabs = self.load_live_tabs(now_millis).await;

        let leased = match (tabs.iter().min(), tabs.iter().max()) {
            (Some(&min), Some(_)) if min >= self.recycle_floor => 0,
            (_, Some(&max)) => max + 1,
            (None, None) => 0,
        };

        tabs.push(leased);
        self.persist_tabs(&tabs).await;
        self.storage
            .set(&tab_poll_key(leased), now_millis.to_string())
            .await;
        leased
    }

    /// Refreshes this tab's liveness marker, keeping it from being pruned
    /// as stale by another tab's [`lease`](Self::lease) call.
    pub async fn poll(&self, tab_id: u32, now_millis: u64) {
        self.storage
            .set(&tab_poll_key(tab_id), now_millis.to_string())
            .await;
    }

    /// Releases `tab_id`, removing it from the persisted `tabs` list and
    /// dropping its liveness marker.
    pub async fn release(&self, tab_id: u32, now_millis: u64) {
        let mut tabs = self.load_live_tabs(now_millis).await;
        tabs.retain(|&id| id != tab_id);
        self.persist_tabs(&tabs).await;
        self.storage.remove(&tab_poll_key(tab_id)).await;
    }

    async fn load_live_tabs(&self, now_millis: u64) -> Vec<u32> {
        let raw = self.storage.get(KEY_TABS).await;
        let TabList(ids) = raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let mut live = Vec::with_capacity(ids.len());
        for id in ids {
            let last_seen = self
                .storage
                .get(&tab_poll_key(id))
                .await
                .and_then(|s| s.parse::<u64>().ok());
            let stale = match last_seen {
                Some(last_seen) => {
                    now_millis.saturating_sub(last_seen) > self.stale_timeout.as_millis() as u64
                }
                None => true,
            };
            if stale {
                self.storage.remove(&tab_poll_key(id)).await;
            } else {
                live.push(id);
            }
        }
        live
    }

    async fn persist_tabs(&self, tabs: &[u32]) {
        let json = serde_json::to_string(&TabList(tabs.to_vec())).unwrap_or_default();
        self.storage.set(KEY_TABS, json).await;
    }
}

/// Loads the persisted display name, if any (spec §6 `name` key).
pub async fn load_persisted_name(storage: &dyn Storage) -> Option<String> {
    storage.get(KEY_NAME).await
}

/// Persists `bare_name` under the `name` key, unless it starts with the
/// reserved [`ANONYMOUS_PREFIX`] (spec §6: "never persisted" for anonymous
/// names; spec §9 Design Notes).
pub async fn persist_name_if_not_anonymous(storage: &dyn Storage, bare_name: &str) {
    if bare_name.starts_with(ANONYMOUS_PREFIX) {
        return;
    }
    storage.set(KEY_NAME, bare_name.to_owned()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::storage::fake::InMemoryStorage;
    use std::rc::Rc;

    fn lease(storage: Rc<dyn Storage>) -> TabLease {
        TabLease::new(storage, Duration::from_secs(30), 10)
    }

    #[tokio::test]
    async fn first_lease_on_empty_storage_is_zero() {
        let storage: Rc<dyn Storage> = Rc::new(InMemoryStorage::default());
        let lease = lease(Rc::clone(&storage));
        assert_eq!(lease.lease(1_000).await, 0);
    }

    #[tokio::test]
    async fn successive_leases_increment_from_max() {
        let storage: Rc<dyn Storage> = Rc::new(InMemoryStorage::default());
        let lease = lease(Rc::clone(&storage));
        assert_eq!(lease.lease(1_000).await, 0);
        assert_eq!(lease.lease(1_000).await, 1);
        assert_eq!(lease.lease(1_000).await, 2);
    }

    #[tokio::test]
    async fn stale_tabs_are_pruned_and_do_not_block_recycling() {
        let storage: Rc<dyn Storage> = Rc::new(InMemoryStorage::default());
        let lease = lease(Rc::clone(&storage));
        assert_eq!(lease.lease(0).await, 0);
        // far beyond the 30s stale timeout
        assert_eq!(lease.lease(60_000).await, 0);
    }

    #[tokio::test]
    async fn recycles_to_zero_once_min_existing_reaches_floor() {
        let storage: Rc<dyn Storage> = Rc::new(InMemoryStorage::default());
        let lease = lease(Rc::clone(&storage));
        // Seed ten live tabs (10..=19) directly via persist, bypassing the
        // normal lease sequence to reach the recycle-floor condition.
        let ids: Vec<u32> = (10..20).collect();
        lease.persist_tabs(&ids).await;
        for &id in &ids {
            storage.set(&tab_poll_key(id), "1000".to_string()).await;
        }
        assert_eq!(lease.lease(1_000).await, 0);
    }

    #[tokio::test]
    async fn release_drops_tab_from_live_set() {
        let storage: Rc<dyn Storage> = Rc::new(InMemoryStorage::default());
        let lease = lease(Rc::clone(&storage));
        let id = lease.lease(1_000).await;
        lease.release(id, 1_000).await;
        assert_eq!(lease.lease(1_000).await, 0);
    }

    #[tokio::test]
    async fn anonymous_name_is_never_persisted() {
        let storage = InMemoryStorage::default();
        persist_name_if_not_anonymous(&storage, "anon42").await;
        assert_eq!(load_persisted_name(&storage).await, None);
    }

    #[tokio::test]
    async fn ordinary_name_is_persisted() {
        let storage = InMemoryStorage::default();
        persist_name_if_not_anonymous(&storage, "alice").await;
        assert_eq!(load_persisted_name(&storage).await, Some("alice".into()));
    }
}

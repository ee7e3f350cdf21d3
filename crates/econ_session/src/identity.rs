//! Nickname and address history across sessions.
//!
//! Every join is recorded as a sighting linking a nickname to an address.
//! Moderators use the history to find the addresses a nickname played from
//! (`ips`) and the other nicknames used from those addresses (`whois`).

use crate::state::Player;
use crate::utils::deadline_after;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Errors returned by identity lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// No store is configured
    #[error("nickname tracking is disabled.")]
    Disabled,

    /// The backing store failed
    #[error("identity store error: {0}")]
    Store(String),
}

/// Storage capability for nickname sightings.
pub trait IdentityStore: Send + Sync {
    /// Links the player's name and address.
    fn record_sighting(&self, player: &Player) -> Result<(), IdentityError>;

    /// Addresses `name` was seen with, sorted.
    fn addresses_for(&self, name: &str) -> Result<Vec<String>, IdentityError>;

    /// Every name seen with any address of `name`, sorted.
    fn names_observed_with(&self, name: &str) -> Result<Vec<String>, IdentityError>;
}

/// In-process [`IdentityStore`] whose links expire after a fixed time.
///
/// Re-sighting a link refreshes its expiry. Expired links are swept while
/// recording, at most once per expiry period, so an entry outlives its
/// expiry by at most one period.
#[derive(Debug)]
pub struct MemoryIdentityStore {
    expiry: Duration,
    names_by_address: DashMap<String, HashMap<String, Instant>>,
    addresses_by_name: DashMap<String, HashMap<String, Instant>>,
    next_purge: Mutex<Instant>,
}

impl MemoryIdentityStore {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            names_by_address: DashMap::new(),
            addresses_by_name: DashMap::new(),
            next_purge: Mutex::new(deadline_after(expiry)),
        }
    }

    /// Number of addresses with at least one stored link.
    pub fn address_count(&self) -> usize {
        self.names_by_address.len()
    }

    fn live(map: &DashMap<String, HashMap<String, Instant>>, key: &str) -> BTreeSet<String> {
        let now = Instant::now();
        map.get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(value, _)| value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn purge_if_due(&self) {
        {
            let mut next_purge = self.next_purge.lock().unwrap_or_else(PoisonError::into_inner);
            if Instant::now() < *next_purge {
                return;
            }
            *next_purge = deadline_after(self.expiry);
        }
        self.purge_expired();
    }

    /// Drops expired links.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        for map in [&self.names_by_address, &self.addresses_by_name] {
            map.retain(|_, entries| {
                entries.retain(|_, expires_at| *expires_at > now);
                !entries.is_empty()
            });
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn record_sighting(&self, player: &Player) -> Result<(), IdentityError> {
        if player.name.is_empty() || player.address.is_empty() {
            return Ok(());
        }
        self.purge_if_due();

        let expires_at = deadline_after(self.expiry);
        self.names_by_address
            .entry(player.address.clone())
            .or_default()
            .insert(player.name.clone(), expires_at);
        self.addresses_by_name
            .entry(player.name.clone())
            .or_default()
            .insert(player.address.clone(), expires_at);
        Ok(())
    }

    fn addresses_for(&self, name: &str) -> Result<Vec<String>, IdentityError> {
        Ok(Self::live(&self.addresses_by_name, name).into_iter().collect())
    }

    fn names_observed_with(&self, name: &str) -> Result<Vec<String>, IdentityError> {
        let names: BTreeSet<String> = Self::live(&self.addresses_by_name, name)
            .iter()
            .flat_map(|address| Self::live(&self.names_by_address, address))
            .collect();
        Ok(names.into_iter().collect())
    }
}

/// Optional identity store. Without a store every lookup reports
/// [`IdentityError::Disabled`] and sightings are ignored.
#[derive(Clone, Default)]
pub struct IdentityTracker {
    store: Option<Arc<dyn IdentityStore>>,
}

impl std::fmt::Debug for IdentityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTracker")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl IdentityTracker {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Records a sighting; failures are logged, never propagated.
    pub fn record(&self, player: &Player) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_sighting(player) {
                warn!("⚠️ Failed to record sighting of '{}': {}", player.name, e);
            }
        }
    }

    pub fn addresses_for(&self, name: &str) -> Result<Vec<String>, IdentityError> {
        self.store
            .as_ref()
            .ok_or(IdentityError::Disabled)?
            .addresses_for(name)
    }

    pub fn names_observed_with(&self, name: &str) -> Result<Vec<String>, IdentityError> {
        self.store
            .as_ref()
            .ok_or(IdentityError::Disabled)?
            .names_observed_with(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(name: &str, address: &str) -> Player {
        Player {
            id: 0,
            name: name.to_string(),
            address: address.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_tracker_reports_disabled() {
        let tracker = IdentityTracker::disabled();
        tracker.record(&sighting("Foo", "1.1.1.1"));
        let err = tracker.addresses_for("Foo").unwrap_err();
        assert_eq!(err.to_string(), "nickname tracking is disabled.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_whois_links_names_through_addresses() {
        let store = Arc::new(MemoryIdentityStore::new(Duration::from_secs(3600)));
        let tracker = IdentityTracker::new(store.clone());

        tracker.record(&sighting("Foo", "1.1.1.1"));
        tracker.record(&sighting("Foo", "2.2.2.2"));
        tracker.record(&sighting("Alt", "2.2.2.2"));
        tracker.record(&sighting("Other", "3.3.3.3"));

        assert_eq!(tracker.addresses_for("Foo").unwrap(), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(tracker.names_observed_with("Foo").unwrap(), vec!["Alt", "Foo"]);
        assert!(tracker.addresses_for("Nobody").unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sightings_expire() {
        let store = MemoryIdentityStore::new(Duration::from_secs(60));
        store.record_sighting(&sighting("Foo", "1.1.1.1")).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.addresses_for("Foo").unwrap().is_empty());

        store.purge_expired();
        assert!(store.addresses_by_name.is_empty());
        assert!(store.names_by_address.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_sweeps_expired_links() {
        let store = MemoryIdentityStore::new(Duration::from_secs(60));
        for i in 0..100 {
            store.record_sighting(&sighting("Foo", &format!("10.0.0.{i}"))).unwrap();
        }
        assert_eq!(store.address_count(), 100);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.record_sighting(&sighting("Bar", "1.1.1.1")).unwrap();

        assert_eq!(store.address_count(), 1);
        assert!(!store.addresses_by_name.contains_key("Foo"));
        assert_eq!(store.addresses_for("Bar").unwrap(), vec!["1.1.1.1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_within_period_keeps_live_links() {
        let store = MemoryIdentityStore::new(Duration::from_secs(60));
        store.record_sighting(&sighting("Foo", "1.1.1.1")).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        store.record_sighting(&sighting("Bar", "2.2.2.2")).unwrap();
        assert_eq!(store.address_count(), 2);
        assert_eq!(store.addresses_for("Foo").unwrap(), vec!["1.1.1.1"]);
    }
}

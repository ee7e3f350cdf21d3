//! Active bans of a single game server.
//!
//! The game server is authoritative: it announces bans, unbans and expiries
//! through log lines and the registry only mirrors them. Expiry here is
//! informational and never removes an entry on its own.

use super::player::Player;
use crate::text::format_duration;
use crate::utils::deadline_after;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A banned player with expiry and reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub player: Player,
    pub expires_at: Instant,
    pub reason: String,
}

impl Ban {
    /// True once the expiry time has passed.
    pub fn expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Ban list keyed by player address and kept sorted by expiry.
#[derive(Debug, Default)]
pub struct BanRegistry {
    bans: Mutex<Vec<Ban>>,
}

impl BanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Ban>> {
        self.bans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a ban or replaces the existing one for the same address.
    pub fn ban(&self, player: Player, duration: Duration, reason: &str) -> Ban {
        let ban = Ban {
            expires_at: deadline_after(duration),
            player,
            reason: reason.to_string(),
        };

        let mut bans = self.lock();
        match bans.iter_mut().find(|b| b.player.address == ban.player.address) {
            Some(existing) => *existing = ban.clone(),
            None => bans.push(ban.clone()),
        }
        bans.sort_by_key(|b| b.expires_at);
        ban
    }

    /// Removes the ban for `address`.
    pub fn unban_by_address(&self, address: &str) -> Option<Ban> {
        let mut bans = self.lock();
        let position = bans.iter().position(|b| b.player.address == address)?;
        Some(bans.remove(position))
    }

    /// Removes the ban at `index` of the expiry-sorted list.
    pub fn unban_by_index(&self, index: usize) -> Option<Ban> {
        let mut bans = self.lock();
        (index < bans.len()).then(|| bans.remove(index))
    }

    pub fn unban_all(&self) {
        self.lock().clear();
    }

    /// Looks up a ban by player name and reason.
    ///
    /// Name and reason are not unique; the first match in expiry order wins.
    pub fn find_by_name_and_reason(&self, name: &str, reason: &str) -> Option<Ban> {
        self.lock()
            .iter()
            .find(|b| b.player.name == name && b.reason == reason)
            .cloned()
    }

    /// Returns the ban at `index`.
    pub fn get(&self, index: usize) -> Option<Ban> {
        self.lock().get(index).cloned()
    }

    /// Snapshot of all bans, soonest expiry first.
    pub fn bans(&self) -> Vec<Ban> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Attaches a full player snapshot to the ban with the same address.
    ///
    /// Used when a ban was issued by address before the server announced it,
    /// so the entry would otherwise only carry the unknown sentinel.
    pub fn set_player_afterwards(&self, player: &Player) -> bool {
        let mut bans = self.lock();
        match bans.iter_mut().find(|b| b.player.address == player.address) {
            Some(ban) => {
                ban.player = player.clone();
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for BanRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, ban) in self.bans().iter().enumerate() {
            writeln!(
                f,
                "idx={:<2} {:>9} '{}' ({})",
                idx,
                format_duration(ban.remaining()),
                ban.player.name,
                ban.reason
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, address: &str) -> Player {
        Player {
            id: 1,
            name: name.to_string(),
            address: address.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ban_then_unban_round_trip() {
        let registry = BanRegistry::new();
        let foo = player("Foo", "1.2.3.4");
        registry.ban(foo.clone(), Duration::from_secs(600), "spam");

        let ban = registry.unban_by_address("1.2.3.4").unwrap();
        assert_eq!(ban.player, foo);
        assert_eq!(ban.reason, "spam");
        assert!(registry.is_empty());
        assert!(registry.unban_by_address("1.2.3.4").is_none());
    }

    #[test]
    fn test_ban_upserts_by_address() {
        let registry = BanRegistry::new();
        registry.ban(player("Foo", "1.2.3.4"), Duration::from_secs(600), "spam");
        registry.ban(player("Renamed", "1.2.3.4"), Duration::from_secs(60), "again");

        assert_eq!(registry.len(), 1);
        let ban = registry.get(0).unwrap();
        assert_eq!(ban.player.name, "Renamed");
        assert_eq!(ban.reason, "again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sorted_by_expiry_and_indexed() {
        let registry = BanRegistry::new();
        registry.ban(player("Late", "2.2.2.2"), Duration::from_secs(3600), "b");
        registry.ban(player("Soon", "1.1.1.1"), Duration::from_secs(60), "a");

        let names: Vec<_> = registry.bans().into_iter().map(|b| b.player.name).collect();
        assert_eq!(names, vec!["Soon", "Late"]);

        assert!(registry.unban_by_index(5).is_none());
        assert_eq!(registry.unban_by_index(1).unwrap().player.name, "Late");

        let listing = registry.to_string();
        assert_eq!(listing, format!("idx=0  {} 'Soon' (a)\n", "     1m0s"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.get(0).unwrap().expired());
        // expiry never removes the entry
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_with_huge_duration_does_not_overflow() {
        let registry = BanRegistry::new();
        let ban = registry.ban(player("Foo", "1.2.3.4"), Duration::MAX, "forever");
        assert!(!ban.expired());
        assert_eq!(ban.remaining(), crate::utils::FAR_FUTURE);
        assert_eq!(registry.len(), 1);
        assert!(registry.to_string().contains("'Foo' (forever)"));
    }

    #[test]
    fn test_find_and_reassociate() {
        let registry = BanRegistry::new();
        registry.ban(Player::unknown_with_address("3.3.3.3"), Duration::from_secs(600), "vote");

        assert!(registry.find_by_name_and_reason("Foo", "vote").is_none());
        assert!(registry.set_player_afterwards(&player("Foo", "3.3.3.3")));
        assert!(!registry.set_player_afterwards(&player("Bar", "4.4.4.4")));

        let ban = registry.find_by_name_and_reason("Foo", "vote").unwrap();
        assert_eq!(ban.player.address, "3.3.3.3");

        registry.unban_all();
        assert!(registry.is_empty());
    }
}

//! Access control and abuse protection.
//!
//! Moderator membership, the set of commands moderators may run, the spy
//! list, the reaction emoji set, and the mention rate limiter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

pub mod rate_limiter;

pub use rate_limiter::RateLimiter;

/// A thread-safe set of names.
///
/// Backs moderators (by chat tag), allowed moderator commands and spied
/// player nicknames.
#[derive(Debug, Default)]
pub struct UserSet {
    users: Mutex<BTreeSet<String>>,
}

impl UserSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, user: &str) -> bool {
        self.lock().contains(user)
    }

    /// Returns true if the user was not yet present.
    pub fn add(&self, user: &str) -> bool {
        self.lock().insert(user.to_string())
    }

    /// Returns true if the user was present.
    pub fn remove(&self, user: &str) -> bool {
        self.lock().remove(user)
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Sorted snapshot of all members.
    pub fn users(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for UserSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            users: Mutex::new(iter.into_iter().map(|s| s.as_ref().to_string()).collect()),
        }
    }
}

/// Reaction icons used for approval signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Emojis {
    /// Forces a vote yes
    pub vote_yes: String,
    /// Forces a vote no
    pub vote_no: String,
    /// Bans the vote initiator
    pub ban: String,
    /// Lifts a ban
    pub unban: String,
}

impl Default for Emojis {
    fn default() -> Self {
        Self {
            vote_yes: "🇾".to_string(),
            vote_no: "🇳".to_string(),
            ban: "🔨".to_string(),
            unban: "❎".to_string(),
        }
    }
}

/// The configured emojis, resettable to defaults when the platform rejects
/// one of them.
#[derive(Debug, Default)]
pub struct EmojiSet {
    current: RwLock<Emojis>,
}

impl EmojiSet {
    pub fn new(emojis: Emojis) -> Self {
        Self {
            current: RwLock::new(emojis),
        }
    }

    pub fn get(&self) -> Emojis {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Falls back to the default icons.
    pub fn reset_defaults(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Emojis::default();
    }
}

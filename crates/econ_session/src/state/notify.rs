//! Join notification subscriptions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maps tracked nicknames to the chat mentions of everyone tracking them.
///
/// A requester may track many nicknames and a nickname may be tracked by many
/// requesters. Nicknames without requesters are dropped.
#[derive(Debug, Default)]
pub struct NotifyRegistry {
    tracked: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BTreeSet<String>>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts notifying `requester` when `nickname` joins any server.
    pub fn add(&self, requester: &str, nickname: &str) {
        self.lock()
            .entry(nickname.to_string())
            .or_default()
            .insert(requester.to_string());
    }

    /// Stops every notification requested by `requester`.
    pub fn remove(&self, requester: &str) {
        self.lock().retain(|_, requesters| {
            requesters.remove(requester);
            !requesters.is_empty()
        });
    }

    /// Requesters tracking `nickname`, sorted alphabetically.
    pub fn tracked(&self, nickname: &str) -> Vec<String> {
        self.lock()
            .get(nickname)
            .map(|requesters| requesters.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of tracked nicknames.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_one_of_two_requesters() {
        let registry = NotifyRegistry::new();
        registry.add("<@2>", "Foo");
        registry.add("<@1>", "Foo");
        assert_eq!(registry.tracked("Foo"), vec!["<@1>", "<@2>"]);

        registry.remove("<@2>");
        assert_eq!(registry.tracked("Foo"), vec!["<@1>"]);
    }

    #[test]
    fn test_remove_last_requester_drops_nickname() {
        let registry = NotifyRegistry::new();
        registry.add("<@1>", "Foo");
        registry.add("<@1>", "Bar");
        registry.add("<@2>", "Bar");

        registry.remove("<@1>");
        assert!(registry.tracked("Foo").is_empty());
        assert_eq!(registry.tracked("Bar"), vec!["<@2>"]);
        assert_eq!(registry.len(), 1);

        registry.remove("<@2>");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_untracked_nickname_is_empty() {
        let registry = NotifyRegistry::new();
        assert!(registry.tracked("nobody").is_empty());
        registry.remove("<@9>");
        assert!(registry.is_empty());
    }
}

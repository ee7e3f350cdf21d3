//! Channel to server bindings.
//!
//! The registry is the single place enforcing that a server address is
//! moderated by at most one session, and that a chat channel reports at most
//! one server.

use crate::chat::ChannelId;
use crate::error::{BridgeError, ValidationError};
use crate::session::SessionHandle;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Registry of active sessions keyed by server address.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    sessions: Mutex<BTreeMap<String, Arc<SessionHandle>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<SessionHandle>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds a session to its address and channel.
    ///
    /// # Arguments
    ///
    /// * `session` - The session to register
    ///
    /// # Errors
    ///
    /// * [`BridgeError::DuplicateRegistration`] - the address already has a session
    /// * [`BridgeError::Validation`] - the channel already reports another server
    ///
    /// In both cases the registry is left untouched.
    pub fn bind(&self, session: Arc<SessionHandle>) -> Result<(), BridgeError> {
        let mut sessions = self.lock();
        if sessions.contains_key(session.address()) {
            return Err(BridgeError::DuplicateRegistration {
                address: session.address().to_string(),
            });
        }
        if let Some(existing) = sessions.values().find(|s| s.channel() == session.channel()) {
            return Err(ValidationError::InvalidArgument(format!(
                "this channel is already registered with the address {}.",
                existing.address()
            ))
            .into());
        }

        info!("🔗 Bound {} to channel {}", session.address(), session.channel());
        sessions.insert(session.address().to_string(), session);
        Ok(())
    }

    /// Removes the binding of `session`.
    ///
    /// A newer session registered under the same address is left alone.
    /// Returns true if the binding was removed.
    pub fn unbind(&self, session: &Arc<SessionHandle>) -> bool {
        let mut sessions = self.lock();
        match sessions.get(session.address()) {
            Some(bound) if Arc::ptr_eq(bound, session) => {
                sessions.remove(session.address());
                debug!("unbound {} from channel {}", session.address(), session.channel());
                true
            }
            _ => false,
        }
    }

    pub fn by_address(&self, address: &str) -> Option<Arc<SessionHandle>> {
        self.lock().get(address).cloned()
    }

    pub fn by_channel(&self, channel: &ChannelId) -> Option<Arc<SessionHandle>> {
        self.lock().values().find(|s| s.channel() == channel).cloned()
    }

    /// All bound sessions, sorted by address.
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.lock().values().cloned().collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

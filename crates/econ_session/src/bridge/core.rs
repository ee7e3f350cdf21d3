//! Core bridge implementation.
//!
//! The [`Bridge`] owns everything shared between sessions: the chat client,
//! the channel registry, moderator and spy lists, join notifications, the
//! reaction emoji set and the identity tracker. Chat events enter through
//! [`Bridge::handle_event`]; sessions are started through [`Bridge::moderate`].

use super::handlers::{admin_command, moderator_command, CommandContext};
use crate::chat::{ChannelId, ChatClient, ChatEvent, ChatMessage, GuildId};
use crate::config::{BridgeConfig, SessionConfig};
use crate::connection::ChannelRegistry;
use crate::error::{BridgeError, ValidationError};
use crate::identity::{IdentityTracker, MemoryIdentityStore};
use crate::security::{EmojiSet, UserSet};
use crate::session::{run_session, SessionContext, SessionHandle};
use crate::state::NotifyRegistry;
use crate::text::{split, CHAT_MESSAGE_LIMIT};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Not an admin reply.
pub const NOT_ALLOWED: &str = "you are not allowed to access this command.";

/// The bridge between game servers and the chat platform.
///
/// # Architecture
///
/// * **Registry**: at most one session per server address and per channel
/// * **Sessions**: each runs on the bridge's task tracker under a child of
///   the root token
/// * **Commands**: `?` commands for moderators, `#` commands for the admin
pub struct Bridge {
    /// Static configuration
    config: BridgeConfig,

    /// Policy handed to every new session
    session_config: Arc<SessionConfig>,

    /// Chat platform
    chat: Arc<dyn ChatClient>,

    /// Active sessions
    registry: Arc<ChannelRegistry>,

    /// Join notification requests
    notify: Arc<NotifyRegistry>,

    /// Chat tags allowed to run `?` commands and react
    moderators: Arc<UserSet>,

    /// Commands available with the `?` prefix
    moderator_commands: UserSet,

    /// Nicknames whose whispers are always forwarded
    spied: Arc<UserSet>,

    /// Reaction icons
    emojis: Arc<EmojiSet>,

    /// Nickname history
    identity: IdentityTracker,

    /// Root of every session token
    token: CancellationToken,

    /// Session runners and background fan-out tasks
    tracker: TaskTracker,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("admin", &self.config.admin)
            .field("sessions", &self.registry.addresses())
            .field("identity", &self.identity)
            .finish()
    }
}

impl Bridge {
    /// Creates a bridge with the given configuration and chat client.
    ///
    /// The admin is always part of the moderators. Identity tracking uses an
    /// in-memory store if `identity_expiry` is configured.
    ///
    /// # Arguments
    ///
    /// * `config` - Bridge configuration
    /// * `chat` - Chat platform the bridge reports to
    pub fn new(config: BridgeConfig, chat: Arc<dyn ChatClient>) -> Self {
        let moderators: UserSet = config.moderators.iter().collect();
        if !config.admin.is_empty() {
            moderators.add(&config.admin);
        }

        let identity = match config.identity_expiry {
            Some(expiry) => IdentityTracker::new(Arc::new(MemoryIdentityStore::new(expiry))),
            None => IdentityTracker::disabled(),
        };

        Self {
            session_config: Arc::new(config.session.clone()),
            moderator_commands: config.moderator_commands.iter().collect(),
            emojis: Arc::new(EmojiSet::new(config.emojis.clone())),
            moderators: Arc::new(moderators),
            config,
            chat,
            registry: Arc::new(ChannelRegistry::new()),
            notify: Arc::new(NotifyRegistry::new()),
            spied: Arc::new(UserSet::new()),
            identity,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Replaces the identity tracker, e.g. with an external store.
    pub fn with_identity(mut self, identity: IdentityTracker) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    pub fn chat(&self) -> &Arc<dyn ChatClient> {
        &self.chat
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn notify(&self) -> &NotifyRegistry {
        &self.notify
    }

    pub fn moderators(&self) -> &UserSet {
        &self.moderators
    }

    pub fn moderator_commands(&self) -> &UserSet {
        &self.moderator_commands
    }

    pub fn spied(&self) -> &UserSet {
        &self.spied
    }

    pub fn emojis(&self) -> &EmojiSet {
        &self.emojis
    }

    pub fn identity(&self) -> &IdentityTracker {
        &self.identity
    }

    /// Root cancellation token; cancelling it stops every session.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// The shared state handed to sessions.
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            chat: self.chat.clone(),
            registry: self.registry.clone(),
            notify: self.notify.clone(),
            moderators: self.moderators.clone(),
            spied: self.spied.clone(),
            emojis: self.emojis.clone(),
            config: self.session_config.clone(),
        }
    }

    /// Starts moderating `address` from `channel`.
    ///
    /// The session is bound before it dials, so a second request for the same
    /// address fails immediately even while the first one is connecting. The
    /// session reports its start (or its connection error) to the channel.
    ///
    /// # Errors
    ///
    /// * [`ValidationError::UnknownServer`] - no password configured for `address`
    /// * [`BridgeError::DuplicateRegistration`] - the address already has a session
    pub fn moderate(
        &self,
        channel: ChannelId,
        guild: Option<GuildId>,
        address: &str,
    ) -> Result<Arc<SessionHandle>, BridgeError> {
        let password = self
            .config
            .servers
            .get(address)
            .ok_or(ValidationError::UnknownServer)?
            .clone();

        let (session, commands) = SessionHandle::new(address, channel, guild, &self.session_config, &self.token);
        self.registry.bind(session.clone())?;

        let identity = self.identity.clone();
        session
            .players()
            .on_join(Arc::new(move |player| identity.record(player)));

        info!("🎮 Moderating {} from channel {}", address, session.channel());
        self.tracker.spawn(run_session(
            session.clone(),
            commands,
            password,
            self.session_context(),
        ));
        Ok(session)
    }

    /// Handles one chat event.
    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::MessageCreated(message) => self.handle_message(&message).await,
        }
    }

    async fn handle_message(&self, message: &ChatMessage) {
        if message.author.id == self.chat.current_user().id {
            return;
        }

        let reply = if let Some(line) = message.content.strip_prefix('?') {
            if !self.moderators.contains(&message.author.tag) {
                return;
            }
            let (command, args) = split_command(line);
            moderator_command(&self.command_context(message), command, args).await
        } else if let Some(line) = message.content.strip_prefix('#') {
            if self.config.admin.is_empty() || message.author.tag != self.config.admin {
                Ok(Some(NOT_ALLOWED.to_string()))
            } else {
                let (command, args) = split_command(line);
                admin_command(&self.command_context(message), command, args).await
            }
        } else {
            return;
        };

        match reply {
            Ok(Some(text)) => self.reply(&message.channel, &text).await,
            Ok(None) => {}
            Err(e) => {
                debug!("command of {} failed: {}", message.author.tag, e);
                self.reply(&message.channel, &e.to_string()).await;
            }
        }
    }

    fn command_context<'a>(&'a self, message: &'a ChatMessage) -> CommandContext<'a> {
        CommandContext {
            bridge: self,
            message,
            session: self.registry.by_channel(&message.channel),
        }
    }

    /// Sends `text`, split on line boundaries to fit into chat messages.
    pub async fn reply(&self, channel: &ChannelId, text: &str) {
        for chunk in split(text, "\n", CHAT_MESSAGE_LIMIT) {
            if let Err(e) = self.chat.send_message(channel, &chunk).await {
                warn!("⚠️ Reply to channel {} failed: {}", channel, e);
                return;
            }
        }
    }

    /// Handles events until the stream ends or the bridge is shut down.
    pub async fn run(&self, mut events: mpsc::Receiver<ChatEvent>) {
        info!("🚀 Bridge is handling chat events");
        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event).await;
        }
        debug!("chat event loop stopped");
    }

    /// Stops every session and waits for them to close.
    ///
    /// Returns false if some tasks did not finish within the shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        info!("🛑 Shutting down {} session(s)", self.registry.len());
        self.token.cancel();
        self.tracker.close();

        // each session drains within its own timeout, plus room for reporting
        let limit = self.session_config.shutdown_timeout * 2;
        match timeout(limit, self.tracker.wait()).await {
            Ok(()) => {
                info!("✅ All sessions stopped");
                true
            }
            Err(_) => {
                warn!("⚠️ {} task(s) still running after {:?}", self.tracker.len(), limit);
                false
            }
        }
    }
}

/// Splits `"cmd rest of line"` into command and trimmed arguments.
pub fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (line, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("status"), ("status", ""));
        assert_eq!(split_command("notify  Foo Bar \n"), ("notify", "Foo Bar"));
        assert_eq!(split_command(""), ("", ""));
    }
}

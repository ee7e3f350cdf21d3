//! Per-server session engine.
//!
//! A session owns one econ connection together with the state derived from
//! it: the player table, the ban registry, the announcement scheduler and the
//! mention rate limiter. Every task spawned for a session lives under the
//! session's cancellation token, so cancelling that token is the single way to
//! stop everything belonging to the server.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting -> Active -> Draining -> Closed
//!      \______________________________/
//!            (dial failure)
//! ```

pub mod core;
pub mod reactions;
pub mod routines;

pub use self::core::{run_session, SessionContext};

use crate::announcements::AnnouncementScheduler;
use crate::chat::{ChannelId, GuildId};
use crate::config::SessionConfig;
use crate::error::BridgeError;
use crate::security::RateLimiter;
use crate::state::{BanRegistry, PlayerTable};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A command queued for execution on the econ connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Chat user (or internal source) the command is attributed to
    pub author: String,
    /// Raw econ command line
    pub text: String,
}

impl Command {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }

    /// The echo line written before the command so that the server log shows
    /// who issued it.
    pub fn attribution(&self) -> String {
        format!(
            "echo [bridge] user '{}' executed rcon '{}'",
            self.author.replace('#', "_"),
            self.text
        )
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared handle to one server session.
///
/// The handle is cheap to share behind an `Arc` and is what chat commands,
/// reaction flows and the channel registry hold on to. The session's own
/// tasks are driven by [`run_session`].
pub struct SessionHandle {
    address: String,
    channel: ChannelId,
    guild: Option<GuildId>,
    players: PlayerTable,
    bans: BanRegistry,
    announcements: AnnouncementScheduler,
    mentions: RateLimiter,
    commands: mpsc::Sender<Command>,
    token: CancellationToken,
    tracker: TaskTracker,
    state: watch::Sender<SessionState>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("address", &self.address)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    /// Creates a session in the `Connecting` state.
    ///
    /// # Arguments
    ///
    /// * `address` - Econ address of the game server
    /// * `channel` - Chat channel the session reports to
    /// * `guild` - Guild of the channel, used for role lookups
    /// * `config` - Session policy
    /// * `parent` - Token whose cancellation stops the session
    ///
    /// # Returns
    ///
    /// The shared handle and the receiving end of its command queue, which
    /// must be passed to [`run_session`].
    pub fn new(
        address: impl Into<String>,
        channel: ChannelId,
        guild: Option<GuildId>,
        config: &SessionConfig,
        parent: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Command>) {
        let (commands, receiver) = mpsc::channel(config.command_queue_size.max(1));
        let token = parent.child_token();
        let tracker = TaskTracker::new();
        let (state, _) = watch::channel(SessionState::Connecting);

        let handle = Arc::new(Self {
            address: address.into(),
            channel,
            guild,
            players: PlayerTable::new(),
            bans: BanRegistry::new(),
            announcements: AnnouncementScheduler::new(token.clone(), tracker.clone(), commands.clone()),
            mentions: RateLimiter::new(config.mention_cooldown),
            commands,
            token,
            tracker,
            state,
        });
        (handle, receiver)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn guild(&self) -> Option<&GuildId> {
        self.guild.as_ref()
    }

    pub fn players(&self) -> &PlayerTable {
        &self.players
    }

    pub fn bans(&self) -> &BanRegistry {
        &self.bans
    }

    pub fn announcements(&self) -> &AnnouncementScheduler {
        &self.announcements
    }

    pub fn mentions(&self) -> &RateLimiter {
        &self.mentions
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// True until the session starts draining.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), SessionState::Connecting | SessionState::Active)
    }

    /// Queues a command for the relay loop.
    ///
    /// Waits for queue capacity, but never past session cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] if the session is stopping or its
    /// relay loop has exited.
    pub async fn enqueue(&self, command: Command) -> Result<(), BridgeError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(self.not_running()),
            sent = self.commands.send(command) => sent.map_err(|_| self.not_running()),
        }
    }

    fn not_running(&self) -> BridgeError {
        BridgeError::Connection(format!("session {} is not running", self.address))
    }

    /// Requests the session to stop. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Waits until the session reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this only ends on the transition.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

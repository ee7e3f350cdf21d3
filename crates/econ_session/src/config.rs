//! Bridge configuration types and defaults.
//!
//! [`BridgeConfig`] is built once at startup and handed to the
//! [`Bridge`](crate::Bridge). Sessions never see it: each one receives only
//! its [`SessionConfig`] slice.

use crate::classifier::RuleSet;
use crate::security::Emojis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How much of the server log is forwarded to chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Chat, votes, bans, rcon activity
    #[default]
    Chat,
    /// Additionally whispers
    Whisper,
    /// Additionally joins and leaves
    Full,
}

impl Verbosity {
    /// Maps the numeric log level (0, 1, 2+) used on the command line.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Verbosity::Chat,
            1 => Verbosity::Whisper,
            _ => Verbosity::Full,
        }
    }
}

/// Per-session policy.
///
/// Cloned into every session at start; changing the bridge configuration
/// later does not affect running sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Forwarding threshold for joins, leaves and whispers
    pub verbosity: Verbosity,

    /// Hard deadline for reacting to a vote
    pub vote_window: Duration,

    /// Interval between reaction polls
    pub poll_interval: Duration,

    /// Interval of the stale message cleanup
    pub cleanup_interval: Duration,

    /// Messages older than this are deleted by the cleanup
    pub retention: Duration,

    /// Messages younger than this may be deleted in bulk
    pub bulk_delete_window: Duration,

    /// Minimum time between two moderator role mentions
    pub mention_cooldown: Duration,

    /// Name (or part of the name) of the role pinged for `@mod` mentions
    pub moderator_role: Option<String>,

    /// Command template banning an online player; `{id}` is replaced
    pub ban_id_command: String,

    /// Command template banning by address; `{address}` is replaced
    pub ban_address_command: String,

    /// Commands written right after authentication
    pub initial_commands: Vec<String>,

    /// Dial and authentication timeout
    pub connect_timeout: Duration,

    /// Capacity of the per-server command queue
    pub command_queue_size: usize,

    /// Upper bound for waiting on session tasks during teardown
    pub shutdown_timeout: Duration,

    /// Line grammar of the server
    pub rules: Arc<RuleSet>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            vote_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(2 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            bulk_delete_window: Duration::from_secs(14 * 24 * 60 * 60 - 60),
            mention_cooldown: Duration::from_secs(60),
            moderator_role: None,
            ban_id_command: "ban {id} 10 forbidden vote".to_string(),
            ban_address_command: "ban {address} 10 forbidden vote".to_string(),
            initial_commands: vec!["ec_output_level 2".to_string()],
            connect_timeout: Duration::from_secs(10),
            command_queue_size: 64,
            shutdown_timeout: Duration::from_secs(5),
            rules: Arc::new(RuleSet::teeworlds().unwrap_or_default()),
        }
    }
}

impl SessionConfig {
    /// Renders the ban-by-id template.
    pub fn ban_id(&self, id: i32) -> String {
        self.ban_id_command.replace("{id}", &id.to_string())
    }

    /// Renders the ban-by-address template.
    pub fn ban_address(&self, address: &str) -> String {
        self.ban_address_command.replace("{address}", address)
    }
}

/// Configuration of the whole bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Chat tag of the administrator
    pub admin: String,

    /// Chat tags of the initial moderators
    pub moderators: Vec<String>,

    /// Commands moderators may run with the `?` prefix
    pub moderator_commands: Vec<String>,

    /// Econ passwords keyed by server address
    pub servers: BTreeMap<String, String>,

    /// Reaction icons
    pub emojis: Emojis,

    /// Expiry of nickname sightings; `None` disables identity tracking
    pub identity_expiry: Option<Duration>,

    /// Policy handed to each session
    pub session: SessionConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            admin: String::new(),
            moderators: Vec::new(),
            moderator_commands: default_moderator_commands(),
            servers: BTreeMap::new(),
            emojis: Emojis::default(),
            identity_expiry: None,
            session: SessionConfig::default(),
        }
    }
}

/// Commands moderators may run when nothing else is configured.
pub fn default_moderator_commands() -> Vec<String> {
    [
        "help", "status", "bans", "multiban", "multiunban", "notify", "unnotify", "whois",
        "ban", "unban", "kick", "vote", "mute", "unmute", "voteban",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

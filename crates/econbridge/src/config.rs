//! Configuration management for the econ bridge.
//!
//! This module handles loading, validation, and conversion of the bridge
//! configuration from TOML files and command-line arguments.

use econ_session::classifier::{EventKind, RuleSet};
use econ_session::config::default_moderator_commands;
use econ_session::security::Emojis;
use econ_session::{BridgeConfig, BridgeError, SessionConfig, Verbosity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses chat access,
/// econ servers, session policy, reaction emojis, nickname tracking, the line
/// grammar and logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat access settings
    #[serde(default)]
    pub chat: ChatSettings,
    /// Econ servers and credentials
    #[serde(default)]
    pub econ: EconSettings,
    /// Per-session policy
    #[serde(default)]
    pub session: SessionSettings,
    /// Reaction icons
    #[serde(default)]
    pub emojis: Emojis,
    /// Nickname tracking
    #[serde(default)]
    pub identity: IdentitySettings,
    /// Line grammar
    #[serde(default)]
    pub rules: RuleSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Who may do what in chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Chat tag of the administrator, e.g. `admin#0001`
    pub admin: String,
    /// Chat tags of the initial moderators
    pub moderators: Vec<String>,
    /// Role pinged when a player asks for a moderator
    pub moderator_role: Option<String>,
    /// Commands moderators may use with the `?` prefix
    pub moderator_commands: Vec<String>,
    /// Channel of the console frontend
    pub channel: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            admin: String::new(),
            moderators: Vec::new(),
            moderator_role: None,
            moderator_commands: default_moderator_commands(),
            channel: "console".to_string(),
        }
    }
}

/// Econ endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconSettings {
    /// Server addresses, `host:port`
    pub servers: Vec<String>,
    /// One password for all servers, or one per server in the same order
    pub passwords: Vec<String>,
    /// Dial and authentication timeout in seconds
    pub connect_timeout_secs: u64,
    /// Commands written after authentication
    pub initial_commands: Vec<String>,
}

impl Default for EconSettings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            passwords: Vec::new(),
            connect_timeout_secs: 10,
            initial_commands: vec!["ec_output_level 2".to_string()],
        }
    }
}

/// Session timing and ban templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// `chat`, `whisper` or `full`
    pub verbosity: Verbosity,
    pub vote_window_secs: u64,
    pub poll_interval_ms: u64,
    pub cleanup_interval_secs: u64,
    /// Forwarded messages older than this are deleted
    pub retention_hours: u64,
    pub mention_cooldown_secs: u64,
    /// `{id}` is replaced with the slot id
    pub ban_id_command: String,
    /// `{address}` is replaced with the player address
    pub ban_address_command: String,
    pub command_queue_size: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            verbosity: defaults.verbosity,
            vote_window_secs: defaults.vote_window.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            cleanup_interval_secs: defaults.cleanup_interval.as_secs(),
            retention_hours: defaults.retention.as_secs() / 3600,
            mention_cooldown_secs: defaults.mention_cooldown.as_secs(),
            ban_id_command: defaults.ban_id_command,
            ban_address_command: defaults.ban_address_command,
            command_queue_size: defaults.command_queue_size,
            shutdown_timeout_secs: defaults.shutdown_timeout.as_secs(),
        }
    }
}

/// Nickname tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub enabled: bool,
    /// Sightings older than this are forgotten
    pub expiry_hours: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            expiry_hours: 30 * 24,
        }
    }
}

/// Line grammar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// `teeworlds` or `staged`
    pub preset: String,
    /// Rules checked before the preset
    pub extra: Vec<ExtraRule>,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            preset: "teeworlds".to_string(),
            extra: Vec::new(),
        }
    }
}

/// A rule from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraRule {
    /// Log category, e.g. `server`
    pub category: String,
    /// Event kind, e.g. `join` or `ban-add`
    pub kind: String,
    /// Regex with the named groups the kind reads
    pub pattern: String,
}

/// Logging system configuration.
///
/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let fail = |message: String| Err(BridgeError::Configuration(message));

        if self.econ.servers.is_empty() {
            return fail("econ.servers must list at least one server".to_string());
        }
        let (servers, passwords) = (self.econ.servers.len(), self.econ.passwords.len());
        if passwords != 1 && passwords != servers {
            return fail(format!(
                "got {servers} server(s) but {passwords} password(s), pass either one password or one per server"
            ));
        }
        if self.chat.admin.trim().is_empty() {
            return fail("chat.admin cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return fail(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.session.vote_window_secs == 0 {
            return fail("session.vote_window_secs must be greater than 0".to_string());
        }
        if self.session.poll_interval_ms == 0 {
            return fail("session.poll_interval_ms must be greater than 0".to_string());
        }
        if self.session.cleanup_interval_secs == 0 {
            return fail("session.cleanup_interval_secs must be greater than 0".to_string());
        }
        if self.session.command_queue_size == 0 {
            return fail("session.command_queue_size must be greater than 0".to_string());
        }
        if self.identity.enabled && self.identity.expiry_hours == 0 {
            return fail("identity.expiry_hours must be greater than 0".to_string());
        }

        self.build_rules().map(|_| ())
    }

    /// Builds the rule table: the extra rules followed by the preset.
    ///
    /// The first matching rule wins and the presets end in catch-alls, so
    /// extra rules take precedence over the preset rules of their category.
    pub fn build_rules(&self) -> Result<RuleSet, BridgeError> {
        let invalid = |e: econ_session::classifier::RuleError| BridgeError::Configuration(e.to_string());

        let mut rules = RuleSet::new();
        for extra in &self.rules.extra {
            let kind: EventKind = extra.kind.parse().map_err(invalid)?;
            rules.push(&extra.category, kind, &extra.pattern).map_err(invalid)?;
        }
        rules.extend(RuleSet::preset(&self.rules.preset).map_err(invalid)?);
        Ok(rules)
    }

    /// Maps every server address to its password.
    ///
    /// A single password is shared by all servers.
    pub fn server_passwords(&self) -> BTreeMap<String, String> {
        let shared = (self.econ.passwords.len() == 1).then(|| self.econ.passwords[0].clone());
        self.econ
            .servers
            .iter()
            .enumerate()
            .filter_map(|(i, server)| {
                let password = shared.clone().or_else(|| self.econ.passwords.get(i).cloned())?;
                Some((server.clone(), password))
            })
            .collect()
    }

    /// Converts the application configuration to the core bridge configuration.
    ///
    /// # Returns
    ///
    /// A `BridgeConfig` ready for [`econ_session::Bridge::new`], or a
    /// configuration error if the rules do not compile.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, BridgeError> {
        let session = SessionConfig {
            verbosity: self.session.verbosity,
            vote_window: Duration::from_secs(self.session.vote_window_secs),
            poll_interval: Duration::from_millis(self.session.poll_interval_ms),
            cleanup_interval: Duration::from_secs(self.session.cleanup_interval_secs),
            retention: Duration::from_secs(self.session.retention_hours * 3600),
            mention_cooldown: Duration::from_secs(self.session.mention_cooldown_secs),
            moderator_role: self.chat.moderator_role.clone(),
            ban_id_command: self.session.ban_id_command.clone(),
            ban_address_command: self.session.ban_address_command.clone(),
            initial_commands: self.econ.initial_commands.clone(),
            connect_timeout: Duration::from_secs(self.econ.connect_timeout_secs),
            command_queue_size: self.session.command_queue_size,
            shutdown_timeout: Duration::from_secs(self.session.shutdown_timeout_secs),
            rules: Arc::new(self.build_rules()?),
            ..SessionConfig::default()
        };

        Ok(BridgeConfig {
            admin: self.chat.admin.clone(),
            moderators: self.chat.moderators.clone(),
            moderator_commands: self.chat.moderator_commands.clone(),
            servers: self.server_passwords(),
            emojis: self.emojis.clone(),
            identity_expiry: self
                .identity
                .enabled
                .then(|| Duration::from_secs(self.identity.expiry_hours * 3600)),
            session,
        })
    }
}

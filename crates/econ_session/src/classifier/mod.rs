//! Econ log line classification.
//!
//! A raw line is first split into `[timestamp][category]: payload` by
//! [`tokenize`], then matched against the session's [`RuleSet`]. The matching
//! rule's kind drives mutations of the player table and ban registry and
//! decides what, if anything, is forwarded to chat.
//!
//! All untrusted text (names, chat, reasons) is markdown escaped before it is
//! embedded in a display line.

use crate::config::Verbosity;
use crate::security::UserSet;
use crate::state::{Ban, BanRegistry, NotifyRegistry, Player, PlayerTable};
use crate::text::{escape, format_duration};
use regex::Captures;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

pub mod rules;

pub use rules::{EventKind, Rule, RuleError, RuleSet};

/// A line split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: Option<String>,
    pub category: String,
    pub payload: String,
}

/// Splits a raw econ line of the form `[timestamp][category]: payload` or
/// `[category]: payload`. Lines of any other shape yield `None`.
pub fn tokenize(line: &str) -> Option<LogLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (first, rest) = bracketed(line)?;

    let (timestamp, category, rest) = match bracketed(rest) {
        Some((category, rest)) if is_timestamp(first) => (Some(first.to_string()), category, rest),
        _ => (None, first, rest),
    };

    let payload = rest.strip_prefix(": ")?;
    if category.is_empty() || category.contains(':') || payload.is_empty() {
        return None;
    }

    Some(LogLine {
        timestamp,
        category: category.to_string(),
        payload: payload.to_string(),
    })
}

// "[inner]rest" -> (inner, rest)
fn bracketed(input: &str) -> Option<(&str, &str)> {
    let inner = input.strip_prefix('[')?;
    let end = inner.find(']')?;
    Some((&inner[..end], &inner[end + 1..]))
}

fn is_timestamp(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | ':' | '.'))
}

/// Which kind of vote a moderator can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Kick,
    Spectate,
}

/// Structured follow-up events for the session's reaction flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A kick or spectate vote was started
    VoteStarted {
        kind: VoteKind,
        voter: Player,
        target: Player,
    },
    /// A ban was added to the registry
    BanAdded(Ban),
}

/// Outcome of classifying one line.
///
/// `consumed` with empty `text` means the line only updated state and must
/// not be forwarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub consumed: bool,
    pub text: String,
    pub event: Option<SessionEvent>,
}

impl Classification {
    fn unrecognized() -> Self {
        Self::default()
    }

    fn absorbed() -> Self {
        Self {
            consumed: true,
            ..Self::default()
        }
    }

    fn forward(text: String) -> Self {
        Self {
            consumed: true,
            text,
            event: None,
        }
    }

    fn with_event(mut self, event: SessionEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// True if the display text should be sent to chat.
    pub fn should_forward(&self) -> bool {
        self.consumed && !self.text.is_empty()
    }
}

/// Session state the classifier reads and mutates.
pub struct ClassifierContext<'a> {
    pub players: &'a PlayerTable,
    pub bans: &'a BanRegistry,
    pub notify: &'a NotifyRegistry,
    pub spied: &'a UserSet,
    pub verbosity: Verbosity,
}

/// Maps log lines to state changes and display text.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    rules: Arc<RuleSet>,
}

fn int<T: std::str::FromStr + Default>(caps: &Captures<'_>, name: &str) -> T {
    caps.name(name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or_default()
}

fn text<'c>(caps: &'c Captures<'_>, name: &str) -> &'c str {
    caps.name(name).map(|m| m.as_str()).unwrap_or_default()
}

fn forced_suffix(caps: &Captures<'_>) -> &'static str {
    if text(caps, "force") == "1" {
        "/forced"
    } else {
        ""
    }
}

/// Splits `host:port`, keeping brackets of IPv6 hosts.
fn split_host_port(address: &str) -> (&str, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            (host, port.parse().unwrap_or_default())
        }
        _ => (address, 0),
    }
}

impl LineClassifier {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Tokenizes and classifies a raw line.
    pub fn classify_raw(&self, raw: &str, ctx: &ClassifierContext<'_>) -> Classification {
        match tokenize(raw) {
            Some(line) => self.classify(&line, ctx),
            None => Classification::unrecognized(),
        }
    }

    /// Classifies an already tokenized line.
    pub fn classify(&self, line: &LogLine, ctx: &ClassifierContext<'_>) -> Classification {
        let Some((rule, caps)) = self.rules.find(&line.category, &line.payload) else {
            trace!("unrecognized [{}] line: {}", line.category, line.payload);
            return Classification::unrecognized();
        };

        match rule.kind {
            EventKind::Join => {
                let (address, port) = match caps.name("port") {
                    Some(port) => (text(&caps, "addr").to_string(), port.as_str().parse().unwrap_or_default()),
                    None => {
                        let (host, port) = split_host_port(text(&caps, "addr"));
                        (host.to_string(), port)
                    }
                };
                let player = Player {
                    id: int(&caps, "id"),
                    name: text(&caps, "name").to_string(),
                    clan: text(&caps, "clan").to_string(),
                    address,
                    port,
                    version: int(&caps, "version"),
                    country: int(&caps, "country"),
                    ..Default::default()
                };
                match ctx.players.join(player) {
                    Some(player) => self.joined(&player, ctx),
                    None => Classification::absorbed(),
                }
            }
            EventKind::Ready => {
                let (host, port) = split_host_port(text(&caps, "addr"));
                ctx.players.set_ready(int(&caps, "id"), host, port);
                Classification::absorbed()
            }
            EventKind::Named => {
                ctx.players.set_name(
                    int(&caps, "id"),
                    text(&caps, "name"),
                    text(&caps, "clan"),
                    int(&caps, "country"),
                );
                Classification::absorbed()
            }
            EventKind::Enter => match ctx.players.enter(int(&caps, "id")) {
                Some(player) => self.joined(&player, ctx),
                None => Classification::absorbed(),
            },
            EventKind::Leave => {
                let id: i32 = int(&caps, "id");
                match ctx.players.leave(id) {
                    Some(player) if ctx.verbosity >= Verbosity::Full => Classification::forward(format!(
                        "[server]: '{}' left the server, id was {}",
                        escape(&player.name),
                        id
                    )),
                    _ => Classification::absorbed(),
                }
            }
            EventKind::Chat | EventKind::TeamChat | EventKind::Whisper => {
                let id: i32 = int(&caps, "id");
                let name = text(&caps, "name");
                let message = text(&caps, "text");
                let formatted = match rule.kind {
                    EventKind::Chat => format!("[chat]: {}:'{}': {}", id, escape(name), escape(message)),
                    EventKind::TeamChat => format!("[teamchat]: {}:'{}': {}", id, escape(name), escape(message)),
                    _ => {
                        if ctx.verbosity < Verbosity::Whisper && !ctx.spied.contains(name) {
                            return Classification::absorbed();
                        }
                        format!("[whisper] {}:'{}': {}", id, escape(name), escape(message))
                    }
                };
                Classification::forward(formatted)
            }
            EventKind::VoteKick | EventKind::VoteSpec => {
                let voter_id: i32 = int(&caps, "voter_id");
                let target_id: i32 = int(&caps, "target_id");
                let voter_name = escape(text(&caps, "voter_name"));
                let target_name = escape(text(&caps, "target_name"));
                let reason = escape(text(&caps, "reason"));
                let forced = forced_suffix(&caps);

                let (kind, formatted) = if rule.kind == EventKind::VoteKick {
                    (
                        VoteKind::Kick,
                        format!(
                            "**[kickvote{forced}]**: {voter_id}:'{voter_name}' started to kick {target_id}:'{target_name}' with reason '{reason}'"
                        ),
                    )
                } else {
                    (
                        VoteKind::Spectate,
                        format!(
                            "**[specvote{forced}]**: {voter_id}:'{voter_name}' wants to move {target_id}:'{target_name}' to spectators with reason '{reason}'"
                        ),
                    )
                };

                Classification::forward(formatted).with_event(SessionEvent::VoteStarted {
                    kind,
                    voter: ctx.players.player(voter_id),
                    target: ctx.players.player(target_id),
                })
            }
            EventKind::VoteOption => Classification::forward(format!(
                "**[optionvote{}]**: {}:'{}' voted option '{}' with reason '{}'",
                forced_suffix(&caps),
                int::<i32>(&caps, "voter_id"),
                escape(text(&caps, "voter_name")),
                escape(text(&caps, "option")),
                escape(text(&caps, "reason"))
            )),
            EventKind::ForcedYes => Classification::forward("**[server]**: Forced Yes".to_string()),
            EventKind::ForcedNo => Classification::forward("**[server]**: Forced No".to_string()),
            EventKind::RconAuth => {
                let player = ctx.players.player(int(&caps, "id"));
                Classification::forward(format!(
                    "**[rcon]**: '{}' authed as **{}**",
                    escape(&player.name),
                    escape(text(&caps, "rank"))
                ))
            }
            EventKind::RconExec => {
                let player = ctx.players.player(int(&caps, "id"));
                Classification::forward(format!(
                    "**[rcon]**: '{}' command='{}'",
                    escape(&player.name),
                    escape(text(&caps, "command"))
                ))
            }
            EventKind::BanAdd => {
                let address = text(&caps, "addr");
                let minutes: u64 = int(&caps, "minutes");
                let duration = Duration::from_secs(minutes.saturating_mul(60));
                let reason = text(&caps, "reason");

                let player = ctx.players.player_by_address(address);
                let display = if player.is_unknown() { address } else { player.name.as_str() };
                let formatted = format!(
                    "**[bans]**: '{}' banned for {} with reason: '{}'",
                    escape(display),
                    format_duration(duration),
                    escape(reason)
                );
                let ban = ctx.bans.ban(player, duration, reason);
                Classification::forward(formatted).with_event(SessionEvent::BanAdded(ban))
            }
            EventKind::BanExpire => {
                let address = text(&caps, "addr");
                Classification::forward(match ctx.bans.unban_by_address(address) {
                    Some(ban) => format!(
                        "[bans]: ban of '{}' expired ({})",
                        escape(ban_display_name(&ban)),
                        escape(&ban.reason)
                    ),
                    None => format!("[bans]: ban of '{}' expired", escape(address)),
                })
            }
            EventKind::BanRemove => {
                let address = text(&caps, "addr");
                Classification::forward(match ctx.bans.unban_by_address(address) {
                    Some(ban) => format!(
                        "[bans]: unbanned '{}' ({})",
                        escape(ban_display_name(&ban)),
                        escape(&ban.reason)
                    ),
                    None => format!("[bans]: unbanned '{}'", escape(address)),
                })
            }
            EventKind::BanRemoveAll => {
                ctx.bans.unban_all();
                Classification::forward("[bans]: unbanned all players.".to_string())
            }
            EventKind::BanError => {
                Classification::forward(format!("**[error]**: {}", escape(text(&caps, "message"))))
            }
            EventKind::GenericServer => {
                Classification::forward(format!("[server]: {}", escape(text(&caps, "text"))))
            }
        }
    }

    fn joined(&self, player: &Player, ctx: &ClassifierContext<'_>) -> Classification {
        let line = format!(
            "[server]: '{}' joined the server with id {}",
            escape(&player.name),
            player.id
        );

        let mentions = ctx.notify.tracked(&player.name);
        if !mentions.is_empty() {
            return Classification::forward(format!("{line}\n{}", mentions.join(" ")));
        }
        if ctx.verbosity >= Verbosity::Full {
            return Classification::forward(line);
        }
        Classification::absorbed()
    }
}

fn ban_display_name(ban: &Ban) -> &str {
    if ban.player.is_unknown() {
        &ban.player.address
    } else {
        &ban.player.name
    }
}

//! Pattern rules mapping econ log lines to event kinds.
//!
//! Grammars differ between server builds, so they are data: an ordered list
//! of `(category, kind, regex)` rules. The first rule whose category matches
//! and whose regex matches the payload wins. Handlers read their fields from
//! named capture groups (`id`, `addr`, `name`, ...), so a custom rule only has
//! to provide the groups its kind needs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event kinds a rule can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Client fully joined in one line. Groups: id, addr, port, name, clan, version, country
    Join,
    /// Client dropped. Groups: id
    Leave,
    /// Staged handshake: connection accepted. Groups: id, addr
    Ready,
    /// Staged handshake: client sent its info. Groups: id, name, clan?, country?
    Named,
    /// Staged handshake: client entered the game. Groups: id
    Enter,
    /// Public chat. Groups: id, name, text
    Chat,
    /// Team chat. Groups: id, name, text
    TeamChat,
    /// Private message. Groups: id, name, text
    Whisper,
    /// Groups: voter_id, voter_name, target_id, target_name, reason, force
    VoteKick,
    /// Groups: voter_id, voter_name, target_id, target_name, reason, force
    VoteSpec,
    /// Groups: voter_id, voter_name, option, reason, force
    VoteOption,
    ForcedYes,
    ForcedNo,
    /// Groups: id, rank
    RconAuth,
    /// Groups: id, command
    RconExec,
    /// Groups: addr, minutes, reason
    BanAdd,
    /// Groups: addr
    BanRemove,
    /// Groups: addr
    BanExpire,
    BanRemoveAll,
    /// Groups: message
    BanError,
    /// Groups: text
    GenericServer,
}

impl EventKind {
    const ALL: [EventKind; 21] = [
        EventKind::Join,
        EventKind::Leave,
        EventKind::Ready,
        EventKind::Named,
        EventKind::Enter,
        EventKind::Chat,
        EventKind::TeamChat,
        EventKind::Whisper,
        EventKind::VoteKick,
        EventKind::VoteSpec,
        EventKind::VoteOption,
        EventKind::ForcedYes,
        EventKind::ForcedNo,
        EventKind::RconAuth,
        EventKind::RconExec,
        EventKind::BanAdd,
        EventKind::BanRemove,
        EventKind::BanExpire,
        EventKind::BanRemoveAll,
        EventKind::BanError,
        EventKind::GenericServer,
    ];

    /// Configuration name of the kind, e.g. `vote-kick`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Ready => "ready",
            EventKind::Named => "named",
            EventKind::Enter => "enter",
            EventKind::Chat => "chat",
            EventKind::TeamChat => "teamchat",
            EventKind::Whisper => "whisper",
            EventKind::VoteKick => "vote-kick",
            EventKind::VoteSpec => "vote-spec",
            EventKind::VoteOption => "vote-option",
            EventKind::ForcedYes => "forced-yes",
            EventKind::ForcedNo => "forced-no",
            EventKind::RconAuth => "rcon-auth",
            EventKind::RconExec => "rcon-exec",
            EventKind::BanAdd => "ban-add",
            EventKind::BanRemove => "ban-remove",
            EventKind::BanExpire => "ban-expire",
            EventKind::BanRemoveAll => "ban-remove-all",
            EventKind::BanError => "ban-error",
            EventKind::GenericServer => "generic-server",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RuleError::UnknownKind(s.to_string()))
    }
}

/// Errors raised while building a rule set.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),

    #[error("unknown rule preset '{0}'")]
    UnknownPreset(String),

    #[error("invalid pattern for {kind}: {source}")]
    InvalidPattern {
        kind: EventKind,
        #[source]
        source: regex::Error,
    },
}

/// One pattern rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub category: String,
    pub kind: EventKind,
    pub pattern: Regex,
}

/// Ordered rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

// Patterns of the stock server. Addresses may be IPv4 or bracketed IPv6.
const ADDR: &str = r"[a-fA-F0-9\.\:\[\]]+";
const CHAT_LINE: &str = r"(?P<id>\d+):-?\d+:(?P<name>.{1,16}): (?P<text>.*)$";

impl RuleSet {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a preset by name: `teeworlds` or `staged`.
    pub fn preset(name: &str) -> Result<Self, RuleError> {
        match name {
            "teeworlds" => Self::teeworlds(),
            "staged" => Self::staged(),
            other => Err(RuleError::UnknownPreset(other.to_string())),
        }
    }

    /// Rules for servers that announce a client in a single `client_enter` line.
    pub fn teeworlds() -> Result<Self, RuleError> {
        let mut rules = Self::new();
        let join = format!(
            r"id=(?P<id>\d+) addr=(?P<addr>{ADDR}):(?P<port>\d+) version=(?P<version>\d+) name='(?P<name>.{{0,20}})' clan='(?P<clan>.{{0,16}})' country=(?P<country>[-\d]+)$"
        );
        let leave = format!(r"id=(?P<id>\d+) addr=(?P<addr>{ADDR}) reason='(?P<reason>.*)'$");

        rules.push("client_enter", EventKind::Join, &join)?;
        rules.push("client_drop", EventKind::Leave, &leave)?;

        rules.push(
            "server",
            EventKind::VoteOption,
            r"'(?P<voter_id>\d{1,2}):(?P<voter_name>.*)' voted option '(?P<option>.+)' reason='(?P<reason>.{1,20})' cmd='(?P<cmd>.+)' force=(?P<force>\d)",
        )?;
        rules.push(
            "server",
            EventKind::VoteKick,
            r"'(?P<voter_id>\d{1,2}):(?P<voter_name>.*)' voted kick '(?P<target_id>\d{1,2}):(?P<target_name>.*)' reason='(?P<reason>.{1,20})' cmd='(?P<cmd>.*)' force=(?P<force>\d)",
        )?;
        rules.push(
            "server",
            EventKind::VoteSpec,
            r"'(?P<voter_id>\d{1,2}):(?P<voter_name>.*)' voted spectate '(?P<target_id>\d{1,2}):(?P<target_name>.*)' reason='(?P<reason>.{1,20})' cmd='(?P<cmd>.*)' force=(?P<force>\d)",
        )?;
        rules.push("server", EventKind::ForcedYes, r"forcing vote yes$")?;
        rules.push("server", EventKind::ForcedNo, r"forcing vote no$")?;
        rules.push("server", EventKind::RconAuth, r"ClientID=(?P<id>\d+) authed \((?P<rank>.*)\)")?;
        rules.push("server", EventKind::RconExec, r"ClientID=(?P<id>\d+) rcon='(?P<command>.*)'$")?;

        rules.push(
            "net_ban",
            EventKind::BanAdd,
            r"^banned '(?P<addr>.*)' for (?P<minutes>\d+) minutes? \((?P<reason>.*)\)$",
        )?;
        rules.push(
            "net_ban",
            EventKind::BanAdd,
            r"^'(?P<addr>.*)' banned for (?P<minutes>\d+) minutes? \((?P<reason>.*)\)$",
        )?;
        rules.push("net_ban", EventKind::BanExpire, r"^ban '(?P<addr>.+)' expired$")?;
        rules.push("net_ban", EventKind::BanRemove, r"^unbanned index \d+ \('(?P<addr>.+)'\)")?;
        rules.push("net_ban", EventKind::BanRemove, r"^unbanned '(?P<addr>.+)'")?;
        rules.push("net_ban", EventKind::BanRemoveAll, r"^unbanned all entries$")?;
        rules.push("net_ban", EventKind::BanError, r"(?P<message>.*error.*)$")?;

        rules.push("chat", EventKind::Chat, CHAT_LINE)?;
        rules.push("teamchat", EventKind::TeamChat, CHAT_LINE)?;
        rules.push("whisper", EventKind::Whisper, CHAT_LINE)?;

        rules.push("Server", EventKind::GenericServer, r"^(?P<text>.*)$")?;
        Ok(rules)
    }

    /// Rules for servers that split a join into ready, info and enter lines.
    ///
    /// The name line is checked first so a name is never attributed to a
    /// slot that only just became ready. Everything else falls through to
    /// the [`teeworlds`](Self::teeworlds) rules.
    pub fn staged() -> Result<Self, RuleError> {
        let mut rules = Self::new();
        rules.push(
            "server",
            EventKind::Named,
            r"^client_identified ClientID=(?P<id>\d+) name='(?P<name>.{0,20})' clan='(?P<clan>.{0,16})' country=(?P<country>[-\d]+)",
        )?;
        rules.push(
            "server",
            EventKind::Ready,
            r"^player is ready\. ClientID=(?P<id>\d+) addr=<\{(?P<addr>[^}]+)\}>",
        )?;
        rules.push(
            "server",
            EventKind::Enter,
            r"^player has entered the game\. ClientID=(?P<id>\d+)",
        )?;
        rules.push(
            "server",
            EventKind::Leave,
            r"^client dropped\. ClientID=(?P<id>\d+)",
        )?;
        rules.extend(Self::teeworlds()?);
        Ok(rules)
    }

    /// Appends a rule.
    pub fn push(&mut self, category: &str, kind: EventKind, pattern: &str) -> Result<(), RuleError> {
        let pattern = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern { kind, source })?;
        self.rules.push(Rule {
            category: category.to_string(),
            kind,
            pattern,
        });
        Ok(())
    }

    /// Appends all rules of `other` after the existing ones.
    pub fn extend(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    /// Returns the first rule of `category` matching `payload`.
    ///
    /// The captures borrow from `payload`.
    pub fn find<'p>(&'p self, category: &str, payload: &'p str) -> Option<(&'p Rule, regex::Captures<'p>)> {
        self.rules
            .iter()
            .filter(|rule| rule.category == category)
            .find_map(|rule| rule.pattern.captures(payload).map(|caps| (rule, caps)))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

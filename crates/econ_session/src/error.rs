//! Error types and handling for the econ bridge.
//!
//! This module defines the error taxonomy shared by every session. Errors are
//! always scoped: a failure in one session or one command never crosses into
//! an unrelated session.

use crate::chat::ChatError;

/// Enumeration of possible bridge errors.
///
/// Only [`BridgeError::Configuration`] is fatal for the whole process. All other
/// variants are reported to the originating chat channel or logged with the
/// server address for correlation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Missing credentials, mismatched server/password counts, invalid rules
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Dialing or authenticating against the econ endpoint failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Reading from an established econ connection failed; ends the session
    #[error("econ read error: {0}")]
    ProtocolRead(String),

    /// Invalid moderator input; the session is unaffected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The chat platform rejected or failed a request
    #[error("chat platform error: {0}")]
    TransientPlatform(#[from] ChatError),

    /// The server address (or the channel) is already bound to a session
    #[error("The address {address} is already registered with a channel.")]
    DuplicateRegistration {
        /// Address that was requested
        address: String,
    },
}

/// User-facing validation failures.
///
/// The display text of each variant is sent back verbatim to the moderator
/// who issued the command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Announcement spec without a space between duration and message
    #[error("no space in passed command")]
    InvalidFormat,

    /// The duration token could not be parsed
    #[error("invalid time format, use the format '3h50m', '3h' or '30m'")]
    InvalidDuration,

    /// Announcement delays below one minute are rejected
    #[error("announcement delay must be at least one minute")]
    DurationTooShort,

    /// Announcement or ban index does not exist
    #[error("invalid index: {0}")]
    IndexOutOfRange(usize),

    /// No econ password is configured for the requested address
    #[error("unknown server address")]
    UnknownServer,

    /// Generic argument problem with a human readable description
    #[error("{0}")]
    InvalidArgument(String),
}

impl BridgeError {
    /// Returns true if this error must abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Configuration(_))
    }
}

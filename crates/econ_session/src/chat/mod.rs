//! Chat platform boundary.
//!
//! The bridge never talks to a concrete chat service directly. Everything it
//! needs (sending, deleting, reacting, role lookup) goes through the
//! [`ChatClient`] capability so sessions can run against any platform, or
//! against the in-process [`MemoryChatClient`] in tests and the console
//! frontend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

pub mod memory;

pub use memory::MemoryChatClient;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a chat channel.
    ChannelId
);
string_id!(
    /// Identifier of a single chat message.
    MessageId
);
string_id!(
    /// Identifier of a guild (the community a channel belongs to).
    GuildId
);

/// A chat user as seen by the bridge.
///
/// `tag` is the stable textual identity (`name#1234`) used for moderator
/// checks; `mention` is the markup that pings the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub tag: String,
    pub mention: String,
}

impl ChatUser {
    /// Builds a user whose mention is derived from the id.
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            mention: format!("<@{id}>"),
            id,
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ChatUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

impl Role {
    /// Markup that mentions every member of this role.
    pub fn mention(&self) -> String {
        format!("<@&{}>", self.id)
    }
}

/// A message stored in a channel's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    pub guild: Option<GuildId>,
    pub author: ChatUser,
    pub content: String,
    pub timestamp: SystemTime,
}

/// Events the platform pushes to the bridge.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A new message was posted in a channel the bridge can see
    MessageCreated(ChatMessage),
}

/// Errors returned by a [`ChatClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),

    #[error("unknown emoji: {0}")]
    UnknownEmoji(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Capability used by sessions to talk to the chat platform.
///
/// All methods may fail transiently. Callers log and retry or skip; a
/// failing chat request never ends a session.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// The user the bridge itself acts as.
    fn current_user(&self) -> ChatUser;

    /// Posts `content` into `channel` and returns the new message id.
    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<MessageId, ChatError>;

    async fn delete_message(&self, channel: &ChannelId, message: &MessageId) -> Result<(), ChatError>;

    /// Deletes several messages in one request. Platforms may reject
    /// messages that are too old for bulk deletion.
    async fn bulk_delete_messages(
        &self,
        channel: &ChannelId,
        messages: &[MessageId],
    ) -> Result<(), ChatError>;

    /// Lists up to `limit` messages of a channel, newest first.
    async fn list_messages(&self, channel: &ChannelId, limit: usize) -> Result<Vec<ChatMessage>, ChatError>;

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        emoji: &str,
    ) -> Result<(), ChatError>;

    /// Lists the users who reacted to `message` with `emoji`, the bridge's own
    /// reaction included.
    async fn list_reactors(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        emoji: &str,
    ) -> Result<Vec<ChatUser>, ChatError>;

    async fn list_roles(&self, guild: &GuildId) -> Result<Vec<Role>, ChatError>;
}

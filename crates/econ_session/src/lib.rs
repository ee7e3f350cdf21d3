//! # Econ Session - Game Server to Chat Bridge
//!
//! Core library of the econ bridge. It connects to the remote console (econ)
//! of game servers, turns their log stream into readable chat messages and
//! lets moderators act on the servers from chat, either with commands or by
//! reacting to forwarded vote and ban messages.
//!
//! ## Architecture Overview
//!
//! * **Bridge** ([`Bridge`]) - owns the shared state and dispatches chat commands
//! * **Sessions** ([`session`]) - one per moderated server, running under its
//!   own cancellation scope
//! * **Classifier** ([`classifier`]) - data-driven line grammar feeding the
//!   player table and ban registry
//! * **Chat** ([`chat`]) - the platform capability plus an in-memory client
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use econ_session::{create_bridge, BridgeConfig, ChannelId, MemoryChatClient};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut config = BridgeConfig::default();
//! config.admin = "admin#0001".to_string();
//! config.servers.insert("127.0.0.1:8303".to_string(), "secret".to_string());
//!
//! let chat = Arc::new(MemoryChatClient::default());
//! let bridge = create_bridge(config, chat);
//! bridge
//!     .moderate(ChannelId::new("general"), None, "127.0.0.1:8303")
//!     .expect("address is configured");
//!
//! bridge.shutdown().await;
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Every session owns a child of the bridge's root token. Cancelling the root
//! stops every session; a failing session only cancels itself. Session tasks
//! run on task trackers so shutdown can wait for them with a bound.

pub use bridge::Bridge;
pub use chat::{ChannelId, ChatClient, ChatError, ChatEvent, ChatMessage, ChatUser, GuildId, MemoryChatClient, MessageId};
pub use config::{BridgeConfig, SessionConfig, Verbosity};
pub use error::{BridgeError, ValidationError};
pub use session::{Command, SessionHandle, SessionState};
pub use utils::{create_bridge, create_memory_bridge};

pub mod announcements;
pub mod bridge;
pub mod chat;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod security;
pub mod session;
pub mod state;
pub mod text;
pub mod utils;

#[cfg(test)]
mod tests;

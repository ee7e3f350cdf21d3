//! Console chat frontend.
//!
//! Runs the bridge against the in-memory chat platform: every stdin line is a
//! chat message of the admin in the console channel, and everything the
//! bridge sends is printed to stdout with its message id so it can be
//! reacted to.
//!
//! Input forms:
//!
//! * `+<emoji> <message id>` - react to a message
//! * anything else - post the line, e.g. `#moderate 127.0.0.1:8303`

use econ_session::{ChannelId, ChatEvent, ChatUser, MemoryChatClient, MessageId};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One parsed line of console input.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput<'a> {
    React { emoji: &'a str, message: &'a str },
    Message(&'a str),
    Empty,
}

impl<'a> ConsoleInput<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ConsoleInput::Empty;
        }
        if let Some(rest) = line.strip_prefix('+') {
            if let Some((emoji, message)) = rest.split_once(char::is_whitespace) {
                let message = message.trim();
                if !emoji.is_empty() && !message.is_empty() && !message.contains(char::is_whitespace) {
                    return ConsoleInput::React { emoji, message };
                }
            }
        }
        ConsoleInput::Message(line)
    }
}

/// Stdin and stdout attached to the memory chat platform.
pub struct ConsoleFrontend {
    chat: Arc<MemoryChatClient>,
    channel: ChannelId,
    user: ChatUser,
}

impl ConsoleFrontend {
    /// Creates a frontend posting as `user` into `channel`.
    pub fn new(chat: Arc<MemoryChatClient>, channel: ChannelId, user: ChatUser) -> Self {
        Self { chat, channel, user }
    }

    /// Handles one input line. Returns the chat event to dispatch, if any.
    pub fn handle_line(&self, line: &str) -> Option<ChatEvent> {
        match ConsoleInput::parse(line) {
            ConsoleInput::Empty => None,
            ConsoleInput::Message(content) => {
                Some(self.chat.post(&self.channel, None, self.user.clone(), content))
            }
            ConsoleInput::React { emoji, message } => {
                let message = MessageId::new(message);
                let channel = self.chat.channel_of(&message).unwrap_or_else(|| self.channel.clone());
                if let Err(e) = self.chat.react(&channel, &message, emoji, self.user.clone()) {
                    println!("! cannot react to {message}: {e}");
                }
                None
            }
        }
    }

    /// Reads stdin until EOF or cancellation, dispatching chat events to
    /// `events`.
    pub async fn run_input(self, events: mpsc::Sender<ChatEvent>, token: CancellationToken) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("console input closed");
                    break;
                }
                Err(e) => {
                    warn!("⚠️ Console input failed: {}", e);
                    break;
                }
            };

            if let Some(event) = self.handle_line(&line) {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Prints every message the bridge sends until cancelled.
pub async fn print_output(mut sent: broadcast::Receiver<econ_session::ChatMessage>, token: CancellationToken) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = sent.recv() => message,
        };
        match message {
            Ok(message) => println!("[{}] #{} {}", message.channel, message.id, message.content),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("⚠️ Console output skipped {} message(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

//! In-process chat platform.
//!
//! Keeps channel histories, reactions and guild roles in memory. Every message
//! the bridge sends is also published on a broadcast channel so frontends and
//! tests can observe output as it happens.

use super::{ChannelId, ChatClient, ChatError, ChatEvent, ChatMessage, ChatUser, GuildId, MessageId, Role};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// Messages older than this cannot be bulk deleted.
const BULK_DELETE_MAX_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

#[derive(Debug)]
struct StoredMessage {
    message: ChatMessage,
    reactions: BTreeMap<String, Vec<ChatUser>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    // oldest first
    channels: HashMap<ChannelId, Vec<StoredMessage>>,
    roles: HashMap<GuildId, Vec<Role>>,
    rejected_emojis: HashSet<String>,
}

/// A [`ChatClient`] that lives entirely in memory.
#[derive(Debug)]
pub struct MemoryChatClient {
    bot: ChatUser,
    inner: Mutex<Inner>,
    sent: broadcast::Sender<ChatMessage>,
}

impl Default for MemoryChatClient {
    fn default() -> Self {
        Self::new(ChatUser::new("0", "econbridge#0000"))
    }
}

impl MemoryChatClient {
    /// Creates an empty platform where the bridge acts as `bot`.
    pub fn new(bot: ChatUser) -> Self {
        let (sent, _) = broadcast::channel(1024);
        Self {
            bot,
            inner: Mutex::new(Inner::default()),
            sent,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to every message sent through [`ChatClient::send_message`].
    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.sent.subscribe()
    }

    /// Stores a message written by a user and returns the matching event.
    pub fn post(
        &self,
        channel: &ChannelId,
        guild: Option<GuildId>,
        author: ChatUser,
        content: &str,
    ) -> ChatEvent {
        ChatEvent::MessageCreated(self.insert_message_at(channel, guild, author, content, SystemTime::now()))
    }

    /// Stores a message with an explicit timestamp.
    pub fn insert_message_at(
        &self,
        channel: &ChannelId,
        guild: Option<GuildId>,
        author: ChatUser,
        content: &str,
        timestamp: SystemTime,
    ) -> ChatMessage {
        let mut inner = self.lock();
        inner.next_id += 1;
        let message = ChatMessage {
            id: MessageId(inner.next_id.to_string()),
            channel: channel.clone(),
            guild,
            author,
            content: content.to_string(),
            timestamp,
        };
        let history = inner.channels.entry(channel.clone()).or_default();
        history.push(StoredMessage {
            message: message.clone(),
            reactions: BTreeMap::new(),
        });
        history.sort_by_key(|stored| stored.message.timestamp);
        message
    }

    /// Adds a user reaction to a stored message.
    pub fn react(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        emoji: &str,
        user: ChatUser,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        let stored = find_message(&mut inner, channel, message)?;
        let users = stored.reactions.entry(emoji.to_string()).or_default();
        if !users.contains(&user) {
            users.push(user);
        }
        Ok(())
    }

    /// Finds the channel a message id belongs to.
    pub fn channel_of(&self, message: &MessageId) -> Option<ChannelId> {
        let inner = self.lock();
        inner.channels.iter().find_map(|(channel, history)| {
            history
                .iter()
                .any(|stored| &stored.message.id == message)
                .then(|| channel.clone())
        })
    }

    /// Replaces the roles of a guild.
    pub fn set_roles(&self, guild: &GuildId, roles: Vec<Role>) {
        self.lock().roles.insert(guild.clone(), roles);
    }

    /// Makes every later reaction with `emoji` fail, as a platform does for
    /// unknown custom emojis.
    pub fn reject_emoji(&self, emoji: &str) {
        self.lock().rejected_emojis.insert(emoji.to_string());
    }

    /// Snapshot of a channel's history, oldest first.
    pub fn messages(&self, channel: &ChannelId) -> Vec<ChatMessage> {
        self.lock()
            .channels
            .get(channel)
            .map(|history| history.iter().map(|stored| stored.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Emojis currently attached to a message, with their reactors.
    pub fn reactions(&self, channel: &ChannelId, message: &MessageId) -> BTreeMap<String, Vec<ChatUser>> {
        let mut inner = self.lock();
        find_message(&mut inner, channel, message)
            .map(|stored| stored.reactions.clone())
            .unwrap_or_default()
    }
}

fn find_message<'a>(
    inner: &'a mut Inner,
    channel: &ChannelId,
    message: &MessageId,
) -> Result<&'a mut StoredMessage, ChatError> {
    inner
        .channels
        .get_mut(channel)
        .ok_or_else(|| ChatError::UnknownChannel(channel.clone()))?
        .iter_mut()
        .find(|stored| &stored.message.id == message)
        .ok_or_else(|| ChatError::UnknownMessage(message.clone()))
}

#[async_trait]
impl ChatClient for MemoryChatClient {
    fn current_user(&self) -> ChatUser {
        self.bot.clone()
    }

    async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<MessageId, ChatError> {
        if content.is_empty() {
            return Err(ChatError::Rejected("cannot send an empty message".to_string()));
        }
        let message = self.insert_message_at(channel, None, self.bot.clone(), content, SystemTime::now());
        let id = message.id.clone();
        // no subscribers is fine
        let _ = self.sent.send(message);
        Ok(id)
    }

    async fn delete_message(&self, channel: &ChannelId, message: &MessageId) -> Result<(), ChatError> {
        let mut inner = self.lock();
        let history = inner
            .channels
            .get_mut(channel)
            .ok_or_else(|| ChatError::UnknownChannel(channel.clone()))?;
        let before = history.len();
        history.retain(|stored| &stored.message.id != message);
        if history.len() == before {
            return Err(ChatError::UnknownMessage(message.clone()));
        }
        Ok(())
    }

    async fn bulk_delete_messages(
        &self,
        channel: &ChannelId,
        messages: &[MessageId],
    ) -> Result<(), ChatError> {
        if messages.is_empty() {
            return Err(ChatError::Rejected("no messages to delete".to_string()));
        }
        let mut inner = self.lock();
        let history = inner
            .channels
            .get_mut(channel)
            .ok_or_else(|| ChatError::UnknownChannel(channel.clone()))?;

        let now = SystemTime::now();
        let too_old = history.iter().any(|stored| {
            messages.contains(&stored.message.id)
                && now
                    .duration_since(stored.message.timestamp)
                    .map(|age| age >= BULK_DELETE_MAX_AGE)
                    .unwrap_or(false)
        });
        if too_old {
            return Err(ChatError::Rejected(
                "messages older than 14 days cannot be bulk deleted".to_string(),
            ));
        }

        history.retain(|stored| !messages.contains(&stored.message.id));
        Ok(())
    }

    async fn list_messages(&self, channel: &ChannelId, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        let inner = self.lock();
        Ok(inner
            .channels
            .get(channel)
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|stored| stored.message.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_reaction(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        emoji: &str,
    ) -> Result<(), ChatError> {
        if self.lock().rejected_emojis.contains(emoji) {
            return Err(ChatError::UnknownEmoji(emoji.to_string()));
        }
        self.react(channel, message, emoji, self.bot.clone())
    }

    async fn list_reactors(
        &self,
        channel: &ChannelId,
        message: &MessageId,
        emoji: &str,
    ) -> Result<Vec<ChatUser>, ChatError> {
        let mut inner = self.lock();
        if inner.rejected_emojis.contains(emoji) {
            return Err(ChatError::UnknownEmoji(emoji.to_string()));
        }
        let stored = find_message(&mut inner, channel, message)?;
        Ok(stored.reactions.get(emoji).cloned().unwrap_or_default())
    }

    async fn list_roles(&self, guild: &GuildId) -> Result<Vec<Role>, ChatError> {
        Ok(self.lock().roles.get(guild).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelId {
        ChannelId::new("100")
    }

    #[tokio::test]
    async fn test_send_and_list_newest_first() {
        let chat = MemoryChatClient::default();
        let mut outbox = chat.subscribe();

        let first = chat.send_message(&channel(), "one").await.unwrap();
        let second = chat.send_message(&channel(), "two").await.unwrap();

        let listed = chat.list_messages(&channel(), 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
        assert_eq!(outbox.recv().await.unwrap().content, "one");
    }

    #[tokio::test]
    async fn test_reactions_include_bot_and_users() {
        let chat = MemoryChatClient::default();
        let id = chat.send_message(&channel(), "vote").await.unwrap();
        chat.add_reaction(&channel(), &id, "🇾").await.unwrap();
        chat.react(&channel(), &id, "🇾", ChatUser::new("7", "mod#0007")).unwrap();

        let reactors = chat.list_reactors(&channel(), &id, "🇾").await.unwrap();
        let tags: Vec<_> = reactors.iter().map(|u| u.tag.as_str()).collect();
        assert_eq!(tags, vec!["econbridge#0000", "mod#0007"]);
    }

    #[tokio::test]
    async fn test_rejected_emoji_fails() {
        let chat = MemoryChatClient::default();
        let id = chat.send_message(&channel(), "vote").await.unwrap();
        chat.reject_emoji(":custom:");
        assert_eq!(
            chat.add_reaction(&channel(), &id, ":custom:").await,
            Err(ChatError::UnknownEmoji(":custom:".to_string()))
        );
    }

    #[tokio::test]
    async fn test_bulk_delete_rejects_old_messages() {
        let chat = MemoryChatClient::default();
        let old = chat.insert_message_at(
            &channel(),
            None,
            chat.current_user(),
            "old",
            SystemTime::now() - Duration::from_secs(15 * 24 * 60 * 60),
        );
        let fresh = chat.send_message(&channel(), "fresh").await.unwrap();

        assert!(chat.bulk_delete_messages(&channel(), &[old.id.clone()]).await.is_err());
        chat.bulk_delete_messages(&channel(), &[fresh]).await.unwrap();
        chat.delete_message(&channel(), &old.id).await.unwrap();
        assert!(chat.messages(&channel()).is_empty());
    }
}

//! Long-running session activities.
//!
//! * [`read_worker`] owns the econ read half and hands lines over one at a time
//! * [`relay_loop`] owns the econ write half and drains the command queue
//! * [`cleanup_loop`] periodically deletes stale chat messages
//!
//! Every loop races its blocking wait against the session token.

use super::Command;
use crate::chat::{ChannelId, ChatClient, GuildId, MessageId};
use crate::connection::econ::{EconReader, EconWriter};
use crate::error::BridgeError;
use crate::security::RateLimiter;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages fetched per cleanup pass.
pub const CLEANUP_BATCH: usize = 100;

/// Moderator mention keywords, plurals first so the longest keyword wins.
const MODERATOR_MENTIONS: [&str; 6] = [
    "@moderators",
    "@mods",
    "@mod",
    "@administrators",
    "@admins",
    "@admin",
];

/// Reads lines and posts them to `handoff`, one in flight at a time.
///
/// The channel is expected to have a capacity of one, so the worker never
/// reads ahead of the classifier by more than a single line. A read error or
/// end of stream is posted as an error and ends the worker.
pub async fn read_worker(
    address: String,
    mut reader: EconReader,
    handoff: mpsc::Sender<Result<String, BridgeError>>,
    token: CancellationToken,
) {
    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read_line() => read,
        };

        let (item, last) = match read {
            Ok(Some(line)) => (Ok(line), false),
            Ok(None) => (
                Err(BridgeError::ProtocolRead(format!("{address}: connection closed by server"))),
                true,
            ),
            Err(e) => (Err(e), true),
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = handoff.send(item) => {
                if sent.is_err() || last {
                    break;
                }
            }
        }
    }
    debug!("econ reader of {} stopped", address);
}

/// Writes queued commands to the econ connection in FIFO order.
///
/// Each command is preceded by its attribution echo. A failed write is fatal
/// for the session: the token is cancelled so the owning loop starts draining.
pub async fn relay_loop(
    address: String,
    mut writer: EconWriter,
    mut commands: mpsc::Receiver<Command>,
    token: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = token.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let text = command.text.trim();
        if text.is_empty() {
            continue;
        }

        debug!("relaying '{}' from {} to {}", text, command.author, address);
        let written = match writer.write_line(&command.attribution()).await {
            Ok(()) => writer.write_line(text).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!("❌ Relay to {} failed: {}", address, e);
            token.cancel();
            break;
        }
    }
    writer.close().await;
    debug!("command relay of {} stopped", address);
}

/// Cleanup policy of one channel.
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    /// Time between passes
    pub interval: Duration,
    /// Messages older than this are deleted
    pub retention: Duration,
    /// Messages younger than this may be bulk deleted
    pub bulk_window: Duration,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
    /// Bulk deletion failed and nothing was left to delete one by one
    pub exhausted: bool,
}

/// Deletes stale messages of `channel` every `policy.interval` until cancelled
/// or until bulk deletion fails without manual fallback.
pub async fn cleanup_loop(
    address: String,
    chat: Arc<dyn ChatClient>,
    channel: ChannelId,
    policy: CleanupPolicy,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = cleanup_pass(chat.as_ref(), &channel, &policy).await;
        if report.deleted > 0 || report.failed > 0 {
            info!(
                "🧹 Cleanup of {} removed {} message(s), {} failed",
                address, report.deleted, report.failed
            );
        }
        if report.exhausted {
            warn!("⚠️ Stopping message cleanup of {}: bulk deletion is not possible", address);
            break;
        }
    }
    debug!("cleanup loop of {} stopped", address);
}

/// Runs a single cleanup pass over the newest [`CLEANUP_BATCH`] messages.
pub async fn cleanup_pass(chat: &dyn ChatClient, channel: &ChannelId, policy: &CleanupPolicy) -> CleanupReport {
    let mut report = CleanupReport::default();

    let messages = match chat.list_messages(channel, CLEANUP_BATCH).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!("⚠️ Listing messages of channel {} failed: {}", channel, e);
            return report;
        }
    };

    let now = SystemTime::now();
    let mut bulk: Vec<MessageId> = Vec::new();
    let mut manual: Vec<MessageId> = Vec::new();
    for message in messages {
        let age = now.duration_since(message.timestamp).unwrap_or_default();
        if age <= policy.retention {
            continue;
        }
        if age < policy.bulk_window {
            bulk.push(message.id);
        } else {
            manual.push(message.id);
        }
    }

    if !bulk.is_empty() {
        match chat.bulk_delete_messages(channel, &bulk).await {
            Ok(()) => report.deleted += bulk.len(),
            Err(e) => {
                warn!("⚠️ Bulk deleting {} message(s) failed: {}", bulk.len(), e);
                report.failed += bulk.len();
                if manual.is_empty() {
                    report.exhausted = true;
                    return report;
                }
            }
        }
    }

    for id in manual {
        match chat.delete_message(channel, &id).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                debug!("deleting message {} failed: {}", id, e);
                report.failed += 1;
            }
        }
    }
    report
}

/// Finds the moderator mention of a forwarded chat line.
///
/// Only public chat lines are considered and the mention must be part of the
/// message text. The last mention in the line wins. Returns the byte offset of
/// the mention in `line` and the matched keyword.
pub fn find_moderator_mention(line: &str) -> Option<(usize, &'static str)> {
    let body = line.strip_prefix("[chat]: ")?;
    let text_start = "[chat]: ".len() + body.find("': ")? + 3;
    let text = &line[text_start..];

    text.char_indices()
        .rev()
        .filter(|(_, c)| *c == '@')
        .find_map(|(idx, _)| {
            MODERATOR_MENTIONS
                .iter()
                .find(|keyword| text[idx..].starts_with(*keyword))
                .map(|keyword| (text_start + idx, *keyword))
        })
}

fn splice(line: &str, at: usize, mention: &str, replacement: &str) -> String {
    format!("{}{}{}", &line[..at], replacement, &line[at + mention.len()..])
}

/// Rewrites the moderator mention of `line`.
///
/// While the limiter allows it, the mention is replaced with the mention of
/// the first role whose name contains `role`. During the cooldown the mention
/// is rendered bold instead. Other mentions in the line stay untouched.
pub async fn replace_moderator_mentions(
    line: String,
    chat: &dyn ChatClient,
    limiter: &RateLimiter,
    guild: Option<&GuildId>,
    role: Option<&str>,
) -> String {
    let Some((at, mention)) = find_moderator_mention(&line) else {
        return line;
    };

    if !limiter.allow() {
        return splice(&line, at, mention, &format!("**{mention}**"));
    }

    let (Some(guild), Some(role)) = (guild, role.filter(|r| !r.is_empty())) else {
        return line;
    };

    match chat.list_roles(guild).await {
        Ok(roles) => match roles.iter().find(|r| r.name.contains(role)) {
            Some(found) => splice(&line, at, mention, &found.mention()),
            None => line,
        },
        Err(e) => {
            warn!("⚠️ Looking up roles of guild {} failed: {}", guild, e);
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatUser, MemoryChatClient, Role};
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn policy() -> CleanupPolicy {
        CleanupPolicy {
            interval: Duration::from_secs(120),
            retention: 24 * HOUR,
            bulk_window: 14 * 24 * HOUR - Duration::from_secs(60),
        }
    }

    #[test]
    fn test_find_moderator_mention() {
        assert_eq!(find_moderator_mention("[chat]: 1:'Foo': help @mods please"), Some((22, "@mods")));
        assert_eq!(
            find_moderator_mention("[chat]: 1:'Foo': @admin and @moderators"),
            Some((28, "@moderators"))
        );
        assert_eq!(find_moderator_mention("[chat]: 1:'Foo': @administrators"), Some((17, "@administrators")));
        assert_eq!(find_moderator_mention("[teamchat]: 1:'Foo': @mods"), None);
        assert_eq!(find_moderator_mention("[chat]: 1:'@mod': hello"), None);
        assert_eq!(find_moderator_mention("[chat]: 1:'Foo': mail me@home"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mention_replaced_then_bold_during_cooldown() {
        let chat = MemoryChatClient::default();
        let guild = GuildId::new("g");
        chat.set_roles(
            &guild,
            vec![
                Role { id: "1".into(), name: "Players".into() },
                Role { id: "2".into(), name: "Server Moderators".into() },
            ],
        );
        let limiter = RateLimiter::new(Duration::from_secs(60));

        let first = replace_moderator_mentions(
            "[chat]: 1:'Foo': @mods help".to_string(),
            &chat,
            &limiter,
            Some(&guild),
            Some("Moderator"),
        )
        .await;
        assert_eq!(first, "[chat]: 1:'Foo': <@&2> help");

        let second = replace_moderator_mentions(
            "[chat]: 1:'Foo': @mods help".to_string(),
            &chat,
            &limiter,
            Some(&guild),
            Some("Moderator"),
        )
        .await;
        assert_eq!(second, "[chat]: 1:'Foo': **@mods** help");

        // lines without a mention leave the cooldown alone
        let fresh = RateLimiter::new(Duration::from_secs(60));
        let plain = replace_moderator_mentions("[chat]: 1:'Foo': hi".to_string(), &chat, &fresh, Some(&guild), None).await;
        assert_eq!(plain, "[chat]: 1:'Foo': hi");
        assert!(fresh.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_the_matched_mention_is_rewritten() {
        let chat = MemoryChatClient::default();
        let guild = GuildId::new("g");
        chat.set_roles(&guild, vec![Role { id: "2".into(), name: "Moderators".into() }]);
        let limiter = RateLimiter::new(Duration::from_secs(60));

        let line = "[chat]: 1:'Foo': @moderators help @mod";
        let first =
            replace_moderator_mentions(line.to_string(), &chat, &limiter, Some(&guild), Some("Moderator")).await;
        assert_eq!(first, "[chat]: 1:'Foo': @moderators help <@&2>");

        let second =
            replace_moderator_mentions(line.to_string(), &chat, &limiter, Some(&guild), Some("Moderator")).await;
        assert_eq!(second, "[chat]: 1:'Foo': @moderators help **@mod**");
    }

    #[tokio::test]
    async fn test_mention_without_role_is_kept() {
        let chat = MemoryChatClient::default();
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let line = replace_moderator_mentions("[chat]: 1:'Foo': @admin".to_string(), &chat, &limiter, None, None).await;
        assert_eq!(line, "[chat]: 1:'Foo': @admin");
    }

    #[tokio::test]
    async fn test_cleanup_pass_splits_bulk_and_manual() {
        let chat = MemoryChatClient::default();
        let channel = ChannelId::new("c");
        let author = ChatUser::new("1", "someone#0001");
        let now = SystemTime::now();

        chat.insert_message_at(&channel, None, author.clone(), "fresh", now - HOUR);
        chat.insert_message_at(&channel, None, author.clone(), "day old", now - 25 * HOUR);
        chat.insert_message_at(&channel, None, author.clone(), "ancient", now - 20 * 24 * HOUR);

        let report = cleanup_pass(&chat, &channel, &policy()).await;
        assert_eq!(report, CleanupReport { deleted: 2, failed: 0, exhausted: false });

        let left: Vec<String> = chat.messages(&channel).into_iter().map(|m| m.content).collect();
        assert_eq!(left, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_cleanup_pass_exhausted_without_fallback() {
        let chat = MemoryChatClient::default();
        let channel = ChannelId::new("c");
        let author = ChatUser::new("1", "someone#0001");
        chat.insert_message_at(&channel, None, author.clone(), "day old", SystemTime::now() - 25 * HOUR);

        // the memory client refuses to bulk delete messages older than 14 days
        let strict = CleanupPolicy {
            bulk_window: 30 * 24 * HOUR,
            retention: Duration::ZERO,
            ..policy()
        };
        chat.insert_message_at(&channel, None, author.clone(), "too old", SystemTime::now() - 15 * 24 * HOUR);

        let report = cleanup_pass(&chat, &channel, &strict).await;
        assert!(report.exhausted);
        assert_eq!(chat.messages(&channel).len(), 2);
    }
}

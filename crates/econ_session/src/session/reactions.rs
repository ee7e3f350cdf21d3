//! Reaction-driven approval flows.
//!
//! A flow attaches reaction affordances to a message the session just sent and
//! then polls the reactors until a moderator reacts, a deadline passes or the
//! session is cancelled. If the platform rejects a configured emoji, the emoji
//! set is reset to its defaults once and the operation is retried.

use super::core::SessionContext;
use super::{Command, SessionHandle};
use crate::chat::{ChatError, ChatUser, MessageId};
use crate::error::BridgeError;
use crate::state::{Ban, Player};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attempts to re-associate a ban issued by address with the player snapshot.
pub const SET_PLAYER_RETRIES: usize = 10;

/// Decision a moderator took on a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDecision {
    Yes,
    No,
    Ban,
}

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns false on cancellation.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Adds every emoji in order, returning the first failure after trying all.
async fn attach(ctx: &SessionContext, session: &SessionHandle, message: &MessageId, emojis: &[&str]) -> Result<(), ChatError> {
    let mut first_error = None;
    for emoji in emojis {
        if let Err(e) = ctx.chat.add_reaction(session.channel(), message, emoji).await {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// The first moderator among `users`, ignoring the bridge's own reaction.
fn first_moderator(ctx: &SessionContext, users: Vec<ChatUser>) -> Option<ChatUser> {
    let bot = ctx.chat.current_user();
    users
        .into_iter()
        .find(|user| user.id != bot.id && ctx.moderators.contains(&user.tag))
}

async fn poll_vote(
    ctx: &SessionContext,
    session: &SessionHandle,
    message: &MessageId,
) -> Result<Option<(VoteDecision, ChatUser)>, ChatError> {
    let emojis = ctx.emojis.get();
    let channel = session.channel();

    let yes = ctx.chat.list_reactors(channel, message, &emojis.vote_yes).await?;
    let no = ctx.chat.list_reactors(channel, message, &emojis.vote_no).await?;
    let ban = ctx.chat.list_reactors(channel, message, &emojis.ban).await?;

    for (decision, users) in [(VoteDecision::Yes, yes), (VoteDecision::No, no), (VoteDecision::Ban, ban)] {
        if let Some(moderator) = first_moderator(ctx, users) {
            return Ok(Some((decision, moderator)));
        }
    }
    Ok(None)
}

/// Lets moderators force or punish a running vote through reactions.
///
/// Polls every `poll_interval` until the vote window closes. The first
/// moderator reaction decides; no further polling happens afterwards.
///
/// # Arguments
///
/// * `ctx` - Shared bridge state
/// * `session` - Session the vote runs on
/// * `message` - Chat message announcing the vote
/// * `voter` - Player who started the vote
pub async fn vote_assist(ctx: SessionContext, session: Arc<SessionHandle>, message: MessageId, voter: Player) {
    let token = session.token().clone();

    let emojis = ctx.emojis.get();
    if let Err(e) = attach(&ctx, &session, &message, &[&emojis.vote_yes, &emojis.vote_no, &emojis.ban]).await {
        warn!(
            "⚠️ Vote emojis '{}', '{}', '{}' were rejected ({}), resetting to defaults",
            emojis.vote_yes, emojis.vote_no, emojis.ban, e
        );
        ctx.emojis.reset_defaults();
        let emojis = ctx.emojis.get();
        if let Err(e) = attach(&ctx, &session, &message, &[&emojis.vote_yes, &emojis.vote_no, &emojis.ban]).await {
            warn!("⚠️ Default vote emojis were rejected as well: {}", e);
        }
    }

    let deadline = Instant::now() + ctx.config.vote_window;
    loop {
        if !pause(&token, ctx.config.poll_interval).await {
            return;
        }
        if Instant::now() > deadline {
            debug!("vote window on {} closed without moderator reaction", session.address());
            return;
        }

        let polled = match poll_vote(&ctx, &session, &message).await {
            Ok(polled) => polled,
            Err(e) => {
                warn!("⚠️ Reading vote reactions failed ({}), resetting emojis to defaults", e);
                ctx.emojis.reset_defaults();
                poll_vote(&ctx, &session, &message).await.unwrap_or_else(|e| {
                    debug!("reading vote reactions failed again: {}", e);
                    None
                })
            }
        };

        if let Some((decision, moderator)) = polled {
            info!(
                "🗳️ {} decided {:?} on vote of '{}' on {}",
                moderator.tag,
                decision,
                voter.name,
                session.address()
            );
            if let Err(e) = execute_vote(&ctx, &session, decision, &moderator, &voter).await {
                warn!("⚠️ Executing vote decision on {} failed: {}", session.address(), e);
            }
            return;
        }
    }
}

/// Relays the commands for a vote decision.
pub async fn execute_vote(
    ctx: &SessionContext,
    session: &SessionHandle,
    decision: VoteDecision,
    moderator: &ChatUser,
    voter: &Player,
) -> Result<(), BridgeError> {
    let author = moderator.tag.as_str();
    match decision {
        VoteDecision::Yes => session.enqueue(Command::new(author, "vote yes")).await,
        VoteDecision::No => session.enqueue(Command::new(author, "vote no")).await,
        VoteDecision::Ban => {
            let online = session.players().player_by_address(&voter.address);
            if online.is_online() {
                session
                    .enqueue(Command::new(author, ctx.config.ban_id(online.id)))
                    .await?;
                return session.enqueue(Command::new(author, "vote no")).await;
            }

            if voter.address.is_empty() {
                warn!("⚠️ Vote initiator on {} has no known address, only cancelling the vote", session.address());
                return session.enqueue(Command::new(author, "vote no")).await;
            }

            session
                .enqueue(Command::new(author, ctx.config.ban_address(&voter.address)))
                .await?;
            session.enqueue(Command::new(author, "vote no")).await?;

            for _ in 0..SET_PLAYER_RETRIES {
                if !pause(session.token(), ctx.config.poll_interval).await {
                    break;
                }
                if session.bans().set_player_afterwards(voter) {
                    break;
                }
            }
            Ok(())
        }
    }
}

/// Lets moderators revert a ban through a reaction.
///
/// The ban is correlated with its registry entry by player name and reason.
/// Polling ends when the ban expires or disappears from the registry, or when
/// a moderator reacts, in which case the unban is relayed.
pub async fn unban_assist(ctx: SessionContext, session: Arc<SessionHandle>, message: MessageId, ban: Ban) {
    let Some(tracked) = session.bans().find_by_name_and_reason(&ban.player.name, &ban.reason) else {
        debug!("ban of '{}' is not in the registry, skipping unban tracking", ban.player.name);
        return;
    };
    let token = session.token().clone();

    let emoji = ctx.emojis.get().unban;
    if let Err(e) = ctx.chat.add_reaction(session.channel(), &message, &emoji).await {
        warn!("⚠️ Unban emoji '{}' was rejected ({}), resetting to defaults", emoji, e);
        ctx.emojis.reset_defaults();
        let emoji = ctx.emojis.get().unban;
        if let Err(e) = ctx.chat.add_reaction(session.channel(), &message, &emoji).await {
            warn!("⚠️ Default unban emoji was rejected as well: {}", e);
        }
    }

    loop {
        if tracked.expired() {
            break;
        }
        if !pause(&token, ctx.config.poll_interval).await {
            return;
        }
        if session
            .bans()
            .find_by_name_and_reason(&tracked.player.name, &tracked.reason)
            .is_none()
        {
            break;
        }

        let emoji = ctx.emojis.get().unban;
        let reactors = match ctx.chat.list_reactors(session.channel(), &message, &emoji).await {
            Ok(reactors) => reactors,
            Err(e) => {
                debug!("reading unban reactions on {} failed: {}", session.address(), e);
                continue;
            }
        };

        if let Some(moderator) = first_moderator(&ctx, reactors) {
            info!(
                "🔓 {} lifted the ban of '{}' on {}",
                moderator.tag,
                tracked.player.name,
                session.address()
            );
            let command = Command::new(moderator.tag, format!("unban {}", tracked.player.address));
            if let Err(e) = session.enqueue(command).await {
                warn!("⚠️ Relaying unban on {} failed: {}", session.address(), e);
            }
            return;
        }
    }
    debug!("stopped unban tracking of '{}' on {}", tracked.player.name, session.address());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChannelId, ChatClient, MemoryChatClient};
    use crate::config::SessionConfig;
    use crate::connection::ChannelRegistry;
    use crate::security::{EmojiSet, Emojis, UserSet};
    use crate::state::NotifyRegistry;
    use tokio::sync::mpsc;

    struct Fixture {
        chat: Arc<MemoryChatClient>,
        ctx: SessionContext,
        session: Arc<SessionHandle>,
        commands: mpsc::Receiver<Command>,
        message: MessageId,
    }

    fn moderator() -> ChatUser {
        ChatUser::new("7", "mod#0007")
    }

    async fn fixture() -> Fixture {
        let chat = Arc::new(MemoryChatClient::default());
        let config = SessionConfig::default();
        let root = CancellationToken::new();
        let (session, commands) = SessionHandle::new("10.0.0.1:8303", ChannelId::new("c"), None, &config, &root);
        let message = chat.send_message(session.channel(), "vote").await.unwrap();

        let ctx = SessionContext {
            chat: chat.clone(),
            registry: Arc::new(ChannelRegistry::new()),
            notify: Arc::new(NotifyRegistry::new()),
            moderators: Arc::new(UserSet::from_iter(["mod#0007"])),
            spied: Arc::new(UserSet::new()),
            emojis: Arc::new(EmojiSet::new(Emojis::default())),
            config: Arc::new(config),
        };
        Fixture {
            chat,
            ctx,
            session,
            commands,
            message,
        }
    }

    fn voter() -> Player {
        Player {
            id: 4,
            name: "Voter".to_string(),
            address: "1.2.3.4".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_yes_by_moderator() {
        let mut fx = fixture().await;
        let flow = tokio::spawn(vote_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), voter()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let yes = fx.ctx.emojis.get().vote_yes;
        // non moderators are ignored
        fx.chat
            .react(fx.session.channel(), &fx.message, &yes, ChatUser::new("8", "player#0008"))
            .unwrap();
        fx.chat.react(fx.session.channel(), &fx.message, &yes, moderator()).unwrap();

        flow.await.unwrap();
        assert_eq!(fx.commands.recv().await.unwrap(), Command::new("mod#0007", "vote yes"));
        assert!(fx.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_window_is_a_hard_deadline() {
        let mut fx = fixture().await;
        let flow = tokio::spawn(vote_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), voter()));

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(flow.is_finished());

        let no = fx.ctx.emojis.get().vote_no;
        fx.chat.react(fx.session.channel(), &fx.message, &no, moderator()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fx.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_emoji_resets_to_defaults() {
        let mut fx = fixture().await;
        fx.ctx.emojis = Arc::new(EmojiSet::new(Emojis {
            vote_yes: "custom".to_string(),
            ..Emojis::default()
        }));
        fx.chat.reject_emoji("custom");

        let flow = tokio::spawn(vote_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), voter()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fx.ctx.emojis.get(), Emojis::default());

        let reactions = fx.chat.reactions(fx.session.channel(), &fx.message);
        assert!(reactions.contains_key(&Emojis::default().vote_yes));

        fx.chat
            .react(fx.session.channel(), &fx.message, &Emojis::default().vote_no, moderator())
            .unwrap();
        flow.await.unwrap();
        assert_eq!(fx.commands.recv().await.unwrap().text, "vote no");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_of_offline_voter_uses_address() {
        let mut fx = fixture().await;
        let ban_emoji = fx.ctx.emojis.get().ban;
        fx.chat.react(fx.session.channel(), &fx.message, &ban_emoji, moderator()).unwrap();

        let flow = tokio::spawn(vote_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), voter()));

        assert_eq!(
            fx.commands.recv().await.unwrap().text,
            "ban 1.2.3.4 10 forbidden vote"
        );
        assert_eq!(fx.commands.recv().await.unwrap().text, "vote no");

        // the server confirms the ban by address before the name is known
        fx.session
            .bans()
            .ban(Player::unknown_with_address("1.2.3.4"), Duration::from_secs(600), "forbidden vote");
        flow.await.unwrap();
        assert_eq!(fx.session.bans().get(0).unwrap().player.name, "Voter");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_of_online_voter_uses_slot() {
        let mut fx = fixture().await;
        fx.session.players().join(voter());
        let ban_emoji = fx.ctx.emojis.get().ban;
        fx.chat.react(fx.session.channel(), &fx.message, &ban_emoji, moderator()).unwrap();

        vote_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), voter()).await;

        assert_eq!(fx.commands.recv().await.unwrap().text, "ban 4 10 forbidden vote");
        assert_eq!(fx.commands.recv().await.unwrap().text, "vote no");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban_by_moderator_reaction() {
        let mut fx = fixture().await;
        let ban = fx.session.bans().ban(voter(), Duration::from_secs(600), "spam");

        let flow = tokio::spawn(unban_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), ban));
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let unban = fx.ctx.emojis.get().unban;
        fx.chat.react(fx.session.channel(), &fx.message, &unban, moderator()).unwrap();
        flow.await.unwrap();

        assert_eq!(fx.commands.recv().await.unwrap(), Command::new("mod#0007", "unban 1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban_tracking_ends_on_expiry() {
        let fx = fixture().await;
        let ban = fx.session.bans().ban(voter(), Duration::from_secs(5), "spam");

        let flow = tokio::spawn(unban_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), ban));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(flow.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_flows() {
        let fx = fixture().await;
        let ban = fx.session.bans().ban(voter(), Duration::from_secs(3600), "spam");
        let unban = tokio::spawn(unban_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), ban));
        let vote = tokio::spawn(vote_assist(fx.ctx.clone(), fx.session.clone(), fx.message.clone(), voter()));

        fx.session.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(unban.is_finished());
        assert!(vote.is_finished());
    }
}

//! Chat command handlers.
//!
//! Every handler returns the reply to post in the invoking channel, `None`
//! if nothing should be posted, or an error whose description is posted
//! instead. Commands that act on a server need the channel to be bound to a
//! session.

use super::core::Bridge;
use crate::chat::ChatMessage;
use crate::error::{BridgeError, ValidationError};
use crate::session::{Command, SessionHandle};
use crate::state::Player;
use crate::text::{format_duration, parse_duration, wrap_in_inline_code};
use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reply of a command handler.
pub type Reply = Result<Option<String>, BridgeError>;

/// Attempts to attach the banned player to the new ban entries.
const SET_PLAYER_RETRIES: usize = 10;

const BULK_BAN_USAGE: &str =
    "invalid argument syntax, expected: #bulkmultiban 123.0.0.1 123.0.0.2 123.0.0.3 [...] 1h5m reason for ban";

/// Everything a handler needs about the invoking message.
pub struct CommandContext<'a> {
    pub bridge: &'a Bridge,
    pub message: &'a ChatMessage,
    /// Session bound to the message's channel, if any
    pub session: Option<Arc<SessionHandle>>,
}

impl CommandContext<'_> {
    fn author(&self) -> &str {
        &self.message.author.tag
    }

    fn session(&self) -> Result<&Arc<SessionHandle>, BridgeError> {
        self.session.as_ref().ok_or_else(|| {
            ValidationError::InvalidArgument(
                "this channel is not linked to a server, use #moderate <address> first.".to_string(),
            )
            .into()
        })
    }
}

/// Dispatches a `?` command of a moderator.
pub async fn moderator_command(ctx: &CommandContext<'_>, command: &str, args: &str) -> Reply {
    if command.is_empty() {
        return Ok(None);
    }
    if !ctx.bridge.moderator_commands().contains(command) {
        return Ok(Some(format!("invalid command: {command}")));
    }

    match command {
        "help" => help(ctx),
        "status" => status(ctx),
        "bans" => bans(ctx),
        "multiban" => multiban(ctx, args).await,
        "multiunban" => multiunban(ctx, args).await,
        "notify" => notify(ctx, args),
        "unnotify" => unnotify(ctx),
        "whois" => whois(ctx, args),
        _ => relay(ctx, command, args).await,
    }
}

/// Dispatches a `#` command of the admin.
pub async fn admin_command(ctx: &CommandContext<'_>, command: &str, args: &str) -> Reply {
    match command {
        "" => Ok(None),
        "help" => help(ctx),
        "status" => status(ctx),
        "bans" => bans(ctx),
        "multiban" => multiban(ctx, args).await,
        "multiunban" => multiunban(ctx, args).await,
        "notify" => notify(ctx, args),
        "unnotify" => unnotify(ctx),
        "whois" => whois(ctx, args),
        "ips" => ips(ctx, args),
        "announce" => announce(ctx, args),
        "unannounce" => unannounce(ctx, args),
        "announcements" => announcements(ctx),
        "add" => add_moderator(ctx, args),
        "remove" => remove_moderator(ctx, args),
        "purge" => purge_moderators(ctx),
        "clean" => clean(ctx).await,
        "moderate" => moderate(ctx, args),
        "spy" => spy(ctx, args),
        "unspy" => unspy(ctx, args),
        "purgespy" => purge_spy(ctx),
        "execute" => execute(ctx, args).await,
        "bulkmultiban" => bulk_multiban(ctx, args).await,
        _ => relay(ctx, command, args).await,
    }
}

fn help(ctx: &CommandContext<'_>) -> Reply {
    let mut out = String::from("Available Commands: \n```");
    for command in ctx.bridge.moderator_commands().users() {
        let _ = writeln!(out, "?{command}");
    }
    out.push_str("```Moderators:\n```");
    for moderator in ctx.bridge.moderators().users() {
        let _ = writeln!(out, "{moderator}");
    }
    out.push_str("```");
    Ok(Some(out))
}

fn status(ctx: &CommandContext<'_>) -> Reply {
    let players = ctx.session()?.players().status();
    if players.is_empty() {
        return Ok(Some("There are currently no players online.".to_string()));
    }

    let mut out = String::with_capacity(64 * players.len());
    for player in players {
        let _ = writeln!(
            out,
            "{:>4} id={:<4} v={:<5} {:<22} {:<18}",
            player.country,
            wrap_in_inline_code(&player.id.to_string()),
            wrap_in_inline_code(&format!("{:x}", player.version)),
            wrap_in_inline_code(&player.name),
            wrap_in_inline_code(&player.clan),
        );
    }
    Ok(Some(out))
}

fn bans(ctx: &CommandContext<'_>) -> Reply {
    let bans = ctx.session()?.bans();
    if bans.is_empty() {
        return Ok(Some("[banlist]: 0 ban(s)".to_string()));
    }
    Ok(Some(format!("[banlist]: {} ban(s)\n```{}```\n", bans.len(), bans)))
}

/// Queues `command` on every active session.
async fn fan_out(ctx: &CommandContext<'_>, command: Command) -> usize {
    let mut queued = 0;
    for session in ctx.bridge.registry().sessions() {
        match session.enqueue(command.clone()).await {
            Ok(()) => queued += 1,
            Err(e) => warn!("⚠️ Could not queue '{}' on {}: {}", command.text, session.address(), e),
        }
    }
    queued
}

/// Re-associates `player` with its new bans on every session, in the
/// background.
fn attach_player_afterwards(ctx: &CommandContext<'_>, player: Player) {
    let sessions = ctx.bridge.registry().sessions();
    let token = ctx.bridge.token().clone();
    let interval = ctx.bridge.session_config().poll_interval;

    ctx.bridge.tracker().spawn(async move {
        for session in sessions {
            for _ in 0..SET_PLAYER_RETRIES {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if session.bans().set_player_afterwards(&player) {
                    break;
                }
            }
        }
    });
}

async fn multiban(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let session = ctx.session()?;
    let mut tokens = args.splitn(3, ' ');

    let id: i32 = match tokens.next().and_then(|t| t.parse().ok()) {
        Some(id) if id >= 0 => id,
        _ => return Ok(Some("**[error]**: invalid user ID".to_string())),
    };
    let minutes: u64 = match tokens.next().and_then(|t| t.parse().ok()) {
        Some(minutes) if minutes > 0 => minutes,
        _ => {
            return Ok(Some(
                "**[error]**: invalid minutes argument, please enter an integer.".to_string(),
            ))
        }
    };
    let reason = tokens.next().map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Ok(Some("**[error]**: please pass a ban reason.".to_string()));
    }

    let player = session.players().player(id);
    if player.address.is_empty() {
        return Ok(Some(format!("**[error]**: there is no player with id {id}.")));
    }

    let queued = fan_out(
        ctx,
        Command::new(ctx.author(), format!("ban {} {} {}", player.address, minutes, reason)),
    )
    .await;
    info!("🔨 {} banned '{}' on {} server(s)", ctx.author(), player.name, queued);
    attach_player_afterwards(ctx, player);
    Ok(None)
}

async fn multiunban(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let session = ctx.session()?;
    let index: usize = match args.trim().parse() {
        Ok(index) => index,
        Err(_) => return Ok(Some("**[error]**: invalid ban ID".to_string())),
    };
    let ban = session
        .bans()
        .get(index)
        .ok_or(ValidationError::IndexOutOfRange(index))?;

    let queued = fan_out(ctx, Command::new(ctx.author(), format!("unban {}", ban.player.address))).await;
    info!("🔓 {} unbanned '{}' on {} server(s)", ctx.author(), ban.player.name, queued);
    Ok(None)
}

fn notify(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let nickname = args.trim();
    if nickname.is_empty() {
        return Err(ValidationError::InvalidArgument("please pass a nickname.".to_string()).into());
    }
    let mention = &ctx.message.author.mention;
    ctx.bridge.notify().add(mention, nickname);
    Ok(Some(format!(
        "{mention}'s notification request for '{nickname}' received."
    )))
}

fn unnotify(ctx: &CommandContext<'_>) -> Reply {
    let mention = &ctx.message.author.mention;
    ctx.bridge.notify().remove(mention);
    Ok(Some(format!("Removed all of {mention}'s notification requests.")))
}

fn listing(title: &str, entries: &[String]) -> String {
    let mut out = format!("**{title}**:\n```\n");
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
    out.push_str("```\n");
    out
}

fn whois(ctx: &CommandContext<'_>, args: &str) -> Reply {
    match ctx.bridge.identity().names_observed_with(args.trim()) {
        Ok(names) => Ok(Some(listing("Known nicknames", &names))),
        Err(e) => Ok(Some(e.to_string())),
    }
}

fn ips(ctx: &CommandContext<'_>, args: &str) -> Reply {
    match ctx.bridge.identity().addresses_for(args.trim()) {
        Ok(addresses) => Ok(Some(listing("Known IPs", &addresses))),
        Err(e) => Ok(Some(e.to_string())),
    }
}

fn announce(ctx: &CommandContext<'_>, args: &str) -> Reply {
    ctx.session()?.announcements().add(args)?;
    Ok(Some(format!("registered announcement: {args}")))
}

fn unannounce(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let index: usize = match args.trim().parse() {
        Ok(index) => index,
        Err(_) => return Ok(Some("invalid id argument".to_string())),
    };
    let removed = ctx.session()?.announcements().delete(index)?;
    Ok(Some(format!(
        "Removed: {} {}",
        format_duration(removed.delay),
        removed.message
    )))
}

fn announcements(ctx: &CommandContext<'_>) -> Reply {
    Ok(Some(format!("Announcements:\n{}", ctx.session()?.announcements())))
}

fn add_moderator(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let user = args.trim();
    if user.is_empty() {
        return Err(ValidationError::InvalidArgument("please pass a user.".to_string()).into());
    }
    ctx.bridge.moderators().add(user);
    Ok(Some(format!("Added {user:?} to moderators")))
}

fn remove_moderator(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let user = args.trim();
    ctx.bridge.moderators().remove(user);
    Ok(Some(format!("Removed {user:?} from moderators")))
}

fn purge_moderators(ctx: &CommandContext<'_>) -> Reply {
    let admin = &ctx.bridge.config().admin;
    ctx.bridge.moderators().reset();
    ctx.bridge.moderators().add(admin);
    Ok(Some(format!("Purged all moderators except {admin:?}")))
}

/// Bulk deletes the whole history of the invoking channel.
async fn clean(ctx: &CommandContext<'_>) -> Reply {
    let chat = ctx.bridge.chat();
    let channel = &ctx.message.channel;
    let progress = chat.send_message(channel, "starting channel cleanup...").await?;

    loop {
        let batch: Vec<_> = chat
            .list_messages(channel, 100)
            .await?
            .into_iter()
            .map(|m| m.id)
            .filter(|id| *id != progress)
            .collect();
        if batch.is_empty() {
            break;
        }

        if let Err(e) = chat.bulk_delete_messages(channel, &batch).await {
            warn!("⚠️ Bulk deleting {} message(s) of {} failed: {}", batch.len(), channel, e);
            let _ = chat.delete_message(channel, &progress).await;
            return Ok(Some(
                "The bot does not have enough permissions to cleanup the channel.".to_string(),
            ));
        }
        debug!("cleaned {} message(s) of {}", batch.len(), channel);
    }

    if let Err(e) = chat.delete_message(channel, &progress).await {
        debug!("deleting cleanup progress message failed: {}", e);
    }
    Ok(Some("cleanup done!".to_string()))
}

fn moderate(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let address = args.trim();
    if address.is_empty() {
        return Ok(Some("please pass your server econ address.".to_string()));
    }
    ctx.bridge
        .moderate(ctx.message.channel.clone(), ctx.message.guild.clone(), address)?;
    Ok(None)
}

fn spy(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let nickname = args.trim();
    ctx.bridge.spied().add(nickname);
    Ok(Some(format!("Spying on {nickname:?} ")))
}

fn unspy(ctx: &CommandContext<'_>, args: &str) -> Reply {
    let nickname = args.trim();
    ctx.bridge.spied().remove(nickname);
    Ok(Some(format!("Stopped spying on {nickname:?}")))
}

fn purge_spy(ctx: &CommandContext<'_>) -> Reply {
    ctx.bridge.spied().reset();
    Ok(Some("Purged all spied on players.".to_string()))
}

async fn execute(ctx: &CommandContext<'_>, args: &str) -> Reply {
    ctx.session()?
        .enqueue(Command::new(ctx.author(), args.trim()))
        .await?;
    Ok(None)
}

/// Relays a command verbatim to the channel's server.
async fn relay(ctx: &CommandContext<'_>, command: &str, args: &str) -> Reply {
    let text = if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {args}")
    };
    ctx.session()?.enqueue(Command::new(ctx.author(), text)).await?;
    Ok(None)
}

/// Parsed arguments of `bulkmultiban`.
#[derive(Debug, PartialEq, Eq)]
pub struct BulkBan<'a> {
    pub addresses: Vec<&'a str>,
    pub duration: &'a str,
    pub reason: String,
}

/// Splits `<addr...> <duration> <reason>`. The duration is the last token
/// with a unit (`1h5m`, `30m`) that still has a reason after it, so plain
/// numbers in the reason are left alone.
pub fn parse_bulk_ban(args: &str) -> Option<BulkBan<'_>> {
    let tokens: Vec<&str> = args.split(' ').collect();
    if tokens.len() < 3 {
        return None;
    }

    let at = (1..tokens.len() - 1)
        .rev()
        .find(|&i| parse_duration(tokens[i]).is_some())?;

    Some(BulkBan {
        addresses: tokens[..at].iter().copied().filter(|t| !t.is_empty()).collect(),
        duration: tokens[at],
        reason: tokens[at + 1..].join(" "),
    })
}

async fn bulk_multiban(ctx: &CommandContext<'_>, args: &str) -> Reply {
    ctx.session()?;
    let Some(bulk) = parse_bulk_ban(args.trim()) else {
        return Ok(Some(BULK_BAN_USAGE.to_string()));
    };
    let duration = match parse_duration(bulk.duration) {
        Some(duration) if duration >= Duration::from_secs(60) => duration,
        _ => return Ok(Some(format!("invalid ban duration: {:?}", bulk.duration))),
    };

    let mut valid: Vec<IpAddr> = Vec::new();
    let mut invalid: Vec<&str> = Vec::new();
    for address in &bulk.addresses {
        match address.parse::<IpAddr>() {
            Ok(ip) => valid.push(ip),
            Err(_) => invalid.push(*address),
        }
    }
    invalid.sort_unstable();
    // reverse order so the newest ban of the list ends up first
    valid.sort_unstable_by(|a, b| b.cmp(a));

    let minutes = duration.as_secs() / 60;
    for ip in &valid {
        fan_out(
            ctx,
            Command::new(ctx.author(), format!("ban {} {} {}", ip, minutes, bulk.reason)),
        )
        .await;
    }

    let mut out = format!("**Banned IPs**: {}\n", valid.len());
    if !invalid.is_empty() {
        out.push_str("**Invalid IPs**:\n```\n");
        for address in invalid {
            out.push_str(address);
            out.push('\n');
        }
        out.push_str("```\n");
    }
    Ok(Some(out))
}

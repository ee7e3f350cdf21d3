//! Session orchestration.
//!
//! [`run_session`] drives one session from `Connecting` to `Closed`: it dials
//! the server, spawns the reader, relay and cleanup activities under the
//! session token, classifies every line in arrival order and spawns the
//! reaction flows for votes and bans.

use super::reactions::{unban_assist, vote_assist};
use super::routines::{cleanup_loop, read_worker, relay_loop, replace_moderator_mentions, CleanupPolicy};
use super::{Command, SessionHandle, SessionState};
use crate::chat::ChatClient;
use crate::classifier::{ClassifierContext, LineClassifier, SessionEvent};
use crate::config::SessionConfig;
use crate::connection::econ::EconConnection;
use crate::connection::ChannelRegistry;
use crate::error::BridgeError;
use crate::security::{EmojiSet, UserSet};
use crate::state::NotifyRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Shared state every session reads.
///
/// Built by the bridge; each session gets its own clone.
#[derive(Clone)]
pub struct SessionContext {
    pub chat: Arc<dyn ChatClient>,
    pub registry: Arc<ChannelRegistry>,
    pub notify: Arc<NotifyRegistry>,
    pub moderators: Arc<UserSet>,
    pub spied: Arc<UserSet>,
    pub emojis: Arc<EmojiSet>,
    pub config: Arc<SessionConfig>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("sessions", &self.registry.len())
            .field("moderators", &self.moderators.len())
            .field("verbosity", &self.config.verbosity)
            .finish()
    }
}

impl SessionContext {
    async fn report(&self, session: &SessionHandle, text: &str) {
        if let Err(e) = self.chat.send_message(session.channel(), text).await {
            warn!("⚠️ Failed to report to channel of {}: {}", session.address(), e);
        }
    }
}

/// Runs a session until it is cancelled or its connection fails.
///
/// The session must already be bound in the registry; it unbinds itself
/// before reaching `Closed`.
///
/// # Arguments
///
/// * `session` - Handle created by [`SessionHandle::new`]
/// * `commands` - Receiving end of the session's command queue
/// * `password` - Econ password of the server
/// * `ctx` - Shared bridge state
pub async fn run_session(
    session: Arc<SessionHandle>,
    commands: mpsc::Receiver<Command>,
    password: String,
    ctx: SessionContext,
) {
    let address = session.address().to_string();
    let token = session.token().clone();

    info!("🔌 Connecting to econ of {}", address);
    let dialed = tokio::select! {
        _ = token.cancelled() => Err(BridgeError::Connection(format!("{address}: cancelled while connecting"))),
        dialed = EconConnection::connect(&address, &password, ctx.config.connect_timeout) => dialed,
    };

    let connection = match dialed {
        Ok(connection) => connection,
        Err(e) => {
            error!("❌ Session for {} failed to start: {}", address, e);
            ctx.report(&session, &e.to_string()).await;
            ctx.registry.unbind(&session);
            session.set_state(SessionState::Closed);
            return;
        }
    };

    let (reader, mut writer) = connection.split();
    for command in &ctx.config.initial_commands {
        if let Err(e) = writer.write_line(command).await {
            warn!("⚠️ Initial command '{}' on {} failed: {}", command, address, e);
        }
    }

    session.set_state(SessionState::Active);
    ctx.report(&session, &format!("Started listening to server {address}")).await;
    info!("✅ Session for {} is active", address);

    let tracker = session.tracker();
    let (handoff, mut lines) = mpsc::channel(1);
    tracker.spawn(read_worker(address.clone(), reader, handoff, token.clone()));
    tracker.spawn(relay_loop(address.clone(), writer, commands, token.clone()));
    tracker.spawn(cleanup_loop(
        address.clone(),
        ctx.chat.clone(),
        session.channel().clone(),
        CleanupPolicy {
            interval: ctx.config.cleanup_interval,
            retention: ctx.config.retention,
            bulk_window: ctx.config.bulk_delete_window,
        },
        token.clone(),
    ));

    let classifier = LineClassifier::new(ctx.config.rules.clone());
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = lines.recv() => received,
        };

        // forwarding may wait on the chat platform, which must not delay a stop
        match received {
            Some(Ok(line)) => tokio::select! {
                _ = token.cancelled() => break,
                _ = handle_line(&ctx, &session, &classifier, &line) => {}
            },
            Some(Err(e)) => {
                error!("❌ {}", e);
                let message = e.to_string();
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = ctx.report(&session, &message) => {}
                }
                break;
            }
            None => break,
        }
    }

    drain(&ctx, &session).await;
}

async fn handle_line(ctx: &SessionContext, session: &Arc<SessionHandle>, classifier: &LineClassifier, line: &str) {
    let classification = classifier.classify_raw(
        line,
        &ClassifierContext {
            players: session.players(),
            bans: session.bans(),
            notify: &ctx.notify,
            spied: &ctx.spied,
            verbosity: ctx.config.verbosity,
        },
    );
    if !classification.should_forward() {
        return;
    }

    let text = replace_moderator_mentions(
        classification.text,
        ctx.chat.as_ref(),
        session.mentions(),
        session.guild(),
        ctx.config.moderator_role.as_deref(),
    )
    .await;

    let message = match ctx.chat.send_message(session.channel(), &text).await {
        Ok(message) => message,
        Err(e) => {
            warn!("⚠️ Forwarding line of {} failed: {}", session.address(), e);
            return;
        }
    };

    match classification.event {
        Some(SessionEvent::VoteStarted { voter, .. }) => {
            session
                .tracker()
                .spawn(vote_assist(ctx.clone(), session.clone(), message, voter));
        }
        Some(SessionEvent::BanAdded(ban)) => {
            session
                .tracker()
                .spawn(unban_assist(ctx.clone(), session.clone(), message, ban));
        }
        None => {}
    }
}

async fn drain(ctx: &SessionContext, session: &Arc<SessionHandle>) {
    let address = session.address();
    session.set_state(SessionState::Draining);
    info!("🛑 Draining session for {}", address);

    session.token().cancel();
    let tracker = session.tracker();
    tracker.close();
    if timeout(ctx.config.shutdown_timeout, tracker.wait()).await.is_err() {
        warn!(
            "⚠️ {} task(s) of {} did not stop within {:?}",
            tracker.len(),
            address,
            ctx.config.shutdown_timeout
        );
    }

    ctx.registry.unbind(session);
    let farewell = format!("Stopped listening to server {address}");
    if timeout(ctx.config.shutdown_timeout, ctx.report(session, &farewell)).await.is_err() {
        warn!("⚠️ Final report for {} timed out", address);
    }
    session.set_state(SessionState::Closed);
    debug!("session for {} closed", address);
}

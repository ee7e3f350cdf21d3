//! Recurring in-game announcements.
//!
//! Each announcement runs its own timer loop under a child of the session's
//! cancellation token. A loop only stops when its token is cancelled, either
//! by [`AnnouncementScheduler::delete`] or by session teardown.

use crate::error::ValidationError;
use crate::session::Command;
use crate::text::{format_duration, parse_duration, split_words, SERVER_MESSAGE_WIDTH};
use crate::utils::deadline_after;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Author attributed to announcement broadcasts.
pub const ANNOUNCEMENT_AUTHOR: &str = "announcement";

/// Shortest allowed delay between two broadcasts of an announcement.
pub const MIN_ANNOUNCEMENT_DELAY: Duration = Duration::from_secs(60);

/// A message broadcast in game every `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub delay: Duration,
    pub message: String,
}

impl FromStr for Announcement {
    type Err = ValidationError;

    /// Parses `"<duration> <message>"`, e.g. `"30m visit our website"`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (duration, message) = spec.trim().split_once(' ').ok_or(ValidationError::InvalidFormat)?;
        let delay = parse_duration(duration).ok_or(ValidationError::InvalidDuration)?;
        if delay < MIN_ANNOUNCEMENT_DELAY {
            return Err(ValidationError::DurationTooShort);
        }

        let message = message.trim();
        if message.is_empty() {
            return Err(ValidationError::InvalidFormat);
        }

        Ok(Self {
            delay,
            message: message.to_string(),
        })
    }
}

impl Announcement {
    /// The `say` commands that broadcast this announcement, each within the
    /// in-game line width.
    pub fn commands(&self) -> Vec<Command> {
        split_words(&self.message, SERVER_MESSAGE_WIDTH)
            .into_iter()
            .map(|chunk| Command::new(ANNOUNCEMENT_AUTHOR, format!("say {chunk}")))
            .collect()
    }
}

struct Scheduled {
    announcement: Announcement,
    token: CancellationToken,
}

/// Per-session set of recurring announcements.
pub struct AnnouncementScheduler {
    scope: CancellationToken,
    tracker: TaskTracker,
    queue: mpsc::Sender<Command>,
    entries: Mutex<Vec<Scheduled>>,
}

impl fmt::Debug for AnnouncementScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnouncementScheduler")
            .field("announcements", &self.len())
            .finish()
    }
}

impl AnnouncementScheduler {
    /// Creates a scheduler whose loops live under `scope` and feed `queue`.
    pub fn new(scope: CancellationToken, tracker: TaskTracker, queue: mpsc::Sender<Command>) -> Self {
        Self {
            scope,
            tracker,
            queue,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Scheduled>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses `spec` and starts broadcasting it.
    ///
    /// # Errors
    ///
    /// * [`ValidationError::InvalidFormat`] - no space between duration and message
    /// * [`ValidationError::InvalidDuration`] - unparsable duration
    /// * [`ValidationError::DurationTooShort`] - delay below one minute
    pub fn add(&self, spec: &str) -> Result<Announcement, ValidationError> {
        let announcement: Announcement = spec.parse()?;
        let token = self.scope.child_token();

        self.tracker.spawn(announcement_loop(
            announcement.clone(),
            token.clone(),
            self.queue.clone(),
        ));

        info!("📢 Scheduled announcement every {}", format_duration(announcement.delay));
        self.lock().push(Scheduled {
            announcement: announcement.clone(),
            token,
        });
        Ok(announcement)
    }

    /// Stops and removes the announcement at `index`.
    pub fn delete(&self, index: usize) -> Result<Announcement, ValidationError> {
        let mut entries = self.lock();
        if index >= entries.len() {
            return Err(ValidationError::IndexOutOfRange(index));
        }
        let removed = entries.remove(index);
        removed.token.cancel();
        Ok(removed.announcement)
    }

    /// Snapshot of all announcements in creation order.
    pub fn announcements(&self) -> Vec<Announcement> {
        self.lock().iter().map(|s| s.announcement.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Display for AnnouncementScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, announcement) in self.announcements().iter().enumerate() {
            writeln!(
                f,
                "ID:**{}** Delay:{:>6} Message: {}",
                idx,
                format_duration(announcement.delay),
                announcement.message
            )?;
        }
        Ok(())
    }
}

async fn announcement_loop(
    announcement: Announcement,
    token: CancellationToken,
    queue: mpsc::Sender<Command>,
) {
    let mut ticker = interval_at(deadline_after(announcement.delay), announcement.delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                for command in announcement.commands() {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        sent = queue.send(command) => {
                            if sent.is_err() {
                                debug!("command queue closed, stopping announcement");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
    debug!("announcement '{}' stopped", announcement.message);
}

//! Factory functions for bridge instances and small shared helpers.

use crate::{bridge::Bridge, chat::ChatClient, chat::MemoryChatClient, config::BridgeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for deadlines computed from untrusted durations (30 years).
pub const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Creates a shared bridge reporting to `chat`.
///
/// # Arguments
///
/// * `config` - Bridge configuration
/// * `chat` - Chat platform client
///
/// # Returns
///
/// The bridge, ready for [`Bridge::run`] and [`Bridge::moderate`].
pub fn create_bridge(config: BridgeConfig, chat: Arc<dyn ChatClient>) -> Arc<Bridge> {
    Arc::new(Bridge::new(config, chat))
}

/// Creates a bridge backed by a fresh in-memory chat platform.
///
/// The memory client is returned as well so the caller can post messages,
/// add reactions and observe what the bridge sends.
pub fn create_memory_bridge(config: BridgeConfig) -> (Arc<Bridge>, Arc<MemoryChatClient>) {
    let chat = Arc::new(MemoryChatClient::default());
    (create_bridge(config, chat.clone()), chat)
}

/// Returns `now + duration`, clamped to [`FAR_FUTURE`].
///
/// Durations come from server log lines and chat commands and may be large
/// enough to overflow `Instant`.
pub fn deadline_after(duration: Duration) -> Instant {
    Instant::now() + duration.min(FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_clamps_huge_durations() {
        let now = Instant::now();
        assert_eq!(deadline_after(Duration::from_secs(60)), now + Duration::from_secs(60));
        assert_eq!(deadline_after(Duration::MAX), now + FAR_FUTURE);
    }
}

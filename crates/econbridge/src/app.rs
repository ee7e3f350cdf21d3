//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that orchestrates bridge
//! startup, the console frontend, and graceful shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    frontend::{print_output, ConsoleFrontend},
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use econ_session::{create_bridge, Bridge, ChannelId, ChatUser, MemoryChatClient};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Capacity of the queue between the chat frontend and the bridge.
const EVENT_QUEUE_SIZE: usize = 64;

/// Main application struct.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from files and CLI
/// * **Bridge Orchestration**: Builds the bridge on top of the in-memory chat platform
/// * **Console Frontend**: Feeds stdin into the chat and prints what the bridge sends
/// * **Graceful Shutdown**: Drains every session on termination signals
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Chat platform shared with the console frontend
    chat: Arc<MemoryChatClient>,
    /// Bridge instance
    bridge: Arc<Bridge>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` ready to run, or an error if the
    /// configuration could not be loaded or is invalid.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the bridge
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(verbosity) = args.verbosity {
            config.session.verbosity = verbosity;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let bridge_config = config.to_bridge_config()?;
        let chat = Arc::new(MemoryChatClient::default());
        let bridge = create_bridge(bridge_config, chat.clone());

        Ok(Self { config, chat, bridge })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Runs the bridge until a shutdown signal arrives.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a graceful shutdown, or an error if signal handling
    /// could not be set up.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting econ bridge");
        self.log_configuration_summary();

        let frontend_token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let bridge_handle = {
            let bridge = self.bridge.clone();
            tokio::spawn(async move { bridge.run(events_rx).await })
        };

        let output_handle = tokio::spawn(print_output(self.chat.subscribe(), frontend_token.clone()));

        let frontend = ConsoleFrontend::new(
            self.chat.clone(),
            ChannelId::new(self.config.chat.channel.clone()),
            ChatUser::new("1", self.config.chat.admin.clone()),
        );
        let input_handle = tokio::spawn(frontend.run_input(events_tx, frontend_token.clone()));

        info!("✅ Econ bridge is now running!");
        info!(
            "🎮 Type `#moderate <address>` to attach a server to channel '{}'",
            self.config.chat.channel
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        input_handle.abort();

        if self.bridge.shutdown().await {
            info!("✅ All sessions drained");
        } else {
            warn!("⏰ Timeout reached, proceeding with shutdown (some sessions did not finish)");
        }

        frontend_token.cancel();
        if let Err(e) = bridge_handle.await {
            warn!("⚠️ Chat event loop ended abnormally: {}", e);
        }
        let _ = output_handle.await;

        info!("✅ Econ bridge shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  👤 Admin: {}", self.config.chat.admin);
        info!("  🛡️ Moderators: {}", self.bridge.moderators().len());
        info!("  🌐 Servers: {}", self.config.econ.servers.join(", "));
        info!("  📣 Verbosity: {:?}", self.config.session.verbosity);
        info!(
            "  🗳️ Vote window: {}s | poll every {}ms",
            self.config.session.vote_window_secs, self.config.session.poll_interval_ms
        );
        info!(
            "  🧹 Cleanup every {}s, retention {}h",
            self.config.session.cleanup_interval_secs, self.config.session.retention_hours
        );
        info!(
            "  🔎 Nickname tracking: {}",
            if self.bridge.identity().is_enabled() { "enabled" } else { "disabled" }
        );
        info!("  📜 Rules: {} preset + {} extra", self.config.rules.preset, self.config.rules.extra.len());
    }
}

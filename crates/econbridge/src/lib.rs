//! # Econ Bridge - Main Entry Point
//!
//! Connects game server remote consoles to a moderation chat. This entry point
//! handles CLI parsing, configuration loading, logging and the application
//! lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (writes config.toml on first start)
//! econbridge
//!
//! # Specify custom configuration
//! econbridge --config production.toml
//!
//! # Forward joins and leaves, debug logging as JSON
//! econbridge --verbosity 2 --log-level debug --json-logs
//! ```
//!
//! ## Configuration
//!
//! The bridge loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration is written; it lists no
//! servers and no admin, so it has to be edited before the bridge starts.
//!
//! ## Signal Handling
//!
//! The bridge drains every session on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod frontend;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the econ bridge.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
///
/// Called from an async context; the binary owns the runtime.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{ChatSettings, EconSettings, ExtraRule, IdentitySettings, LoggingSettings, RuleSettings, SessionSettings};
pub use frontend::{ConsoleFrontend, ConsoleInput};

#[cfg(test)]
mod tests {
    use super::*;
    use econ_session::Verbosity;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_application_rejects_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("config.toml"),
            log_level: None,
            json_logs: false,
            verbosity: None,
        };

        assert!(Application::new(args.clone()).await.is_err());
        assert!(args.config_path.exists());
    }

    #[tokio::test]
    async fn test_application_creation_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.chat.admin = "admin#0001".to_string();
        config.econ.servers = vec!["127.0.0.1:8303".to_string()];
        config.econ.passwords = vec!["secret".to_string()];
        let toml_content = toml::to_string_pretty(&config).unwrap();
        tokio::fs::write(&path, toml_content).await.unwrap();

        let args = CliArgs {
            config_path: path,
            log_level: Some("debug".to_string()),
            json_logs: false,
            verbosity: Some(Verbosity::Whisper),
        };
        let app = Application::new(args).await.unwrap();
        assert!(app.bridge().config().servers.contains_key("127.0.0.1:8303"));
        assert_eq!(app.bridge().session_config().verbosity, Verbosity::Whisper);
        assert!(app.bridge().moderators().contains("admin#0001"));
    }
}

//! Command-line interface handling for the econ bridge.
//!
//! This module provides command-line argument parsing using the `clap` crate.

use clap::{value_parser, Arg, ArgMatches, Command};
use econ_session::Verbosity;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Every option except the config path overrides a configuration file setting.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the forwarding verbosity
    pub verbosity: Option<Verbosity>,
}

impl CliArgs {
    /// Parses the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list; the first item is the program name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            verbosity: matches
                .get_one::<u8>("verbosity")
                .map(|level| Verbosity::from_level(*level)),
        }
    }
}

fn command() -> Command {
    Command::new("econbridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bridges game server remote consoles to a moderation chat")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .value_name("LEVEL")
                .help("Forwarded lines: 0 chat and votes, 1 adds whispers, 2 adds joins and leaves")
                .value_parser(value_parser!(u8).range(0..=2)),
        )
}

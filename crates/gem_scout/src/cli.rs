//! Command-line interface for the gem scout.
//!
//! Every option here overrides the matching configuration file setting for
//! a single run.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Recorded track to replay instead of the configured one
    pub track: Option<PathBuf>,
    /// Override for the gem service base URL
    pub base_url: Option<String>,
    /// Use this participant id instead of the stored one
    pub participant: Option<String>,
    /// Claim a gem by id and exit
    pub found: Option<String>,
    /// Print the leaderboard and exit
    pub leaderboard: bool,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

fn command() -> Command {
    Command::new("Gem Scout")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Walks a track and unlocks the hidden gems along the way")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("gem_scout.toml"),
        )
        .arg(
            Arg::new("track")
                .short('t')
                .long("track")
                .value_name("FILE")
                .help("JSON track of {lat, lng} points to replay"),
        )
        .arg(
            Arg::new("base-url")
                .short('u')
                .long("base-url")
                .value_name("URL")
                .help("Gem service base URL (e.g., http://127.0.0.1:5000/api)"),
        )
        .arg(
            Arg::new("participant")
                .short('p')
                .long("participant")
                .value_name("ID")
                .help("Participant id to play as"),
        )
        .arg(
            Arg::new("found")
                .long("found")
                .value_name("GEM_ID")
                .help("Claim a gem you are standing at, then exit")
                .conflicts_with("leaderboard"),
        )
        .arg(
            Arg::new("leaderboard")
                .long("leaderboard")
                .help("Print the leaderboard, then exit")
                .action(clap::ArgAction::SetTrue),
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
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

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
                .unwrap_or_else(|| PathBuf::from("gem_scout.toml")),
            track: matches.get_one::<String>("track").map(PathBuf::from),
            base_url: matches.get_one::<String>("base-url").cloned(),
            participant: matches.get_one::<String>("participant").cloned(),
            found: matches.get_one::<String>("found").cloned(),
            leaderboard: matches.get_flag("leaderboard"),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

//! Command-line arguments for `scorelink-watch`

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use scorelink_client::{Interest, SubscriptionSet};

/// Watch live score updates from a ScoreLink hub
#[derive(Parser, Debug)]
#[command(
    name = "scorelink-watch",
    version,
    about = "Connect to a ScoreLink hub and print score updates as they arrive",
    long_about = "Connects to a ScoreLink real-time hub, subscribes to the requested groups and\n\
                  prints every score update. The connection is kept alive across network drops\n\
                  and token refreshes until interrupted with Ctrl-C.\n\n\
                  Settings are layered: built-in defaults, then --config, then SCORELINK_*\n\
                  environment variables, then flags."
)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', env = "SCORELINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hub base URL, e.g. https://grades.example
    #[arg(long)]
    pub base_url: Option<String>,

    #[command(flatten)]
    pub token: TokenArgs,

    #[command(flatten)]
    pub interests: InterestArgs,

    /// Do not reconnect after the connection drops
    #[arg(long)]
    pub no_reconnect: bool,

    /// Update output format
    #[arg(long, short = 'f', value_enum, default_value = "human")]
    pub format: OutputFormat,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

/// Where the access token comes from
#[derive(Args, Debug)]
#[group(multiple = false)]
pub struct TokenArgs {
    /// Access token
    #[arg(long, env = "SCORELINK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File holding the access token; re-read before every connect attempt
    #[arg(long, value_name = "PATH")]
    pub token_file: Option<PathBuf>,
}

/// Groups to subscribe to
#[derive(Args, Debug, Default)]
pub struct InterestArgs {
    /// Every score update
    #[arg(long)]
    pub all: bool,

    /// Grading session (repeatable)
    #[arg(long = "session", value_name = "ID")]
    pub sessions: Vec<i64>,

    /// Student (repeatable)
    #[arg(long = "student", value_name = "ID")]
    pub students: Vec<String>,

    /// Evaluator (repeatable)
    #[arg(long = "evaluator", value_name = "ID")]
    pub evaluators: Vec<String>,
}

impl InterestArgs {
    pub fn to_set(&self) -> SubscriptionSet {
        let mut set = SubscriptionSet::new();
        if self.all {
            set.insert(Interest::All);
        }
        set.extend(self.sessions.iter().copied().map(Interest::Session));
        set.extend(self.students.iter().cloned().map(Interest::Entity));
        set.extend(self.evaluators.iter().cloned().map(Interest::Evaluator));
        set
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// One readable line per update
    Human,
    /// One JSON object per update
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_interest_flags() {
        let cli = Cli::try_parse_from([
            "scorelink-watch",
            "--session",
            "1",
            "--session",
            "2",
            "--student",
            "s-7",
            "--all",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(
            cli.interests.to_set().interests(),
            vec![
                Interest::All,
                Interest::Session(1),
                Interest::Session(2),
                Interest::Entity("s-7".into()),
            ]
        );
    }

    #[test]
    fn test_token_sources_are_exclusive() {
        let result = Cli::try_parse_from([
            "scorelink-watch",
            "--token",
            "abc",
            "--token-file",
            "/tmp/token",
        ]);
        assert!(result.is_err());
    }
}

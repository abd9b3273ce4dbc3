//! `scorelink-watch`: prints live score updates from a ScoreLink hub.
//!
//! ```text
//! scorelink-watch --base-url https://grades.example --token-file ~/.scorelink/token \
//!     --session 42 --student s-17
//! ```

mod cli;
mod settings;
mod token_file;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use scorelink_client::{
    BackoffSchedule, ConnectOutcome, ConnectionManager, ManagerConfig, ReconnectPolicy,
    StaticTokenProvider, UpdateEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, OutputFormat};
use crate::token_file::FileTokenProvider;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut config = settings::load(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        config.base_url.clone_from(base_url);
    }
    if cli.no_reconnect {
        config.reconnect = ReconnectPolicy::disabled();
    }

    let manager = build_manager(&cli, config)?;
    let result = watch(&manager, cli.format).await;
    manager.disconnect().await;

    let stats = manager.stats();
    info!(
        connects = stats.successful_connects,
        reconnects = stats.reconnects,
        updates = stats.events_dispatched,
        subscribe_failures = stats.subscribe_failures,
        "Session summary"
    );
    result
}

fn init_tracing(cli: &Cli) -> Result<()> {
    // stdout carries the updates; logs go to stderr
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

fn build_manager(cli: &Cli, config: ManagerConfig) -> Result<ConnectionManager> {
    let builder = ConnectionManager::builder(config).subscriptions(cli.interests.to_set());
    let builder = match (&cli.token.token, &cli.token.token_file) {
        (_, Some(path)) => builder.token_provider(FileTokenProvider::new(path)),
        (Some(token), None) => builder.token_provider(StaticTokenProvider::new(token.clone())),
        (None, None) => {
            bail!("an access token is required: pass --token, --token-file or set SCORELINK_TOKEN")
        }
    };
    builder.build().context("invalid connection settings")
}

async fn watch(manager: &ConnectionManager, format: OutputFormat) -> Result<()> {
    manager.on_error(|e| error!(error = %e, "Connection manager stopped retrying"));
    let mut updates = manager.subscribe_updates();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // The manager only retries on its own once a connection has existed
    let schedule = &manager.config().reconnect.schedule;
    let mut retries: u32 = 0;
    loop {
        let outcome = manager.connect().await.context("connecting to hub")?;
        if outcome.is_connected() {
            info!(?outcome, subscriptions = manager.subscriptions().len(), "Watching for updates");
            break;
        }
        retries += 1;
        let delay = retry_delay(schedule, retries, &outcome);
        warn!(?outcome, ?delay, retries, "Hub not available yet; retrying");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            signal = &mut shutdown => {
                signal.context("listening for Ctrl-C")?;
                info!("Interrupted before connecting");
                return Ok(());
            }
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(event) => print_update(&event, format)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind; updates skipped"),
                Err(RecvError::Closed) => break,
            },
            signal = &mut shutdown => {
                signal.context("listening for Ctrl-C")?;
                info!("Interrupted; disconnecting");
                break;
            }
        }
    }
    Ok(())
}

/// Backoff before the next startup attempt, never shorter than a throttle
fn retry_delay(schedule: &BackoffSchedule, retry: u32, outcome: &ConnectOutcome) -> Duration {
    let delay = schedule.delay_for(retry);
    match outcome {
        ConnectOutcome::Throttled { retry_after } => delay.max(*retry_after),
        _ => delay,
    }
}

fn print_update(event: &UpdateEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Human => println!(
            "{} {:<7} {}",
            event.received_at.format("%H:%M:%S%.3f"),
            event.kind.to_string(),
            event.entity
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scorelink_client::{ClientError, TransportError};

    #[test]
    fn test_startup_retry_follows_backoff() {
        let schedule = BackoffSchedule::default();
        let failed = ConnectOutcome::Failed(ClientError::from(TransportError::ConnectionFailed(
            "connection refused".into(),
        )));

        let delays: Vec<_> = (1..=4).map(|retry| retry_delay(&schedule, retry, &failed)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(30)
            ]
        );
    }

    #[test]
    fn test_startup_retry_respects_throttle() {
        let schedule = BackoffSchedule::default();
        let throttled = ConnectOutcome::Throttled {
            retry_after: Duration::from_secs(4),
        };
        assert_eq!(retry_delay(&schedule, 1, &throttled), Duration::from_secs(4));
        assert_eq!(retry_delay(&schedule, 2, &throttled), Duration::from_secs(10));
    }
}

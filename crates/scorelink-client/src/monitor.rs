//! Heartbeat and health check tasks
//!
//! Both timers start after a successful (re)connect has asserted
//! subscriptions. The heartbeat belongs to one connection and ends on its own
//! once that connection is gone. The health check belongs to the manager: it
//! survives drops so it can reconnect a manager that ended up disconnected,
//! and only an explicit disconnect stops it. Restarting either one replaces
//! the previous task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use scorelink_transport_traits::HubTransport;

/// Handles of the running monitor tasks
#[derive(Debug, Default)]
pub(crate) struct Monitor {
    heartbeat: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Replaces both tasks, aborting any previous ones
    pub(crate) fn restart(&mut self, heartbeat: JoinHandle<()>, health: JoinHandle<()>) {
        self.stop();
        self.heartbeat = Some(heartbeat);
        self.health = Some(health);
    }

    /// Aborts both tasks
    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        if let Some(task) = self.health.take() {
            task.abort();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.health.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Pings `transport` every `interval` until it stops being connected or `cancel` fires.
pub(crate) fn spawn_heartbeat<F>(
    transport: Arc<dyn HubTransport>,
    cancel: CancellationToken,
    interval: Duration,
    ping_timeout: Duration,
    on_beat: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(?interval, "Heartbeat started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => break,
            }

            if !transport.is_connected() {
                break;
            }

            match tokio::time::timeout(ping_timeout, transport.ping()).await {
                Ok(Ok(())) => {
                    trace!("Heartbeat sent");
                    on_beat();
                }
                // A dead connection is reported by the transport's close event
                Ok(Err(e)) => warn!(error = %e, "Heartbeat failed"),
                Err(_) => warn!(timeout = ?ping_timeout, "Heartbeat timed out"),
            }
        }
        debug!("Heartbeat stopped");
    })
}

/// Runs `check` every `interval`. `check` returns `None` once its owner is gone,
/// which ends the task.
pub(crate) fn spawn_health_check<F, Fut>(interval: Duration, mut check: F) -> JoinHandle<()>
where
    F: FnMut() -> Option<Fut> + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(?interval, "Health check started");

        loop {
            ticker.tick().await;
            match check() {
                Some(tick) => tick.await,
                None => break,
            }
        }
        debug!("Health check stopped");
    })
}

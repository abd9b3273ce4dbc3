//! Reconnect delay schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Deterministic map from reconnect attempt to delay.
///
/// Attempt `n` waits `delays[n]`; attempts past the end of the list reuse the
/// last entry. The default schedule is 0s, 2s, 10s, then 30s for every later
/// attempt. The schedule carries no state: the reconnect loop owns the
/// attempt counter.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackoffSchedule {
    #[serde_as(as = "Vec<DurationMilliSeconds<u64>>")]
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ])
    }
}

impl BackoffSchedule {
    /// Create a schedule from explicit delays
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Same delay for every attempt
    pub fn fixed(delay: Duration) -> Self {
        Self::new(vec![delay])
    }

    /// Delay before reconnect attempt `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt).unwrap_or(usize::MAX);
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// The configured delays
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// `true` if no delays are configured (every attempt is immediate)
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

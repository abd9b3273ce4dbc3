//! Transport configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for handshake, invocation and teardown timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Handshake timeout (transport negotiation plus hub handshake).
    pub connect: Duration,

    /// Single hub invocation timeout.
    pub invoke: Duration,

    /// Timeout for each teardown call (unsubscribe, stop).
    pub teardown: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            invoke: Duration::from_secs(10),
            teardown: Duration::from_millis(500),
        }
    }
}

impl TimeoutConfig {
    /// Create a configuration with short timeouts for local hubs.
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            connect: Duration::from_secs(5),
            invoke: Duration::from_secs(2),
            teardown: Duration::from_millis(200),
        }
    }

    /// Create a configuration with long timeouts for slow networks.
    #[must_use]
    pub const fn patient() -> Self {
        Self {
            connect: Duration::from_secs(60),
            invoke: Duration::from_secs(30),
            teardown: Duration::from_millis(900),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_config_default() {
        let config = TimeoutConfig::default();
        assert_eq!(config.connect, Duration::from_secs(30));
        assert_eq!(config.invoke, Duration::from_secs(10));
        assert!(config.teardown < Duration::from_secs(1));
    }

    #[test]
    fn test_teardown_stays_sub_second() {
        assert!(TimeoutConfig::fast().teardown < Duration::from_secs(1));
        assert!(TimeoutConfig::patient().teardown < Duration::from_secs(1));
    }
}

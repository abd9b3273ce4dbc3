//! Connection manager configuration

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use url::Url;

use scorelink_transport_traits::{TimeoutConfig, TransportType};

use crate::backoff::BackoffSchedule;
use crate::error::{ClientError, ClientResult};
use crate::token::Credential;

/// RFC 3986 unreserved characters pass through; everything else in a token is escaped.
const TOKEN_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Exclusive upper bound for `teardown_timeout`
const MAX_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the connection manager
///
/// Durations are (de)serialized as milliseconds under `*_ms` keys, so a TOML
/// file reads `connect_timeout_ms = 30000`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Hub server base URL, e.g. `https://grades.example`
    pub base_url: String,

    /// Hub path appended to the base URL
    pub hub_path: String,

    /// Transports in preference order
    ///
    /// Entries the transport factory does not support are skipped. The
    /// built-in factory (`websocket` feature) only provides
    /// [`TransportType::WebSockets`], so with it the default order tries
    /// WebSockets alone; server-sent events and long polling need a custom
    /// factory passed to
    /// [`ConnectionManagerBuilder::transport_factory`](crate::ConnectionManagerBuilder::transport_factory).
    pub transports: Vec<TransportType>,

    /// Bound on transport negotiation plus handshake
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,

    /// Bound on a single subscribe invocation
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "invoke_timeout_ms")]
    pub invoke_timeout: Duration,

    /// Bound on each teardown call during disconnect
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "teardown_timeout_ms")]
    pub teardown_timeout: Duration,

    /// Minimum spacing between connect attempts that reach the handshake
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "min_connect_interval_ms")]
    pub min_connect_interval: Duration,

    /// Liveness ping interval
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,

    /// Subscription re-assertion / reconnect check interval
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "health_check_interval_ms")]
    pub health_check_interval: Duration,

    /// How often to ask the token provider while waiting for a credential
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "credential_poll_interval_ms")]
    pub credential_poll_interval: Duration,

    /// How long to wait for a credential after a connect found none; zero disables polling
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "credential_poll_window_ms")]
    pub credential_poll_window: Duration,

    /// Automatic reconnection after an unexpected drop
    pub reconnect: ReconnectPolicy,

    /// Consecutive authentication rejections retried with a fresh credential
    pub max_auth_retries: u32,

    /// Capacity of the update broadcast channel
    pub event_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let timeouts = TimeoutConfig::default();
        Self {
            base_url: String::new(),
            hub_path: "/hubs/scores".to_string(),
            transports: TransportType::FALLBACK_ORDER.to_vec(),
            connect_timeout: timeouts.connect,
            invoke_timeout: timeouts.invoke,
            teardown_timeout: timeouts.teardown,
            min_connect_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            credential_poll_interval: Duration::from_secs(1),
            credential_poll_window: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            max_auth_retries: 3,
            event_buffer: 256,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration for the hub at `base_url` with default values
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Fast reconnects and short timeouts, for hubs on a local network
    pub fn aggressive(base_url: impl Into<String>) -> Self {
        Self {
            min_connect_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(15),
            health_check_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::aggressive(),
            ..Self::new(base_url).with_timeouts(TimeoutConfig::fast())
        }
    }

    /// Slow reconnects and generous timeouts, for constrained networks
    pub fn conservative(base_url: impl Into<String>) -> Self {
        Self {
            min_connect_interval: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(120),
            reconnect: ReconnectPolicy::conservative(),
            ..Self::new(base_url).with_timeouts(TimeoutConfig::patient())
        }
    }

    /// Set the hub path
    pub fn with_hub_path(mut self, path: impl Into<String>) -> Self {
        self.hub_path = path.into();
        self
    }

    /// Set the transport preference order
    pub fn with_transports(mut self, transports: Vec<TransportType>) -> Self {
        self.transports = transports;
        self
    }

    /// Set connect, invoke and teardown timeouts together
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.connect_timeout = timeouts.connect;
        self.invoke_timeout = timeouts.invoke;
        self.teardown_timeout = timeouts.teardown;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the teardown timeout
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Set the connect throttle interval
    pub fn with_min_connect_interval(mut self, interval: Duration) -> Self {
        self.min_connect_interval = interval;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the health check interval
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set credential polling interval and window
    pub fn with_credential_polling(mut self, interval: Duration, window: Duration) -> Self {
        self.credential_poll_interval = interval;
        self.credential_poll_window = window;
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the number of authentication retries
    pub fn with_max_auth_retries(mut self, retries: u32) -> Self {
        self.max_auth_retries = retries;
        self
    }

    /// Set the update channel capacity
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// The configured connect/invoke/teardown timeouts
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig {
            connect: self.connect_timeout,
            invoke: self.invoke_timeout,
            teardown: self.teardown_timeout,
        }
    }

    /// Check the configuration for values the manager cannot run with
    pub fn validate(&self) -> ClientResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Configuration("base_url is empty".into()));
        }
        let parsed = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base_url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ClientError::Configuration(format!(
                "unsupported base_url scheme '{}'",
                parsed.scheme()
            )));
        }
        if self.transports.is_empty() {
            return Err(ClientError::Configuration("no transports configured".into()));
        }

        let intervals = [
            ("connect_timeout", self.connect_timeout),
            ("invoke_timeout", self.invoke_timeout),
            ("teardown_timeout", self.teardown_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("health_check_interval", self.health_check_interval),
            ("credential_poll_interval", self.credential_poll_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(ClientError::Configuration(format!("{name} must be non-zero")));
        }
        if self.teardown_timeout >= MAX_TEARDOWN_TIMEOUT {
            return Err(ClientError::Configuration(format!(
                "teardown_timeout must be under {MAX_TEARDOWN_TIMEOUT:?}, got {:?}",
                self.teardown_timeout
            )));
        }

        if self.event_buffer == 0 {
            return Err(ClientError::Configuration("event_buffer must be non-zero".into()));
        }
        Ok(())
    }

    /// Builds `<base>/<hub-path>?access_token=<token>` with the token percent-encoded
    pub fn hub_url(&self, credential: &Credential) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.hub_path.trim_start_matches('/');
        let token = utf8_percent_encode(credential.expose(), TOKEN_ENCODE_SET);
        format!("{base}/{path}?access_token={token}")
    }
}

/// Reconnection policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reconnect automatically after an unexpected drop
    pub enabled: bool,

    /// Delay before each attempt
    pub schedule: BackoffSchedule,

    /// Give up after this many attempts; `None` retries until disconnected
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: BackoffSchedule::default(),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Create the default reconnection policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable reconnection; the health check still reconnects later
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Short delays
    pub fn aggressive() -> Self {
        Self {
            enabled: true,
            schedule: BackoffSchedule::new(vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ]),
            max_attempts: None,
        }
    }

    /// Long delays
    pub fn conservative() -> Self {
        Self {
            enabled: true,
            schedule: BackoffSchedule::new(vec![
                Duration::from_secs(1),
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ]),
            max_attempts: None,
        }
    }

    /// Cap the number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Replace the delay schedule
    pub fn with_schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.schedule = schedule;
        self
    }
}

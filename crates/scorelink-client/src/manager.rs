//! Connection lifecycle controller
//!
//! [`ConnectionManager`] owns at most one live hub transport. It connects on
//! request, re-establishes the connection with backoff after an unexpected
//! drop, re-asserts the full [`SubscriptionSet`] on every (re)connect, and
//! tears everything down on an explicit disconnect.
//!
//! ## State machine
//!
//! ```text
//!                connect()                 handshake ok
//! Disconnected ───────────► Connecting ─────────────────► Connected
//!      ▲                        │ failure / no token          │ │
//!      └────────────────────────┘                             │ │ drop with error
//!      ▲                                                      │ ▼
//!      │          disconnect()            re-handshake ok   Reconnecting
//!      └───── Disconnecting ◄──────────── (any) ◄─────────────┘
//! ```
//!
//! ## Serialization
//!
//! - A reentrancy flag ([`ConnectGuard`]) makes overlapping connect attempts no-ops.
//! - The transport slot lock makes installing and removing the transport
//!   atomic with the matching state transition.
//! - Each connection carries an invocation gate and a cancellation token, so a
//!   subscription batch and a close never run against the same transport at
//!   the same time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use scorelink_transport_traits::{
    ConnectRequest, HubTransport, TransportError, TransportEvent, TransportEventReceiver,
    TransportFactory, TransportHandle, TransportMetrics, TransportType,
};

use crate::config::ManagerConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{ClientError, ClientResult, TeardownError};
use crate::events::UpdateEvent;
use crate::monitor::{self, Monitor};
use crate::state::{ConnectionState, StateCell};
use crate::stats::{AtomicStats, ConnectionStats};
use crate::subscriptions::{
    self, Interest, SubscriptionReport, SubscriptionSet, invoke_bounded,
};
use crate::token::{Credential, TokenProvider};

/// What a call to [`ConnectionManager::connect`] did.
///
/// Recoverable failures are reported here rather than as `Err`; they are also
/// recorded in [`ConnectionManager::last_error`].
#[derive(Debug)]
pub enum ConnectOutcome {
    /// A new connection was established and subscriptions were asserted.
    Connected {
        /// The negotiated transport
        transport: TransportType,
    },
    /// The manager was already connected.
    AlreadyConnected,
    /// Another connect, reconnect or disconnect is in flight.
    InProgress,
    /// The previous attempt was too recent.
    Throttled {
        /// Time until the next attempt is allowed
        retry_after: Duration,
    },
    /// The token provider has no token yet; a credential poller may retry.
    NoCredential,
    /// The attempt failed and may succeed later.
    Failed(ClientError),
}

impl ConnectOutcome {
    /// `true` if the manager is connected after the call
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::AlreadyConnected)
    }
}

/// Who asked for a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Caller,
    HealthCheck,
    CredentialPoller,
}

/// Clears the reentrancy flag when dropped, including on task abort
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One live transport and its per-connection serialization primitives
#[derive(Clone)]
struct Connection {
    transport: Arc<dyn HubTransport>,
    transport_type: TransportType,
    generation: u64,
    gate: Arc<AsyncMutex<()>>,
    cancel: CancellationToken,
}

struct ActiveConnection {
    connection: Connection,
    events: JoinHandle<()>,
}

struct ManagerInner {
    config: ManagerConfig,
    factory: Arc<dyn TransportFactory>,
    tokens: Arc<dyn TokenProvider>,
    state: StateCell,
    subscriptions: Mutex<SubscriptionSet>,
    slot: AsyncMutex<Option<ActiveConnection>>,
    connecting: AtomicBool,
    generation: AtomicU64,
    last_attempt: Mutex<Option<Instant>>,
    last_error: RwLock<Option<ClientError>>,
    dispatcher: EventDispatcher,
    stats: AtomicStats,
    monitor: Mutex<Monitor>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Resilient connection to the score update hub.
///
/// Cheap to clone; clones share the same connection.
///
/// # Examples
///
/// ```rust,no_run
/// use scorelink_client::{ConnectionManager, Interest, ManagerConfig, SharedTokenProvider};
///
/// # async fn example() -> scorelink_client::ClientResult<()> {
/// let tokens = SharedTokenProvider::new();
/// tokens.set("eyJhbGciOi...");
///
/// let manager = ConnectionManager::builder(ManagerConfig::new("https://grades.example"))
///     .token_provider(tokens)
///     .build()?;
///
/// manager.on_update(|event| println!("{} {}", event.kind, event.entity));
/// manager.add_interest(Interest::Session(42)).await;
/// manager.connect().await?;
///
/// // ... later
/// manager.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("base_url", &self.inner.config.base_url)
            .field("state", &self.inner.state.get())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    config: ManagerConfig,
    tokens: Option<Arc<dyn TokenProvider>>,
    factory: Option<Arc<dyn TransportFactory>>,
    subscriptions: SubscriptionSet,
}

impl fmt::Debug for ConnectionManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManagerBuilder")
            .field("config", &self.config)
            .field("has_token_provider", &self.tokens.is_some())
            .field("factory", &self.factory)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl ConnectionManagerBuilder {
    /// Start building a manager with `config`
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            tokens: None,
            factory: None,
            subscriptions: SubscriptionSet::default(),
        }
    }

    /// Set the access token provider (required)
    pub fn token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(provider));
        self
    }

    /// Set the transport factory. Defaults to the built-in WebSocket transport.
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Interests to assert on the first connect
    pub fn subscriptions(mut self, subscriptions: SubscriptionSet) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Validate the configuration and create the manager. Nothing connects yet.
    pub fn build(self) -> ClientResult<ConnectionManager> {
        self.config.validate()?;
        let tokens = self.tokens.ok_or_else(|| {
            ClientError::Configuration("a token provider is required".to_string())
        })?;
        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory(&self.config).ok_or_else(|| {
                ClientError::Configuration(
                    "no transport factory: enable the `websocket` feature or supply one"
                        .to_string(),
                )
            })?,
        };

        Ok(ConnectionManager {
            inner: Arc::new(ManagerInner {
                dispatcher: EventDispatcher::new(self.config.event_buffer),
                config: self.config,
                factory,
                tokens,
                state: StateCell::new(),
                subscriptions: Mutex::new(self.subscriptions),
                slot: AsyncMutex::new(None),
                connecting: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                last_attempt: Mutex::new(None),
                last_error: RwLock::new(None),
                stats: AtomicStats::default(),
                monitor: Mutex::new(Monitor::default()),
                reconnect_task: Mutex::new(None),
                poller: Mutex::new(None),
            }),
        })
    }
}

#[cfg(feature = "websocket")]
fn default_factory(config: &ManagerConfig) -> Option<Arc<dyn TransportFactory>> {
    use scorelink_websocket::{WebSocketHubConfig, WebSocketTransportFactory};

    let hub_config = WebSocketHubConfig::new()
        .with_handshake_timeout(config.connect_timeout)
        .with_invoke_timeout(config.invoke_timeout);
    Some(Arc::new(WebSocketTransportFactory::new(hub_config)))
}

#[cfg(not(feature = "websocket"))]
fn default_factory(_config: &ManagerConfig) -> Option<Arc<dyn TransportFactory>> {
    None
}

impl ConnectionManager {
    /// Start building a manager
    pub fn builder(config: ManagerConfig) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(config)
    }

    /// Create a manager with the default transport factory
    pub fn new(config: ManagerConfig, tokens: impl TokenProvider + 'static) -> ClientResult<Self> {
        Self::builder(config).token_provider(tokens).build()
    }

    /// Connect to the hub.
    ///
    /// A no-op when already connected, while another attempt is in flight, or
    /// within `min_connect_interval` of the previous attempt. When the token
    /// provider has no token yet, the manager starts polling it and connects
    /// once one appears.
    ///
    /// # Errors
    ///
    /// Only failures that retrying cannot fix (configuration problems, no
    /// usable transport) are returned as `Err`; they are also delivered to
    /// the error callbacks. Everything else is reported in the outcome.
    pub async fn connect(&self) -> ClientResult<ConnectOutcome> {
        self.inner.connect(Trigger::Caller).await
    }

    /// Disconnect from the hub.
    ///
    /// Stops background tasks, makes a best-effort attempt to unsubscribe
    /// every interest and closes the transport. Each teardown call is bounded
    /// by `teardown_timeout` and its failure is logged and discarded. Safe to
    /// call in any state, any number of times. Registered interests are kept
    /// for the next connect.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// `true` while the hub connection is established
    pub fn is_connected(&self) -> bool {
        self.inner.state.get().is_connected()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// A receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.watch()
    }

    /// The most recent connection failure, cleared by the next successful connect
    pub fn last_error(&self) -> Option<ClientError> {
        self.inner.last_error.read().clone()
    }

    /// Register a callback for every update event
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_update(Arc::new(callback));
    }

    /// Register a callback for errors the manager cannot recover from
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_error(Arc::new(callback));
    }

    /// A channel receiving every update event from now on
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.dispatcher.subscribe()
    }

    /// Snapshot of the manager's counters
    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    /// Counters of the live transport, if any
    pub async fn transport_metrics(&self) -> Option<TransportMetrics> {
        self.inner
            .current_connection()
            .await
            .map(|connection| connection.transport.metrics())
    }

    /// The negotiated transport type, if connected
    pub async fn transport_type(&self) -> Option<TransportType> {
        self.inner
            .current_connection()
            .await
            .map(|connection| connection.transport_type)
    }

    /// The manager's configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Snapshot of the registered interests
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.inner.subscriptions.lock().clone()
    }

    /// Register an interest.
    ///
    /// When connected and the interest is new, the full set is re-asserted
    /// and the report returned. Otherwise the interest waits for the next
    /// connect and `None` is returned.
    pub async fn add_interest(&self, interest: Interest) -> Option<SubscriptionReport> {
        if !self.inner.subscriptions.lock().insert(interest.clone()) {
            trace!(group = %interest, "Interest already registered");
            return None;
        }
        debug!(group = %interest, "Interest added");
        self.inner.reassert().await
    }

    /// Remove an interest, unsubscribing from it when connected.
    ///
    /// Returns `true` if the interest was registered.
    pub async fn remove_interest(&self, interest: &Interest) -> bool {
        if !self.inner.subscriptions.lock().remove(interest) {
            return false;
        }
        debug!(group = %interest, "Interest removed");
        self.inner.unsubscribe(std::slice::from_ref(interest)).await;
        true
    }

    /// Replace the registered interests.
    ///
    /// When connected, dropped interests are unsubscribed and, if anything
    /// was added, the full new set is re-asserted and the report returned.
    pub async fn set_subscriptions(&self, set: SubscriptionSet) -> Option<SubscriptionReport> {
        let (removed, added) = {
            let mut current = self.inner.subscriptions.lock();
            let removed = current.difference(&set);
            let added = set.difference(&current);
            *current = set;
            (removed, added)
        };

        if !removed.is_empty() {
            self.inner.unsubscribe(&removed).await;
        }
        if added.is_empty() {
            return None;
        }
        self.inner.reassert().await
    }

    /// Re-assert every registered interest now.
    ///
    /// Returns `None` without invoking anything when not connected.
    pub async fn subscribe_to_groups(&self) -> Option<SubscriptionReport> {
        self.inner.reassert().await
    }
}

impl ManagerInner {
    async fn connect(self: &Arc<Self>, trigger: Trigger) -> ClientResult<ConnectOutcome> {
        if let Some(outcome) = busy_outcome(self.state.get()) {
            trace!(?trigger, ?outcome, "Connect skipped");
            return Ok(outcome);
        }
        let Some(_guard) = ConnectGuard::acquire(&self.connecting) else {
            trace!(?trigger, "Connect already in flight");
            return Ok(ConnectOutcome::InProgress);
        };
        if let Some(outcome) = busy_outcome(self.state.get()) {
            return Ok(outcome);
        }
        if let Some(retry_after) = self.throttle_remaining() {
            debug!(?trigger, ?retry_after, "Connect throttled");
            return Ok(ConnectOutcome::Throttled { retry_after });
        }

        let credential = match self.tokens.token().await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                info!(?trigger, "No access token yet; deferring connect");
                if trigger != Trigger::CredentialPoller {
                    self.spawn_credential_poller();
                }
                return Ok(ConnectOutcome::NoCredential);
            }
            Err(e) => {
                warn!(error = %e, "Token provider failed");
                self.record_error(e.clone());
                return Ok(ConnectOutcome::Failed(e));
            }
        };

        *self.last_attempt.lock() = Some(Instant::now());
        self.state.set(ConnectionState::Connecting);
        info!(?trigger, base_url = %self.config.base_url, "Connecting to hub");

        match self.establish(&credential, ConnectionState::Connecting).await {
            Ok(connection) => {
                AtomicStats::incr(&self.stats.successful_connects);
                self.last_error.write().take();
                let transport = connection.transport_type;
                self.after_connect(connection).await;
                Ok(ConnectOutcome::Connected { transport })
            }
            Err(ClientError::Cancelled) => {
                debug!("Connect superseded by disconnect");
                Ok(ConnectOutcome::Failed(ClientError::Cancelled))
            }
            Err(e) => {
                self.state
                    .transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                self.record_error(e.clone());
                if e.is_recoverable() || e.is_authentication() {
                    warn!(error = %e, "Connect failed");
                    Ok(ConnectOutcome::Failed(e))
                } else {
                    error!(error = %e, "Connect failed permanently");
                    self.dispatcher.report_error(&e);
                    Err(e)
                }
            }
        }
    }

    /// Negotiates a transport in preference order and installs it.
    ///
    /// The manager moves to `Connected` only if it is still in `expected`
    /// once the handshake completes.
    async fn establish(
        self: &Arc<Self>,
        credential: &Credential,
        expected: ConnectionState,
    ) -> ClientResult<Connection> {
        let candidates: Vec<TransportType> = self
            .config
            .transports
            .iter()
            .copied()
            .filter(|transport_type| self.factory.supports(*transport_type))
            .collect();
        if candidates.is_empty() {
            return Err(ClientError::NoTransport(self.config.transports.clone()));
        }

        let request = ConnectRequest::new(self.config.hub_url(credential));
        AtomicStats::incr(&self.stats.connect_attempts);

        let mut last_error = None;
        for transport_type in candidates {
            debug!(
                transport = %transport_type,
                endpoint = %request.redacted_url(),
                "Negotiating transport"
            );
            match self
                .start_transport(transport_type, request.clone(), expected)
                .await
            {
                Ok(connection) => return Ok(connection),
                Err(e) if e.is_authentication() || matches!(e, ClientError::Cancelled) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(transport = %transport_type, error = %e, "Transport failed to start");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ClientError::NoTransport(self.config.transports.clone())))
    }

    async fn start_transport(
        self: &Arc<Self>,
        transport_type: TransportType,
        request: ConnectRequest,
        expected: ConnectionState,
    ) -> ClientResult<Connection> {
        let TransportHandle { transport, events } = self.factory.create(transport_type, request)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let teardown = self.config.teardown_timeout;

        // Close handling is registered before the transport starts
        let events = tokio::spawn(pump_events(Arc::downgrade(self), generation, events));

        let failure = match tokio::time::timeout(self.config.connect_timeout, transport.start()).await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ClientError::from(e)),
            Err(_) => Some(ClientError::from(TransportError::ConnectionTimeout {
                operation: format!("{transport_type} handshake"),
                timeout: self.config.connect_timeout,
            })),
        };
        if let Some(e) = failure {
            events.abort();
            if let Err(stop) = TeardownError::bounded("stop", teardown, transport.stop()).await {
                trace!(error = %stop, "Stop after failed start discarded");
            }
            return Err(e);
        }

        let connection = Connection {
            transport: Arc::clone(&transport),
            transport_type,
            generation,
            gate: Arc::new(AsyncMutex::new(())),
            cancel: CancellationToken::new(),
        };

        let mut slot = self.slot.lock().await;
        let superseded = self.state.get() != expected;
        if superseded || !transport.is_connected() {
            drop(slot);
            events.abort();
            if let Err(stop) = TeardownError::bounded("stop", teardown, transport.stop()).await {
                trace!(error = %stop, "Stop of abandoned transport discarded");
            }
            return Err(if superseded {
                ClientError::Cancelled
            } else {
                TransportError::ConnectionLost("dropped during handshake".to_string()).into()
            });
        }

        if let Some(stale) = slot.replace(ActiveConnection {
            connection: connection.clone(),
            events,
        }) {
            warn!(generation = stale.connection.generation, "Replacing a live transport");
            stale.connection.cancel.cancel();
            stale.events.abort();
            let transport = stale.connection.transport;
            tokio::spawn(async move {
                let _ = TeardownError::bounded("stop", teardown, transport.stop()).await;
            });
        }
        self.state.set(ConnectionState::Connected);
        drop(slot);

        info!(transport = %transport_type, generation, "Connected to hub");
        Ok(connection)
    }

    /// Asserts subscriptions, then (re)starts the monitor.
    async fn after_connect(self: &Arc<Self>, connection: Connection) {
        let report = self.assert_subscriptions(&connection).await;
        if !report.is_complete() {
            warn!(
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "Subscriptions only partially asserted"
            );
        }
        self.start_monitor(&connection);
    }

    async fn assert_subscriptions(&self, connection: &Connection) -> SubscriptionReport {
        let _gate = tokio::select! {
            gate = connection.gate.lock() => gate,
            () = connection.cancel.cancelled() => {
                return SubscriptionReport::skipped(self.subscriptions.lock().interests());
            }
        };

        let set = self.subscriptions.lock().clone();
        let report = subscriptions::subscribe_to_groups(
            connection.transport.as_ref(),
            &set,
            self.config.invoke_timeout,
            &connection.cancel,
        )
        .await;

        AtomicStats::add(&self.stats.subscribe_failures, report.failed.len());
        debug!(
            asserted = report.asserted.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Subscription set asserted"
        );
        report
    }

    async fn reassert(self: &Arc<Self>) -> Option<SubscriptionReport> {
        if !self.state.get().is_connected() {
            debug!("Not connected; subscriptions deferred until the next connect");
            return None;
        }
        let connection = self.current_connection().await?;
        Some(self.assert_subscriptions(&connection).await)
    }

    async fn unsubscribe(&self, interests: &[Interest]) {
        if !self.state.get().is_connected() {
            return;
        }
        let Some(connection) = self.current_connection().await else {
            return;
        };
        let _gate = tokio::select! {
            gate = connection.gate.lock() => gate,
            () = connection.cancel.cancelled() => return,
        };

        for interest in interests {
            if !connection.transport.is_connected() {
                break;
            }
            let invocation = interest.unsubscribe_invocation();
            match invoke_bounded(
                connection.transport.as_ref(),
                invocation,
                self.config.invoke_timeout,
                &connection.cancel,
            )
            .await
            {
                Ok(()) => debug!(group = %interest, "Unsubscribed"),
                Err(e) => warn!(group = %interest, error = %e, "Unsubscribe failed"),
            }
        }
    }

    fn start_monitor(self: &Arc<Self>, connection: &Connection) {
        let mut monitor = self.monitor.lock();
        if connection.cancel.is_cancelled() {
            debug!(generation = connection.generation, "Connection already closed; monitor not started");
            return;
        }

        let manager = Arc::downgrade(self);
        let beats = manager.clone();
        let heartbeat = monitor::spawn_heartbeat(
            Arc::clone(&connection.transport),
            connection.cancel.clone(),
            self.config.heartbeat_interval,
            self.config.invoke_timeout,
            move || {
                if let Some(inner) = beats.upgrade() {
                    AtomicStats::incr(&inner.stats.heartbeats_sent);
                }
            },
        );
        let health = monitor::spawn_health_check(self.config.health_check_interval, move || {
            let Some(inner) = manager.upgrade() else {
                return None;
            };
            Some(async move { inner.health_tick().await })
        });
        monitor.restart(heartbeat, health);
    }

    async fn health_tick(self: &Arc<Self>) {
        match self.state.get() {
            ConnectionState::Connected => match self.current_connection().await {
                Some(connection) if connection.transport.is_connected() => {
                    debug!("Health check: re-asserting subscriptions");
                    self.assert_subscriptions(&connection).await;
                }
                Some(connection) => self.recover_silent_loss(connection).await,
                None => trace!("Health check: connection already released"),
            },
            ConnectionState::Disconnected => {
                if self.connecting.load(Ordering::Acquire) {
                    trace!("Health check: connect already in flight");
                    return;
                }
                info!("Health check: disconnected, connecting");
                if let Err(e) = self.connect(Trigger::HealthCheck).await {
                    debug!(error = %e, "Health check connect failed");
                }
            }
            state => trace!(%state, "Health check: transition in progress"),
        }
    }

    /// The transport went down without reporting a close. Handled as a drop
    /// with an error, then the dead transport is stopped.
    async fn recover_silent_loss(self: &Arc<Self>, connection: Connection) {
        warn!(
            generation = connection.generation,
            transport = %connection.transport_type,
            "Health check: transport down without a close event"
        );
        let lost = TransportError::ConnectionLost("transport stopped without a close event".into());
        self.handle_closed(connection.generation, Some(lost)).await;

        let stop = connection.transport.stop();
        if let Err(e) = TeardownError::bounded("stop", self.config.teardown_timeout, stop).await {
            debug!(error = %e, "Stop of silently lost transport discarded");
        }

        if self.state.get() == ConnectionState::Disconnected {
            info!("Health check: reconnect disabled, connecting");
            if let Err(e) = self.connect(Trigger::HealthCheck).await {
                debug!(error = %e, "Health check connect failed");
            }
        }
    }

    async fn handle_closed(self: &Arc<Self>, generation: u64, error: Option<TransportError>) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|active| active.connection.generation) != Some(generation) {
            trace!(generation, "Ignoring close of a superseded transport");
            return;
        }
        let Some(active) = slot.take() else {
            return;
        };
        active.connection.cancel.cancel();

        match error {
            Some(e) if self.config.reconnect.enabled => {
                warn!(error = %e, generation, "Connection lost; reconnecting");
                self.record_error(e.into());
                self.state.set(ConnectionState::Reconnecting);
                self.spawn_reconnect();
            }
            Some(e) => {
                warn!(error = %e, generation, "Connection lost; automatic reconnect disabled");
                self.record_error(e.into());
                self.state.set(ConnectionState::Disconnected);
            }
            None => {
                info!(generation, "Hub closed the connection");
                self.state.set(ConnectionState::Disconnected);
            }
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let task = tokio::spawn(reconnect_loop(Arc::downgrade(self)));
        if let Some(previous) = self.reconnect_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn spawn_credential_poller(self: &Arc<Self>) {
        let window = self.config.credential_poll_window;
        if window.is_zero() {
            return;
        }
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|task| !task.is_finished()) {
            trace!("Credential poller already running");
            return;
        }
        let interval = self.config.credential_poll_interval;
        debug!(?interval, ?window, "Polling for an access token");
        *poller = Some(tokio::spawn(poll_for_credential(
            Arc::downgrade(self),
            interval,
            window,
        )));
    }

    async fn disconnect(&self) {
        if let Some(task) = self.poller.lock().take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }

        let active = {
            let mut slot = self.slot.lock().await;
            let active = slot.take();
            if active.is_none() && self.state.get() == ConnectionState::Disconnected {
                None
            } else {
                self.state.set(ConnectionState::Disconnecting);
                if let Some(active) = &active {
                    active.connection.cancel.cancel();
                }
                Some(active)
            }
        };
        self.monitor.lock().stop();

        let Some(active) = active else {
            trace!("Already disconnected");
            return;
        };
        if let Some(active) = active {
            self.teardown(active).await;
        }
        self.state.set(ConnectionState::Disconnected);
        info!("Disconnected from hub");
    }

    async fn teardown(&self, active: ActiveConnection) {
        let ActiveConnection { connection, events } = active;
        let timeout = self.config.teardown_timeout;

        // The cancelled token makes a running batch give up the gate
        match tokio::time::timeout(timeout, connection.gate.lock()).await {
            Ok(_gate) if connection.transport.is_connected() => {
                let interests = self.subscriptions.lock().interests();
                let results = futures::future::join_all(interests.iter().map(|interest| {
                    let invocation = interest.unsubscribe_invocation();
                    let operation = invocation.target.clone();
                    TeardownError::bounded(operation, timeout, connection.transport.invoke(invocation))
                }))
                .await;
                for (interest, result) in interests.iter().zip(results) {
                    if let Err(e) = result {
                        debug!(group = %interest, error = %e, "Unsubscribe discarded");
                    }
                }
            }
            Ok(_) => trace!("Transport already down; skipping unsubscribe"),
            Err(_) => debug!(?timeout, "Subscription batch still running; skipping unsubscribe"),
        }

        if let Err(e) = TeardownError::bounded("stop", timeout, connection.transport.stop()).await {
            debug!(error = %e, "Transport stop discarded");
        }
        events.abort();
    }

    async fn current_connection(&self) -> Option<Connection> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|active| active.connection.clone())
    }

    fn throttle_remaining(&self) -> Option<Duration> {
        let last = (*self.last_attempt.lock())?;
        let elapsed = last.elapsed();
        let min = self.config.min_connect_interval;
        (elapsed < min).then(|| min - elapsed)
    }

    fn record_error(&self, error: ClientError) {
        *self.last_error.write() = Some(error);
    }

    /// Stops reconnecting and escalates `error` to the error callbacks.
    fn give_up(&self, error: ClientError) {
        error!(error = %error, "Reconnect abandoned");
        self.state
            .transition(ConnectionState::Reconnecting, ConnectionState::Disconnected);
        self.record_error(error.clone());
        self.dispatcher.report_error(&error);
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.monitor.get_mut().stop();
        if let Some(task) = self.poller.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.reconnect_task.get_mut().take() {
            task.abort();
        }
        if let Some(active) = self.slot.get_mut().take() {
            active.connection.cancel.cancel();
            active.events.abort();
        }
    }
}

fn busy_outcome(state: ConnectionState) -> Option<ConnectOutcome> {
    match state {
        ConnectionState::Connected => Some(ConnectOutcome::AlreadyConnected),
        ConnectionState::Connecting
        | ConnectionState::Reconnecting
        | ConnectionState::Disconnecting => Some(ConnectOutcome::InProgress),
        ConnectionState::Disconnected => None,
    }
}

/// Single consumer of one transport's events
async fn pump_events(
    manager: Weak<ManagerInner>,
    generation: u64,
    mut events: TransportEventReceiver,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = manager.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Connected {
                transport_type,
                endpoint,
            } => debug!(transport = %transport_type, %endpoint, generation, "Transport up"),
            TransportEvent::Invocation(invocation) => {
                if inner.dispatcher.dispatch(invocation) {
                    AtomicStats::incr(&inner.stats.events_dispatched);
                }
            }
            TransportEvent::Closed { error } => {
                inner.handle_closed(generation, error).await;
                break;
            }
        }
    }
}

async fn reconnect_loop(manager: Weak<ManagerInner>) {
    let mut attempt: u32 = 0;
    let mut auth_rejections: u32 = 0;

    loop {
        let delay = {
            let Some(inner) = manager.upgrade() else {
                return;
            };
            let policy = &inner.config.reconnect;
            if policy.max_attempts.is_some_and(|max| attempt >= max) {
                inner.give_up(ClientError::ReconnectExhausted { attempts: attempt });
                return;
            }
            policy.schedule.delay_for(attempt)
        };

        info!(attempt = attempt + 1, ?delay, "Reconnect scheduled");
        tokio::time::sleep(delay).await;
        attempt += 1;

        let Some(inner) = manager.upgrade() else {
            return;
        };
        if inner.state.get() != ConnectionState::Reconnecting {
            debug!(state = %inner.state.get(), "Reconnect no longer needed");
            return;
        }
        let Some(_guard) = ConnectGuard::acquire(&inner.connecting) else {
            debug!(attempt, "Connect in flight; skipping reconnect attempt");
            continue;
        };

        let credential = match inner.tokens.token().await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                info!(attempt, "No access token; retrying after backoff");
                continue;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Token provider failed");
                inner.record_error(e);
                continue;
            }
        };

        match inner
            .establish(&credential, ConnectionState::Reconnecting)
            .await
        {
            Ok(connection) => {
                AtomicStats::incr(&inner.stats.successful_connects);
                AtomicStats::incr(&inner.stats.reconnects);
                inner.last_error.write().take();
                info!(attempt, "Reconnected; re-asserting subscriptions");
                inner.after_connect(connection).await;
                return;
            }
            Err(ClientError::Cancelled) => return,
            Err(e) if e.is_authentication() => {
                auth_rejections += 1;
                if auth_rejections > inner.config.max_auth_retries {
                    inner.give_up(ClientError::Authentication {
                        attempts: auth_rejections,
                        message: e.to_string(),
                    });
                    return;
                }
                warn!(
                    attempt,
                    rejections = auth_rejections,
                    "Hub rejected the access token; retrying with a fresh one"
                );
                inner.record_error(e);
            }
            Err(e) if !e.is_recoverable() => {
                inner.give_up(e);
                return;
            }
            Err(e) => {
                auth_rejections = 0;
                warn!(attempt, error = %e, "Reconnect attempt failed");
                inner.record_error(e);
            }
        }
    }
}

async fn poll_for_credential(manager: Weak<ManagerInner>, interval: Duration, window: Duration) {
    let deadline = Instant::now() + window;
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if Instant::now() > deadline {
            info!(?window, "No access token appeared; credential polling stopped");
            return;
        }
        let Some(inner) = manager.upgrade() else {
            return;
        };
        if inner.state.get() != ConnectionState::Disconnected {
            return;
        }

        match inner.tokens.token().await {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "Token provider failed while polling");
                continue;
            }
        }

        info!("Access token available; connecting");
        match inner.connect(Trigger::CredentialPoller).await {
            Ok(ConnectOutcome::Throttled { .. } | ConnectOutcome::NoCredential) => continue,
            Ok(outcome) => {
                debug!(?outcome, "Credential poller finished");
                return;
            }
            Err(e) => {
                debug!(error = %e, "Credential poller connect failed");
                return;
            }
        }
    }
}

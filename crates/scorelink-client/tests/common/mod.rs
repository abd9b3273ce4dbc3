//! Common test utilities for integration tests
//!
//! A scripted in-memory hub: every transport the factory creates records its
//! start calls and invocations in a shared [`MockHub`], and tests drive drops
//! and server pushes through it.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use scorelink_client::{
    ConnectRequest, ConnectionManager, ConnectionState, HubInvocation, HubTransport,
    ManagerConfig, TokenProvider, TransportError, TransportEventEmitter, TransportFactory,
    TransportHandle, TransportMetrics, TransportResult, TransportState, TransportType,
};

type BoxFuture<'a> = Pin<Box<dyn Future<Output = TransportResult<()>> + Send + 'a>>;

/// How the next `start` call behaves
#[derive(Debug, Clone)]
pub enum StartBehavior {
    Succeed,
    Fail(TransportError),
    Hang,
}

#[derive(Debug, Clone)]
pub struct StartRecord {
    pub transport: TransportType,
    pub url: String,
    pub at: Instant,
}

/// Shared script and log for every mock transport
#[derive(Debug, Default)]
pub struct MockHub {
    starts: Mutex<Vec<StartRecord>>,
    script: Mutex<VecDeque<StartBehavior>>,
    invocations: Mutex<Vec<(usize, HubInvocation)>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    failing_targets: Mutex<HashSet<String>>,
    start_delay: Mutex<Duration>,
    pub hang_invocations: AtomicBool,
    pub hang_stop: AtomicBool,
    pub pings: AtomicUsize,
    in_flight_starts: AtomicUsize,
    pub max_concurrent_starts: AtomicUsize,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue behaviors for upcoming `start` calls; unscripted starts succeed
    pub fn script(&self, behaviors: impl IntoIterator<Item = StartBehavior>) {
        self.script.lock().extend(behaviors);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = delay;
    }

    pub fn fail_target(&self, target: &str) {
        self.failing_targets.lock().insert(target.to_string());
    }

    pub fn starts(&self) -> Vec<StartRecord> {
        self.starts.lock().clone()
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().len()
    }

    /// Every invocation as `(transport index, invocation)`
    pub fn invocations(&self) -> Vec<(usize, HubInvocation)> {
        self.invocations.lock().clone()
    }

    /// Invocation targets sent over transport `index`, with their first argument
    pub fn calls_on(&self, index: usize) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .filter(|(id, _)| *id == index)
            .map(|(_, invocation)| describe(invocation))
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|(_, invocation)| describe(invocation))
            .collect()
    }

    pub fn clear_invocations(&self) {
        self.invocations.lock().clear();
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        Arc::clone(self.transports.lock().last().expect("no transport created"))
    }

    /// Simulate the connection dropping with an error
    pub fn drop_connection(&self) {
        let transport = self.latest();
        *transport.state.lock() = TransportState::Disconnected;
        transport
            .emitter
            .emit_closed(Some(TransportError::ConnectionLost("connection reset".into())));
    }

    /// The latest transport dies without emitting any event
    pub fn lose_silently(&self) {
        *self.latest().state.lock() = TransportState::Disconnected;
    }

    /// Simulate the hub closing the connection without an error
    pub fn close_cleanly(&self) {
        let transport = self.latest();
        *transport.state.lock() = TransportState::Disconnected;
        transport.emitter.emit_closed(None);
    }

    /// Push a server event over the latest transport
    pub fn push(&self, invocation: HubInvocation) {
        self.latest().emitter.emit_invocation(invocation);
    }
}

fn describe(invocation: &HubInvocation) -> String {
    match invocation.first_argument() {
        Some(argument) => format!("{}({})", invocation.target, argument),
        None => invocation.target.clone(),
    }
}

#[derive(Debug)]
pub struct MockTransport {
    index: usize,
    transport_type: TransportType,
    url: String,
    state: Mutex<TransportState>,
    emitter: TransportEventEmitter,
    hub: Arc<MockHub>,
}

impl HubTransport for MockTransport {
    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn start(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            self.hub.starts.lock().push(StartRecord {
                transport: self.transport_type,
                url: self.url.clone(),
                at: Instant::now(),
            });
            let behavior = self
                .hub
                .script
                .lock()
                .pop_front()
                .unwrap_or(StartBehavior::Succeed);

            let in_flight = self.hub.in_flight_starts.fetch_add(1, Ordering::SeqCst) + 1;
            self.hub
                .max_concurrent_starts
                .fetch_max(in_flight, Ordering::SeqCst);
            *self.state.lock() = TransportState::Connecting;

            let delay = *self.hub.start_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.hub.in_flight_starts.fetch_sub(1, Ordering::SeqCst);

            match behavior {
                StartBehavior::Succeed => {
                    *self.state.lock() = TransportState::Connected;
                    self.emitter
                        .emit_connected(self.transport_type, "mock://hub".to_string());
                    Ok(())
                }
                StartBehavior::Fail(error) => {
                    *self.state.lock() = TransportState::Disconnected;
                    Err(error)
                }
                StartBehavior::Hang => std::future::pending().await,
            }
        })
    }

    fn invoke(&self, invocation: HubInvocation) -> BoxFuture<'_> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            let target = invocation.target.clone();
            self.hub.invocations.lock().push((self.index, invocation));
            if self.hub.hang_invocations.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.hub.failing_targets.lock().contains(&target) {
                return Err(TransportError::InvocationFailed {
                    target,
                    message: "hub error".into(),
                });
            }
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            self.hub.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            if self.hub.hang_stop.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let previous = std::mem::replace(&mut *self.state.lock(), TransportState::Disconnected);
            if previous != TransportState::Disconnected {
                self.emitter.emit_closed(None);
            }
            Ok(())
        })
    }

    fn metrics(&self) -> TransportMetrics {
        TransportMetrics::default()
    }
}

/// Factory producing [`MockTransport`]s for a fixed set of transport types
#[derive(Debug)]
pub struct MockFactory {
    hub: Arc<MockHub>,
    supported: Vec<TransportType>,
}

impl MockFactory {
    pub fn new(hub: Arc<MockHub>) -> Self {
        Self::supporting(hub, TransportType::FALLBACK_ORDER.to_vec())
    }

    pub fn supporting(hub: Arc<MockHub>, supported: Vec<TransportType>) -> Self {
        Self { hub, supported }
    }
}

impl TransportFactory for MockFactory {
    fn supports(&self, transport_type: TransportType) -> bool {
        self.supported.contains(&transport_type)
    }

    fn create(
        &self,
        transport_type: TransportType,
        request: ConnectRequest,
    ) -> TransportResult<TransportHandle> {
        let (emitter, events) = TransportEventEmitter::new();
        let mut transports = self.hub.transports.lock();
        let transport = Arc::new(MockTransport {
            index: transports.len(),
            transport_type,
            url: request.url,
            state: Mutex::new(TransportState::Disconnected),
            emitter,
            hub: Arc::clone(&self.hub),
        });
        transports.push(Arc::clone(&transport));
        Ok(TransportHandle { transport, events })
    }
}

/// Config with short, round numbers for paused-clock tests
pub fn test_config() -> ManagerConfig {
    ManagerConfig::new("https://grades.example")
        .with_min_connect_interval(Duration::ZERO)
        .with_heartbeat_interval(Duration::from_secs(30))
        .with_health_check_interval(Duration::from_secs(60))
}

pub fn manager_with(
    config: ManagerConfig,
    hub: &Arc<MockHub>,
    tokens: impl TokenProvider + 'static,
) -> ConnectionManager {
    ConnectionManager::builder(config)
        .token_provider(tokens)
        .transport_factory(Arc::new(MockFactory::new(Arc::clone(hub))))
        .build()
        .expect("valid test config")
}

/// Wait until the manager reaches `state`, failing after `limit` of (paused) time
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState, limit: Duration) {
    let mut watch = manager.watch_state();
    tokio::time::timeout(limit, watch.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("manager did not reach {state} within {limit:?}"))
        .expect("state channel closed");
}

/// Let spawned tasks run without advancing the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

//! WebSocket hub transport
//!
//! `start` opens the socket, performs the hub handshake and spawns a reader
//! task. The reader task is the single consumer of the socket: it routes
//! completions to waiting `invoke` calls, forwards push invocations to the
//! event emitter, and reports an unrequested close exactly once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use scorelink_transport_traits::{
    AtomicMetrics, ConnectRequest, HubInvocation, HubTransport, TransportError,
    TransportEventEmitter, TransportEventReceiver, TransportMetrics, TransportResult,
    TransportState, TransportType,
};

use crate::config::WebSocketHubConfig;
use crate::protocol::{HubMessage, RecordBuffer, handshake_request, parse_handshake_response};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// WebSocket writer half, present only while connected
type WebSocketWriter = SplitSink<WsStream, Message>;
/// WebSocket reader half, owned by the reader task
type WebSocketReader = SplitStream<WsStream>;

/// Completion channel: `None` on success, the hub's error message otherwise
type CompletionSender = oneshot::Sender<Option<String>>;

/// What the reader task should do after handling a record
enum ReaderControl {
    Continue,
    Close(Option<TransportError>),
}

struct Inner {
    config: WebSocketHubConfig,
    request: ConnectRequest,
    state: RwLock<TransportState>,
    writer: Mutex<Option<WebSocketWriter>>,
    pending: DashMap<String, CompletionSender>,
    next_invocation_id: AtomicU64,
    emitter: TransportEventEmitter,
    metrics: AtomicMetrics,
}

/// Hub transport over a single WebSocket connection
pub struct WebSocketHubTransport {
    inner: Arc<Inner>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WebSocketHubTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketHubTransport")
            .field("endpoint", &self.inner.request.redacted_url())
            .field("state", &*self.inner.state.read())
            .field("pending_invocations", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl WebSocketHubTransport {
    /// Create a transport for `request`, returning it with its event receiver
    pub fn new(config: WebSocketHubConfig, request: ConnectRequest) -> (Self, TransportEventReceiver) {
        let (emitter, events) = TransportEventEmitter::new();
        let transport = Self {
            inner: Arc::new(Inner {
                config,
                request,
                state: RwLock::new(TransportState::Disconnected),
                writer: Mutex::new(None),
                pending: DashMap::new(),
                next_invocation_id: AtomicU64::new(1),
                emitter,
                metrics: AtomicMetrics::new(),
            }),
            reader_task: parking_lot::Mutex::new(None),
        };
        (transport, events)
    }

    /// Number of invocations awaiting a completion
    pub fn pending_invocations(&self) -> usize {
        self.inner.pending.len()
    }

    async fn open(&self) -> TransportResult<()> {
        let inner = &self.inner;
        let url = to_websocket_url(&inner.request.url)?;
        debug!("Opening hub websocket to {}", inner.request.redacted_url());

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(map_connect_error)?;
        let (mut writer, mut reader) = stream.split();

        writer
            .send(Message::text(handshake_request(
                &inner.config.protocol,
                inner.config.protocol_version,
            )))
            .await
            .map_err(|e| TransportError::SendFailed(format!("handshake send failed: {e}")))?;

        let mut buffer = RecordBuffer::new();
        let backlog = tokio::time::timeout(
            inner.config.handshake_timeout,
            read_handshake(&mut reader, &mut buffer),
        )
        .await
        .map_err(|_| TransportError::ConnectionTimeout {
            operation: "hub handshake".to_string(),
            timeout: inner.config.handshake_timeout,
        })??;

        *inner.writer.lock().await = Some(writer);
        *inner.state.write() = TransportState::Connected;

        let task = tokio::spawn(run_reader(Arc::clone(inner), reader, buffer, backlog));
        if let Some(previous) = self.reader_task.lock().replace(task) {
            previous.abort();
        }

        inner
            .emitter
            .emit_connected(TransportType::WebSockets, inner.request.redacted_url());
        info!("Hub websocket connected to {}", inner.request.redacted_url());
        Ok(())
    }

    async fn invoke_inner(&self, invocation: HubInvocation) -> TransportResult<()> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let id = inner
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let target = invocation.target.clone();
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id.clone(), tx);

        let record = HubMessage::Invocation {
            invocation_id: Some(id.clone()),
            invocation,
        }
        .to_record();

        let started = Instant::now();
        if let Err(e) = inner.send_record(record).await {
            inner.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(inner.config.invoke_timeout, rx).await {
            Ok(Ok(None)) => {
                inner
                    .metrics
                    .update_latency_us(started.elapsed().as_micros() as u64);
                trace!("Invocation {} ({}) completed", id, target);
                Ok(())
            }
            Ok(Ok(Some(message))) => {
                inner.metrics.failed_invocations.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::InvocationFailed { target, message })
            }
            Ok(Err(_)) => Err(TransportError::ConnectionLost(format!(
                "connection closed before '{target}' completed"
            ))),
            Err(_) => {
                inner.pending.remove(&id);
                inner.metrics.failed_invocations.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::RequestTimeout {
                    operation: target,
                    timeout: inner.config.invoke_timeout,
                })
            }
        }
    }

    async fn stop_inner(&self) -> TransportResult<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.write();
            if *state == TransportState::Disconnected {
                return Ok(());
            }
            *state = TransportState::Disconnecting;
        }

        let result = match inner.writer.lock().await.take() {
            Some(mut writer) => {
                let close = HubMessage::Close {
                    error: None,
                    allow_reconnect: false,
                }
                .to_record();
                let _ = writer.send(Message::text(close)).await;
                writer
                    .close()
                    .await
                    .map_err(|e| TransportError::SendFailed(format!("websocket close failed: {e}")))
            }
            None => Ok(()),
        };

        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        inner.pending.clear();
        *inner.state.write() = TransportState::Disconnected;
        inner.emitter.emit_closed(None);

        debug!("Hub websocket stopped");
        result
    }
}

impl HubTransport for WebSocketHubTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSockets
    }

    fn state(&self) -> TransportState {
        *self.inner.state.read()
    }

    fn start(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            {
                let mut state = self.inner.state.write();
                match *state {
                    TransportState::Connected => return Ok(()),
                    TransportState::Connecting => {
                        return Err(TransportError::ConnectionFailed(
                            "handshake already in progress".to_string(),
                        ));
                    }
                    _ => *state = TransportState::Connecting,
                }
            }

            let result = self.open().await;
            if result.is_err() {
                *self.inner.state.write() = TransportState::Disconnected;
            }
            result
        })
    }

    fn invoke(
        &self,
        invocation: HubInvocation,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(self.invoke_inner(invocation))
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            self.inner.send_record(HubMessage::Ping.to_record()).await?;
            self.inner.metrics.pings_sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(self.stop_inner())
    }

    fn metrics(&self) -> TransportMetrics {
        self.inner.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.inner.request.redacted_url())
    }
}

impl Drop for WebSocketHubTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.get_mut().take() {
            task.abort();
        }
    }
}

impl Inner {
    async fn send_record(&self, record: String) -> TransportResult<()> {
        let size = record.len();
        match self.writer.lock().await.as_mut() {
            Some(writer) => {
                writer
                    .send(Message::text(record))
                    .await
                    .map_err(|e| TransportError::SendFailed(format!("websocket send failed: {e}")))?;
                self.metrics.record_sent(size);
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    fn handle_record(&self, record: &str) -> ReaderControl {
        match HubMessage::parse(record) {
            Ok(HubMessage::Invocation {
                invocation_id: None,
                invocation,
            }) => {
                trace!("Hub pushed {}", invocation.target);
                self.emitter.emit_invocation(invocation);
            }
            Ok(HubMessage::Invocation {
                invocation_id: Some(id),
                invocation,
            }) => {
                debug!(
                    "Ignoring hub invocation {} ({}) that expects a client result",
                    id, invocation.target
                );
            }
            Ok(HubMessage::Completion {
                invocation_id,
                error,
            }) => match self.pending.remove(&invocation_id) {
                Some((_, tx)) => {
                    let _ = tx.send(error);
                }
                None => trace!("Completion for unknown invocation {}", invocation_id),
            },
            Ok(HubMessage::Ping) => trace!("Hub ping"),
            Ok(HubMessage::Close {
                error,
                allow_reconnect,
            }) => {
                let error = match (error, allow_reconnect) {
                    (Some(reason), _) => Some(TransportError::ConnectionLost(format!(
                        "hub closed the connection: {reason}"
                    ))),
                    (None, true) => Some(TransportError::ConnectionLost(
                        "hub closed the connection".to_string(),
                    )),
                    (None, false) => None,
                };
                return ReaderControl::Close(error);
            }
            Ok(HubMessage::Unsupported(kind)) => trace!("Ignoring hub message type {}", kind),
            Err(e) => warn!("Dropping malformed hub record: {}", e),
        }
        ReaderControl::Continue
    }

    async fn finish(&self, error: Option<TransportError>) {
        let requested = {
            let mut state = self.state.write();
            let requested = *state == TransportState::Disconnecting;
            *state = TransportState::Disconnected;
            requested
        };
        *self.writer.lock().await = None;
        self.pending.clear();

        if requested {
            return;
        }
        match &error {
            Some(e) => warn!("Hub websocket dropped: {}", e),
            None => info!("Hub closed the connection"),
        }
        self.emitter.emit_closed(error);
    }
}

async fn read_handshake(
    reader: &mut WebSocketReader,
    buffer: &mut RecordBuffer,
) -> TransportResult<Vec<String>> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                let mut records = buffer.push(text.as_str()).into_iter();
                if let Some(response) = records.next() {
                    parse_handshake_response(&response)?;
                    return Ok(records.collect());
                }
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "websocket closed during handshake: {frame:?}"
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
            None => {
                return Err(TransportError::ConnectionFailed(
                    "websocket ended during handshake".to_string(),
                ));
            }
        }
    }
}

async fn run_reader(
    inner: Arc<Inner>,
    mut reader: WebSocketReader,
    mut buffer: RecordBuffer,
    backlog: Vec<String>,
) {
    for record in backlog {
        if let ReaderControl::Close(error) = inner.handle_record(&record) {
            inner.finish(error).await;
            return;
        }
    }

    let error = 'read: loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                inner.metrics.record_received(text.len());
                for record in buffer.push(text.as_str()) {
                    if let ReaderControl::Close(error) = inner.handle_record(&record) {
                        break 'read error;
                    }
                }
                if buffer.pending_len() > inner.config.max_message_size {
                    break Some(TransportError::ProtocolError(format!(
                        "record exceeds {} bytes",
                        inner.config.max_message_size
                    )));
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break Some(TransportError::ConnectionLost(format!(
                    "websocket closed: {frame:?}"
                )));
            }
            // Pings are answered by tungstenite; binary frames are not part of the JSON protocol
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(TransportError::ConnectionLost(e.to_string())),
            None => {
                break Some(TransportError::ConnectionLost(
                    "websocket stream ended".to_string(),
                ));
            }
        }
    };

    inner.finish(error).await;
}

/// Rewrites an `http(s)` hub URL to the matching `ws(s)` scheme
pub(crate) fn to_websocket_url(raw: &str) -> TransportResult<String> {
    let mut url = Url::parse(raw)
        .map_err(|e| TransportError::ConfigurationError(format!("invalid hub url: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::ConfigurationError(format!(
                "unsupported hub url scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|()| {
        TransportError::ConfigurationError("cannot convert hub url to websocket".to_string())
    })?;
    Ok(url.into())
}

fn map_connect_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(ref response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            TransportError::AuthenticationFailed(format!(
                "hub rejected the access token ({})",
                response.status()
            ))
        }
        tungstenite::Error::Url(e) => TransportError::ConfigurationError(e.to_string()),
        other => TransportError::ConnectionFailed(format!("websocket connection failed: {other}")),
    }
}

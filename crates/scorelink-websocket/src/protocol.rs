//! JSON hub protocol framing and message types
//!
//! Every record is a JSON object terminated by [`RECORD_SEPARATOR`]. A single
//! WebSocket text frame may carry several records, and a record may in
//! principle be split across frames, so inbound text goes through a
//! [`RecordBuffer`].

use serde_json::{Value, json};

use scorelink_transport_traits::{HubInvocation, TransportError, TransportResult};

/// Terminates every record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const TYPE_INVOCATION: u64 = 1;
const TYPE_COMPLETION: u64 = 3;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

/// A decoded hub protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// A method invocation. Client-bound invocations carry no id.
    Invocation {
        /// Correlation id; present only when a completion is expected.
        invocation_id: Option<String>,
        /// Target and arguments.
        invocation: HubInvocation,
    },

    /// Completion of a client invocation.
    Completion {
        /// Id of the invocation being completed.
        invocation_id: String,
        /// Error reported by the hub, if the invocation failed.
        error: Option<String>,
    },

    /// Keep-alive.
    Ping,

    /// The hub is closing the connection.
    Close {
        /// Reason given by the hub.
        error: Option<String>,
        /// Whether the hub allows the client to reconnect.
        allow_reconnect: bool,
    },

    /// Stream items, stream invocations and cancellations; not used by this client.
    Unsupported(u64),
}

impl HubMessage {
    /// Decodes one record (without its separator).
    pub fn parse(record: &str) -> TransportResult<Self> {
        let value: Value = serde_json::from_str(record)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransportError::ProtocolError("record has no message type".into()))?;

        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_owned);

        match kind {
            TYPE_INVOCATION => {
                let target = text("target").ok_or_else(|| {
                    TransportError::ProtocolError("invocation has no target".into())
                })?;
                let arguments = match value.get("arguments") {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => {
                        return Err(TransportError::ProtocolError(
                            "invocation arguments must be an array".into(),
                        ));
                    }
                };
                Ok(Self::Invocation {
                    invocation_id: text("invocationId"),
                    invocation: HubInvocation { target, arguments },
                })
            }
            TYPE_COMPLETION => Ok(Self::Completion {
                invocation_id: text("invocationId").ok_or_else(|| {
                    TransportError::ProtocolError("completion has no invocationId".into())
                })?,
                error: text("error"),
            }),
            TYPE_PING => Ok(Self::Ping),
            TYPE_CLOSE => Ok(Self::Close {
                error: text("error"),
                allow_reconnect: value
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => Ok(Self::Unsupported(other)),
        }
    }

    /// Encodes the message as a terminated record.
    pub fn to_record(&self) -> String {
        let value = match self {
            Self::Invocation {
                invocation_id,
                invocation,
            } => {
                let mut value = json!({
                    "type": TYPE_INVOCATION,
                    "target": invocation.target,
                    "arguments": invocation.arguments,
                });
                if let Some(id) = invocation_id {
                    value["invocationId"] = json!(id);
                }
                value
            }
            Self::Completion {
                invocation_id,
                error,
            } => {
                let mut value = json!({ "type": TYPE_COMPLETION, "invocationId": invocation_id });
                if let Some(error) = error {
                    value["error"] = json!(error);
                }
                value
            }
            Self::Ping => json!({ "type": TYPE_PING }),
            Self::Close {
                error,
                allow_reconnect,
            } => {
                let mut value = json!({ "type": TYPE_CLOSE });
                if let Some(error) = error {
                    value["error"] = json!(error);
                }
                if *allow_reconnect {
                    value["allowReconnect"] = json!(true);
                }
                value
            }
            Self::Unsupported(kind) => json!({ "type": kind }),
        };
        format!("{value}{RECORD_SEPARATOR}")
    }
}

/// Builds the handshake request record.
pub fn handshake_request(protocol: &str, version: u32) -> String {
    format!(
        "{}{RECORD_SEPARATOR}",
        json!({ "protocol": protocol, "version": version })
    )
}

/// Checks the hub's handshake response record (without its separator).
pub fn parse_handshake_response(record: &str) -> TransportResult<()> {
    let value: Value = serde_json::from_str(record)?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(TransportError::ProtocolError(format!(
            "hub rejected handshake: {error}"
        ))),
        None => Ok(()),
    }
}

/// Accumulates inbound text and yields complete records.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pending: String,
}

impl RecordBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` and returns every record it completed, in order.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let Some(last) = self.pending.rfind(RECORD_SEPARATOR) else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last + RECORD_SEPARATOR.len_utf8());
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(RECORD_SEPARATOR)
            .filter(|record| !record.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Number of buffered bytes that do not yet form a record.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

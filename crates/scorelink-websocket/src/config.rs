//! Configuration types for the WebSocket hub transport

use std::time::Duration;

/// Configuration for the WebSocket hub transport
#[derive(Clone, Debug)]
pub struct WebSocketHubConfig {
    /// Maximum inbound message size (default: 16MB)
    pub max_message_size: usize,

    /// Time allowed for the hub to answer the protocol handshake
    pub handshake_timeout: Duration,

    /// Time to wait for an invocation completion
    pub invoke_timeout: Duration,

    /// Hub protocol name sent in the handshake
    pub protocol: String,

    /// Hub protocol version sent in the handshake
    pub protocol_version: u32,
}

impl Default for WebSocketHubConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024, // 16MB
            handshake_timeout: Duration::from_secs(15),
            invoke_timeout: Duration::from_secs(10),
            protocol: "json".to_string(),
            protocol_version: 1,
        }
    }
}

impl WebSocketHubConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set invocation timeout
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }
}

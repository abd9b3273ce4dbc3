//! Transport factory for the WebSockets transport type

use std::sync::Arc;

use tracing::debug;

use scorelink_transport_traits::{
    ConnectRequest, TransportError, TransportFactory, TransportHandle, TransportResult,
    TransportType,
};

use crate::config::WebSocketHubConfig;
use crate::transport::WebSocketHubTransport;

/// Creates [`WebSocketHubTransport`]s. Other transport types are reported as unavailable.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransportFactory {
    config: WebSocketHubConfig,
}

impl WebSocketTransportFactory {
    /// Create a factory using `config` for every transport it creates
    pub fn new(config: WebSocketHubConfig) -> Self {
        Self { config }
    }

    /// Configuration handed to created transports
    pub fn config(&self) -> &WebSocketHubConfig {
        &self.config
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn supports(&self, transport_type: TransportType) -> bool {
        transport_type == TransportType::WebSockets
    }

    fn create(
        &self,
        transport_type: TransportType,
        request: ConnectRequest,
    ) -> TransportResult<TransportHandle> {
        if !self.supports(transport_type) {
            return Err(TransportError::NotAvailable(format!(
                "{transport_type} transport is not built into this client"
            )));
        }

        debug!("Creating websocket transport for {}", request.redacted_url());
        let (transport, events) = WebSocketHubTransport::new(self.config.clone(), request);
        Ok(TransportHandle {
            transport: Arc::new(transport),
            events,
        })
    }
}

//! Host-facing entry points.
//!
//! [`Gateway`] is the five-operation surface hosts talk to. It holds no logic
//! of its own: connect/disconnect go to the [`ConnectionManager`], invocations
//! go to the [`Bridge`].

use crate::bridge::Bridge;
use crate::cancel::CancellationToken;
use crate::config::{BridgeConfig, ConnectOptions};
use crate::connection::ConnectionManager;
use crate::registry::{default_registrations, RegistrationUnit, Registry, RegistryBuilder};
use crate::transport::{TcpTransport, Transport};
use crate::{GatewayError, Result};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Process-wide gateway: registry, connection and bridge.
pub struct Gateway {
    bridge: Arc<Bridge>,
    connections: Arc<ConnectionManager>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Always true once constructed; hosts use it as an initialization signal.
    pub fn is_ready(&self) -> bool {
        true
    }

    /// Connect to the backend.
    ///
    /// `dev_mode` disables certificate validation for auxiliary HTTP calls.
    /// Only for development endpoints.
    pub async fn connect_server(
        &self,
        server_address: &str,
        dev_mode: bool,
        pairing_secret: &str,
    ) -> Result<()> {
        let options = ConnectOptions::new(server_address, pairing_secret).dev_mode(dev_mode);
        self.connections.connect(options).await
    }

    pub fn is_connected(&self) -> bool {
        self.connections.is_connected()
    }

    pub async fn disconnect(&self) {
        self.connections.disconnect().await
    }

    /// Invoke `method_name` with an opaque request payload.
    ///
    /// `callback(result, error)` fires exactly once, possibly before this
    /// returns.
    pub fn invoke_rpc<F>(&self, method_name: &str, request: impl Into<String>, callback: F)
    where
        F: FnOnce(String, Option<String>) + Send + 'static,
    {
        self.bridge.invoke(method_name, request, callback);
    }

    /// Cancel in-flight calls, wait for them to report, then disconnect.
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.shutdown.cancel();

        let pending = self.bridge.in_flight();
        if pending > 0 {
            info!("Waiting for {} in-flight calls", pending);
        }
        if tokio::time::timeout(BridgeConfig::SHUTDOWN_DRAIN_TIMEOUT, self.bridge.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "{} calls still in flight after {:?}",
                self.bridge.in_flight(),
                BridgeConfig::SHUTDOWN_DRAIN_TIMEOUT
            );
        }

        self.connections.disconnect().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.bridge.registry()
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("bridge", &self.bridge)
            .field("state", &self.connections.state())
            .finish()
    }
}

/// Builder for [`Gateway`].
///
/// # Example
///
/// ```rust,ignore
/// use rpcgate::Gateway;
///
/// let gateway = Gateway::builder()
///     .with_default_registrations()
///     .build()?;
/// ```
pub struct GatewayBuilder {
    transport: Option<Arc<dyn Transport>>,
    units: Vec<Box<dyn RegistrationUnit>>,
    runtime: Option<Handle>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            units: Vec::new(),
            runtime: None,
        }
    }

    /// Transport used to open the backend connection. Defaults to TCP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Append one registration unit. Units apply in the order added.
    pub fn with_registration(mut self, unit: impl RegistrationUnit + 'static) -> Self {
        self.units.push(Box::new(unit));
        self
    }

    pub fn with_registrations(mut self, units: Vec<Box<dyn RegistrationUnit>>) -> Self {
        self.units.extend(units);
        self
    }

    /// Append the built-in catalog.
    pub fn with_default_registrations(self) -> Self {
        self.with_registrations(default_registrations())
    }

    /// Runtime that scheduled calls are spawned on. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the registry and the gateway.
    ///
    /// Fails if two units register the same method name, or if no runtime was
    /// given and none is current.
    pub fn build(self) -> Result<Gateway> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| GatewayError::Config {
                message: format!("No tokio runtime available: {}", e),
            })?,
        };

        let mut registry = RegistryBuilder::new();
        registry.apply(&self.units)?;
        let registry = Arc::new(registry.build());

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport) as Arc<dyn Transport>);
        let connections = Arc::new(ConnectionManager::new(transport));
        let shutdown = CancellationToken::new();
        let bridge = Arc::new(Bridge::new(
            registry,
            connections.clone(),
            runtime,
            shutdown.clone(),
        ));

        Ok(Gateway {
            bridge,
            connections,
            shutdown,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

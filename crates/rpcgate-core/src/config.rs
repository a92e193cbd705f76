//! Centralized configuration for rpcgate.
//!
//! Constants for timeouts and wire limits, plus the options a host passes to
//! `connect_server`.

use std::time::Duration;

/// Gateway-wide configuration constants.
pub struct BridgeConfig;

impl BridgeConfig {
    pub const USER_AGENT: &'static str = "rpcgate/0.3";

    // Connection lifecycle
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    // Wire format
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_BACKEND_CONNECTIONS: usize = 32;

    // Auxiliary REST calls
    pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    // Teardown
    pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Options for establishing the backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Address of the relay / backend, `host:port`.
    pub server_address: String,
    /// Disable certificate validation for auxiliary HTTP calls.
    ///
    /// Only meant for development endpoints with self-signed certificates.
    pub dev_mode: bool,
    /// Secret used by the transport to authenticate the session.
    pub pairing_secret: String,
}

impl ConnectOptions {
    pub fn new(server_address: impl Into<String>, pairing_secret: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            dev_mode: false,
            pairing_secret: pairing_secret.into(),
        }
    }

    /// Enable or disable dev mode. Default: `false`.
    pub fn dev_mode(mut self, enable: bool) -> Self {
        self.dev_mode = enable;
        self
    }

    /// Base URL for auxiliary REST calls against the same server.
    pub fn rest_base_url(&self) -> String {
        if self.server_address.starts_with("http://") || self.server_address.starts_with("https://")
        {
            self.server_address.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.server_address.trim_end_matches('/'))
        }
    }
}

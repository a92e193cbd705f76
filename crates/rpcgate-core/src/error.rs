//! Error types for rpcgate.
//!
//! Every failure of an invocation ends up in the host's completion callback as
//! a message string, so the variants here exist for logging, JSON-RPC error
//! codes and the FFI error mapping rather than for host-side matching.

use thiserror::Error;

/// Main error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    // Invocation errors
    #[error("RPC connection not ready")]
    NotConnected,

    #[error("rpc with name {method} not found")]
    MethodNotFound { method: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Internal fault: {message}")]
    InternalFault { message: String },

    #[error("Call cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    // Connection lifecycle errors
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Pairing rejected by {address}")]
    PairingRejected { address: String },

    // Registry errors
    #[error("Method {method} registered twice (by unit {unit})")]
    DuplicateMethod { method: String, unit: String },

    // Payload and parameter errors
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(crate::config::BridgeConfig::HTTP_REQUEST_TIMEOUT)
        } else {
            GatewayError::Transport {
                message: err.to_string(),
            }
        }
    }
}

impl GatewayError {
    /// Build a transport error from anything displayable.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        GatewayError::Transport {
            message: message.to_string(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard codes:
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes (-32000 to -32099):
    /// - -32000: Transport / connect failure
    /// - -32001: Not connected
    /// - -32004: Cancelled
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            GatewayError::MethodNotFound { .. } => -32601,

            GatewayError::InvalidParams { .. } | GatewayError::Json { .. } => -32602,

            GatewayError::Transport { .. }
            | GatewayError::Connect { .. }
            | GatewayError::PairingRejected { .. }
            | GatewayError::Timeout(_)
            | GatewayError::Io { .. } => -32000,

            GatewayError::NotConnected => -32001,

            GatewayError::Cancelled => -32004,

            _ => -32603,
        }
    }

    /// Whether the failure means the backend connection itself is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. } | GatewayError::Io { .. }
        )
    }
}

//! UniFFI bindings for rpcgate.
//!
//! Exposes the gateway's entry points to foreign runtimes (Python, Kotlin,
//! Swift, C#, ...) as free functions over one process-wide gateway. The
//! gateway and the tokio runtime it schedules calls on are created on first
//! use and live for the rest of the process.
//!
//! # Usage
//!
//! ```bash
//! # Build the cdylib
//! cargo build -p rpcgate-uniffi --release
//!
//! # Generate Python bindings
//! cargo run -p rpcgate-uniffi --features cli --bin rpcgate-uniffi-bindgen -- \
//!     generate --library --language python \
//!     --out-dir ./bindings/python target/release/librpcgate_uniffi.so
//! ```
//!
//! Results of `invoke_rpc` arrive on a runtime worker thread through the
//! supplied [`RpcCallback`].

use rpcgate::{Gateway, GatewayError};
use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

uniffi::setup_scaffolding!();

/// FFI-friendly error type.
///
/// Flattened version of `GatewayError`; sources are folded into the message.
#[derive(Debug, Clone, uniffi::Error, thiserror::Error)]
pub enum FfiError {
    #[error("RPC connection not ready")]
    NotConnected,

    #[error("rpc with name {method} not found")]
    MethodNotFound { method: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connect failed: {message}")]
    Connect { message: String },

    #[error("Pairing rejected by {address}")]
    PairingRejected { address: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<GatewayError> for FfiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConnected => FfiError::NotConnected,
            GatewayError::MethodNotFound { method } => FfiError::MethodNotFound { method },
            GatewayError::Transport { message } => FfiError::Transport { message },
            GatewayError::Io { message, .. } => FfiError::Transport { message },
            GatewayError::Connect { address, message } => FfiError::Connect {
                message: format!("{}: {}", address, message),
            },
            GatewayError::PairingRejected { address } => FfiError::PairingRejected { address },
            GatewayError::InvalidParams { message } => FfiError::InvalidParams { message },
            GatewayError::Json { message, .. } => FfiError::InvalidParams { message },
            GatewayError::Timeout(duration) => FfiError::Timeout {
                message: format!("timed out after {:?}", duration),
            },
            GatewayError::Cancelled => FfiError::Cancelled,
            GatewayError::Config { message } => FfiError::Config { message },
            GatewayError::DuplicateMethod { method, unit } => FfiError::Config {
                message: format!("method {} registered twice ({})", method, unit),
            },
            GatewayError::InternalFault { message } => FfiError::Internal { message },
        }
    }
}

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

/// Receives the outcome of one `invoke_rpc` call.
///
/// Called exactly once. On success `error` is `None`; on failure `result` is
/// empty and `error` holds the message.
#[uniffi::export(callback_interface)]
pub trait RpcCallback: Send + Sync {
    fn on_complete(&self, result: String, error: Option<String>);
}

struct Host {
    runtime: Runtime,
    gateway: Gateway,
}

static HOST: OnceLock<FfiResult<Host>> = OnceLock::new();

impl Host {
    fn start() -> FfiResult<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .try_init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("rpcgate-worker")
            .build()
            .map_err(|e| FfiError::Config {
                message: format!("Failed to start runtime: {}", e),
            })?;

        let gateway = Gateway::builder()
            .with_default_registrations()
            .runtime(runtime.handle().clone())
            .build()?;

        info!(
            "rpcgate bindings ready: {} methods registered",
            gateway.registry().len()
        );
        Ok(Self { runtime, gateway })
    }

    /// Run `f` on the runtime and wait for its result.
    ///
    /// Works from any thread, including a runtime worker running a callback.
    fn run<F, Fut>(&'static self, f: F) -> FfiResult<Fut::Output>
    where
        F: FnOnce(&'static Gateway) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        let fut = f(&self.gateway);
        self.runtime.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.recv().map_err(|_| FfiError::Internal {
            message: "runtime dropped the task".to_string(),
        })
    }
}

fn host() -> FfiResult<&'static Host> {
    HOST.get_or_init(Host::start).as_ref().map_err(Clone::clone)
}

/// Get the version of the rpcgate-uniffi bindings.
#[uniffi::export]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// True once the bindings have initialised and can accept `connect_server`.
#[uniffi::export]
pub fn is_ready() -> bool {
    host().map(|h| h.gateway.is_ready()).unwrap_or(false)
}

/// Connect to the backend. `dev_mode` disables certificate validation for
/// auxiliary HTTP calls and must only be used against development servers.
#[uniffi::export]
pub fn connect_server(
    server_address: String,
    dev_mode: bool,
    pairing_secret: String,
) -> Result<(), FfiError> {
    host()?.run(move |gateway| async move {
        gateway
            .connect_server(&server_address, dev_mode, &pairing_secret)
            .await
    })??;
    Ok(())
}

#[uniffi::export]
pub fn is_connected() -> bool {
    host().map(|h| h.gateway.is_connected()).unwrap_or(false)
}

/// Close the backend connection. Calling it while disconnected is a no-op.
#[uniffi::export]
pub fn disconnect() {
    if let Ok(host) = host() {
        if let Err(e) = host.run(|gateway| gateway.disconnect()) {
            warn!("Disconnect did not complete: {}", e);
        }
    }
}

/// Invoke a registered method by name.
///
/// Returns immediately; `callback` fires exactly once with the outcome.
#[uniffi::export]
pub fn invoke_rpc(method_name: String, request_json: String, callback: Box<dyn RpcCallback>) {
    match host() {
        Ok(host) => host
            .gateway
            .invoke_rpc(&method_name, request_json, move |result, error| {
                callback.on_complete(result, error)
            }),
        Err(e) => callback.on_complete(String::new(), Some(e.to_string())),
    }
}

/// Cancel in-flight calls and disconnect. For host teardown.
#[uniffi::export]
pub fn shutdown() {
    if let Ok(host) = host() {
        if let Err(e) = host.run(|gateway| gateway.shutdown()) {
            warn!("Shutdown did not complete: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcgate::{BackendDispatch, BackendServer};
    use serde_json::{json, Value};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    struct ChannelCallback(mpsc::Sender<(String, Option<String>)>);

    impl RpcCallback for ChannelCallback {
        fn on_complete(&self, result: String, error: Option<String>) {
            let _ = self.0.send((result, error));
        }
    }

    fn invoke(method: &str, request: &str) -> (String, Option<String>) {
        let (tx, rx) = mpsc::channel();
        invoke_rpc(
            method.to_string(),
            request.to_string(),
            Box::new(ChannelCallback(tx)),
        );
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    struct InfoBackend;

    #[async_trait::async_trait]
    impl BackendDispatch for InfoBackend {
        async fn dispatch(&self, method: &str, _params: Value) -> rpcgate::Result<Value> {
            match method {
                "lnrpc.Lightning.GetInfo" => Ok(json!({"version": "1.0"})),
                other => Err(GatewayError::MethodNotFound {
                    method: other.to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_version() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_error_conversion() {
        let err: FfiError = GatewayError::NotConnected.into();
        assert_eq!(err.to_string(), "RPC connection not ready");

        let err: FfiError = GatewayError::MethodNotFound {
            method: "GetInfo".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "rpc with name GetInfo not found");

        let err: FfiError = GatewayError::PairingRejected {
            address: "relay.example:443".to_string(),
        }
        .into();
        assert!(matches!(err, FfiError::PairingRejected { .. }));
    }

    #[test]
    fn test_run_reports_a_task_that_never_finishes() {
        let host = host().unwrap();
        let outcome = host.run(|_| async {
            if true {
                panic!("task died");
            }
        });
        assert!(matches!(outcome, Err(FfiError::Internal { .. })));
    }

    // The gateway is process-wide, so the whole lifecycle runs in one test.
    #[test]
    fn test_lifecycle_through_bindings() {
        let backend_rt = tokio::runtime::Runtime::new().unwrap();
        let backend = backend_rt
            .block_on(BackendServer::start("correct-secret", Arc::new(InfoBackend)))
            .unwrap();
        let address = backend.addr().to_string();

        assert!(is_ready());
        assert!(!is_connected());

        let (result, error) = invoke("lnrpc.Lightning.GetInfo", "{}");
        assert_eq!(result, "");
        assert_eq!(error.as_deref(), Some("RPC connection not ready"));

        let err = connect_server(address.clone(), false, "wrong-secret".to_string()).unwrap_err();
        assert!(matches!(err, FfiError::PairingRejected { .. }));
        assert!(!is_connected());

        connect_server(address, false, "correct-secret".to_string()).unwrap();
        assert!(is_connected());

        let (result, error) = invoke("lnrpc.Lightning.GetInfo", "{}");
        assert_eq!(result, r#"{"version":"1.0"}"#);
        assert!(error.is_none());

        let (result, error) = invoke("Bogus", "{}");
        assert_eq!(result, "");
        assert_eq!(error.as_deref(), Some("rpc with name Bogus not found"));

        disconnect();
        disconnect();
        assert!(!is_connected());

        drop(backend);
        drop(backend_rt);
    }
}

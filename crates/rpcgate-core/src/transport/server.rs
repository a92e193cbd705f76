//! Loopback backend speaking the TCP transport protocol.
//!
//! Listens on `127.0.0.1:0` (OS-assigned port), requires the pairing
//! handshake on every connection and dispatches the following calls to a
//! [`BackendDispatch`]. Calls on one connection run concurrently and answer
//! in completion order. Used for development against a local stand-in and by
//! the test suites.

use super::protocol::{
    read_frame, write_frame, WireRequest, WireResponse, PAIRING_REJECTED_CODE, PAIR_METHOD,
};
use crate::config::BridgeConfig;
use crate::{GatewayError, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Handle to a running backend. Dropping shuts it down.
pub struct BackendServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl BackendServerHandle {
    /// Address the backend is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the active ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for BackendServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Dispatches method calls arriving at the backend.
#[async_trait::async_trait]
pub trait BackendDispatch: Send + Sync + 'static {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

/// Loopback backend server.
pub struct BackendServer;

impl BackendServer {
    /// Start on a random local port.
    pub async fn start<D: BackendDispatch>(
        pairing_secret: impl Into<String>,
        dispatch: Arc<D>,
    ) -> Result<BackendServerHandle> {
        Self::bind("127.0.0.1:0", pairing_secret, dispatch).await
    }

    /// Start on an explicit address.
    pub async fn bind<D: BackendDispatch>(
        addr: &str,
        pairing_secret: impl Into<String>,
        dispatch: Arc<D>,
    ) -> Result<BackendServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Backend listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::new(pairing_secret.into()),
            dispatch,
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(BackendServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<D: BackendDispatch>(
        listener: TcpListener,
        secret: Arc<String>,
        dispatch: Arc<D>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Backend shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if active_connections.load(Ordering::Relaxed)
                                >= BridgeConfig::MAX_BACKEND_CONNECTIONS
                            {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    BridgeConfig::MAX_BACKEND_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let dispatch = dispatch.clone();
                            let secret = secret.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Backend connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    &secret,
                                    dispatch,
                                    &mut conn_shutdown,
                                )
                                .await
                                {
                                    debug!("Backend connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Backend accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<D: BackendDispatch>(
        stream: TcpStream,
        secret: &str,
        dispatch: Arc<D>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        // Dropped with the connection, which aborts whatever is still running.
        let mut in_flight = JoinSet::new();
        let mut paired = false;

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            let request: WireRequest = match serde_json::from_slice(&frame) {
                Ok(req) => req,
                Err(e) => {
                    let response = WireResponse::error(None, -32700, format!("Parse error: {}", e));
                    Self::send(&writer, &response).await?;
                    continue;
                }
            };

            if !paired {
                let response = Self::pair(&request, secret);
                let accepted = response.error.is_none();
                Self::send(&writer, &response).await?;
                if !accepted {
                    return Err(GatewayError::PairingRejected {
                        address: "client".to_string(),
                    });
                }
                paired = true;
                continue;
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    warn!("Backend dispatch task failed: {}", e);
                }
            }

            let dispatch = dispatch.clone();
            let writer = writer.clone();
            in_flight.spawn(async move {
                let response = Self::process_request(request, &*dispatch).await;
                if let Err(e) = Self::send(&writer, &response).await {
                    debug!("Failed to send backend response: {}", e);
                }
            });
        }
    }

    async fn send(writer: &Mutex<OwnedWriteHalf>, response: &WireResponse) -> Result<()> {
        let bytes = serde_json::to_vec(response)?;
        let mut writer = writer.lock().await;
        write_frame(&mut *writer, &bytes).await
    }

    fn pair(request: &WireRequest, secret: &str) -> WireResponse {
        let offered = request
            .params
            .as_ref()
            .and_then(|p| p.get("secret"))
            .and_then(|s| s.as_str());

        if request.method == PAIR_METHOD && offered == Some(secret) {
            WireResponse::success(request.id.clone(), serde_json::json!({ "paired": true }))
        } else {
            WireResponse::error(
                request.id.clone(),
                PAIRING_REJECTED_CODE,
                "pairing rejected".to_string(),
            )
        }
    }

    async fn process_request<D: BackendDispatch>(
        request: WireRequest,
        dispatch: &D,
    ) -> WireResponse {
        if request.jsonrpc != "2.0" {
            return WireResponse::error(
                request.id,
                -32600,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            );
        }

        let params = request
            .params
            .unwrap_or(Value::Object(Default::default()));

        match dispatch.dispatch(&request.method, params).await {
            Ok(result) => WireResponse::success(request.id, result),
            Err(e) => WireResponse::error(request.id, e.to_rpc_error_code(), e.to_string()),
        }
    }
}

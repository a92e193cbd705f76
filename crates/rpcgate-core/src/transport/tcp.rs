//! TCP client transport.
//!
//! Connects to the backend, performs the pairing handshake and then
//! multiplexes calls over the one stream, matching responses to callers by
//! JSON-RPC `id`.
//!
//! # Thread Safety
//!
//! Writers take turns on the write half behind a tokio `Mutex`, held only for
//! one frame. A single reader task owns the read half and hands each response
//! to the waiting caller, so a slow call never holds up the others. Closing
//! the connection, or the peer going away, fails every waiting call with a
//! transport error.

use super::protocol::{
    parse_payload, read_frame, write_frame, WireRequest, WireResponse, PAIRING_REJECTED_CODE,
};
use super::{Connection, Transport};
use crate::cancel::CancellationToken;
use crate::config::{BridgeConfig, ConnectOptions};
use crate::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Transport that opens [`TcpConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn Connection>> {
        let conn = TcpConnection::connect(options).await?;
        Ok(Arc::new(conn))
    }
}

type Waiter = oneshot::Sender<Result<WireResponse>>;

/// State shared between callers and the reader task.
#[derive(Debug, Default)]
struct Shared {
    pending: std::sync::Mutex<HashMap<u64, Waiter>>,
    closed: AtomicBool,
    closing: CancellationToken,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a waiter for `id`. Fails once the connection is closed.
    fn register(&self, id: u64, waiter: Waiter) -> Result<PendingCall<'_>> {
        let mut pending = self.pending();
        // Checked under the lock: `shut` sets the flag before draining.
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        pending.insert(id, waiter);
        Ok(PendingCall { shared: self, id })
    }

    /// Mark closed and fail every waiting call with `reason`.
    fn shut(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        self.closing.cancel();
        let waiters: Vec<Waiter> = self.pending().drain().map(|(_, w)| w).collect();
        if !waiters.is_empty() {
            debug!("Failing {} pending calls: {}", waiters.len(), reason);
        }
        for waiter in waiters {
            let _ = waiter.send(Err(GatewayError::transport(reason)));
        }
    }
}

/// Removes its waiter when the call finishes or is dropped.
struct PendingCall<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// Shuts the connection if a frame write does not complete.
struct PoisonOnDrop<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for PoisonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            // A partial frame leaves the stream out of sync.
            self.shared.shut("connection closed after an interrupted write");
        }
    }
}

fn closed_error() -> GatewayError {
    GatewayError::transport("connection closed")
}

/// A paired TCP connection to the backend.
#[derive(Debug)]
pub struct TcpConnection {
    writer: Mutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    peer: String,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

/// Strip an optional URL scheme so `https://host:port/` dials `host:port`.
fn dial_target(address: &str) -> &str {
    address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
        .unwrap_or(address)
        .trim_end_matches('/')
}

impl TcpConnection {
    /// Connect and pair.
    ///
    /// Bounded by `BridgeConfig::CONNECT_TIMEOUT` for the whole exchange.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let address = options.server_address.clone();
        tokio::time::timeout(BridgeConfig::CONNECT_TIMEOUT, Self::connect_inner(options))
            .await
            .map_err(|_| GatewayError::Connect {
                address,
                message: format!("timed out after {:?}", BridgeConfig::CONNECT_TIMEOUT),
            })?
    }

    async fn connect_inner(options: &ConnectOptions) -> Result<Self> {
        let address = options.server_address.clone();
        let connect_err = |e: &dyn std::fmt::Display| GatewayError::Connect {
            address: address.clone(),
            message: e.to_string(),
        };

        let mut stream = TcpStream::connect(dial_target(&options.server_address))
            .await
            .map_err(|e| connect_err(&e))?;
        stream.set_nodelay(true).map_err(|e| connect_err(&e))?;

        let (mut reader, mut writer) = stream.split();
        let pair = serde_json::to_vec(&WireRequest::pair(&options.pairing_secret))?;
        write_frame(&mut writer, &pair)
            .await
            .map_err(|e| connect_err(&e))?;

        let frame = read_frame(&mut reader)
            .await
            .map_err(|e| connect_err(&e))?
            .ok_or_else(|| connect_err(&"connection closed during pairing"))?;
        let response: WireResponse = serde_json::from_slice(&frame)?;

        if let Some(err) = response.error {
            if err.code == PAIRING_REJECTED_CODE {
                return Err(GatewayError::PairingRejected { address });
            }
            return Err(connect_err(&err.message));
        }

        debug!("Paired with backend at {}", address);

        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(Self::read_loop(read_half, shared.clone(), address.clone()));

        Ok(Self {
            writer: Mutex::new(write_half),
            shared,
            peer: address,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Route responses to their callers until the stream ends.
    async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>, peer: String) {
        let reason = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break "connection closed by peer".to_string(),
                    Err(e) => break e.to_string(),
                },
                _ = shared.closing.cancelled() => break "connection closed".to_string(),
            };

            let response: WireResponse = match serde_json::from_slice(&frame) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Unparseable response from {}: {}", peer, e);
                    continue;
                }
            };

            let Some(id) = response.id.as_ref().and_then(|id| id.as_u64()) else {
                warn!("Response from {} without a call id", peer);
                continue;
            };

            let waiter = shared.pending().remove(&id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(Ok(response));
                }
                None => debug!("Dropping response {} from {}: caller gone", id, peer),
            }
        };

        debug!("Reader for {} stopped: {}", peer, reason);
        shared.shut(&reason);
    }

    async fn send_frame(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = tokio::select! {
            writer = self.writer.lock() => writer,
            _ = self.shared.closing.cancelled() => return Err(closed_error()),
        };
        if self.is_closed() {
            return Err(closed_error());
        }

        let mut poison = PoisonOnDrop {
            shared: &self.shared,
            armed: true,
        };
        let outcome = tokio::select! {
            outcome = write_frame(&mut *writer, bytes) => outcome,
            _ = self.shared.closing.cancelled() => return Err(closed_error()),
        };

        match outcome {
            Ok(()) => {
                poison.armed = false;
                Ok(())
            }
            // Rejected before anything was written.
            Err(GatewayError::InvalidParams { message }) => {
                poison.armed = false;
                Err(GatewayError::InvalidParams { message })
            }
            Err(e) => Err(GatewayError::transport(e)),
        }
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending().len()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn call(&self, method: &str, request: &str) -> Result<String> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let params = parse_payload(request)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = serde_json::to_vec(&WireRequest::new(method, params, id))?;

        let (tx, rx) = oneshot::channel();
        let _pending = self.shared.register(id, tx)?;
        self.send_frame(&bytes).await?;

        let response = rx.await.map_err(|_| closed_error())??;

        if let Some(err) = response.error {
            return Err(GatewayError::Transport {
                message: err.message,
            });
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::to_string(&result)?)
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.shut("connection closed");

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            warn!("Error shutting down connection to {}: {}", self.peer, e);
            return Err(e.into());
        }
        debug!("Closed connection to {}", self.peer);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

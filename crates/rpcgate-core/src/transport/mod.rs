//! Backend transport.
//!
//! The gateway only talks to the backend through the [`Transport`] and
//! [`Connection`] traits. A reference implementation ships here: length-prefixed
//! JSON-RPC 2.0 over TCP, with a pairing handshake at connect time.
//!
//! - **Protocol**: framing and wire types shared by both ends
//! - **Tcp**: the client side, used by the gateway
//! - **Server**: a loopback backend for development and tests

pub mod protocol;
pub mod server;
pub mod tcp;

pub use protocol::{WireRequest, WireResponse};
pub use server::{BackendDispatch, BackendServer, BackendServerHandle};
pub use tcp::{TcpConnection, TcpTransport};

use crate::config::ConnectOptions;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens backend connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish and authenticate a connection.
    async fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn Connection>>;
}

/// A live backend connection shared by all in-flight calls.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Perform one remote call with an opaque serialized request.
    async fn call(&self, method: &str, request: &str) -> Result<String>;

    /// Close the connection. Calls still in flight fail with a transport error.
    async fn close(&self) -> Result<()>;

    /// Whether the connection has been closed, locally or by the peer.
    fn is_closed(&self) -> bool;

    /// Human-readable peer address for logging.
    fn peer(&self) -> &str;
}

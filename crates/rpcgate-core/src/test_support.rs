//! In-process transport for unit tests.

use crate::config::ConnectOptions;
use crate::connection::ConnectionManager;
use crate::transport::{Connection, Transport};
use crate::{GatewayError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) const SECRET: &str = "correct-secret";

/// Echoes the request back until closed.
#[derive(Debug, Default)]
pub(crate) struct StubConnection {
    closed: AtomicBool,
}

#[async_trait]
impl Connection for StubConnection {
    async fn call(&self, _method: &str, request: &str) -> Result<String> {
        if self.is_closed() {
            return Err(GatewayError::transport("connection closed"));
        }
        Ok(request.to_string())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn peer(&self) -> &str {
        "stub"
    }
}

#[derive(Debug, Default)]
pub(crate) struct StubTransport;

#[async_trait]
impl Transport for StubTransport {
    async fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn Connection>> {
        if options.pairing_secret != SECRET {
            return Err(GatewayError::PairingRejected {
                address: options.server_address.clone(),
            });
        }
        Ok(Arc::new(StubConnection::default()))
    }
}

pub(crate) fn manager() -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(Arc::new(StubTransport)))
}

pub(crate) async fn connected_manager() -> Arc<ConnectionManager> {
    let manager = manager();
    manager
        .connect(ConnectOptions::new("relay.example:443", SECRET))
        .await
        .unwrap();
    manager
}

//! Connection lifecycle manager.
//!
//! Owns the single backend session. State machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +-------- error ---------+                  |
//!      +------- disconnect / transport failure ----+
//! ```
//!
//! `connect` and `disconnect` are serialised by an async lifecycle lock. Readers
//! (`is_connected`, `session`) only take a short synchronous lock on the state
//! and never wait behind a connect in progress.

use crate::config::{BridgeConfig, ConnectOptions};
use crate::http::AuxHttpClient;
use crate::transport::{Connection, Transport};
use crate::{GatewayError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The live backend connection plus everything bound to it.
pub struct Session {
    connection: Arc<dyn Connection>,
    http: AuxHttpClient,
    address: String,
    dev_mode: bool,
    connected_at: Instant,
}

impl Session {
    pub fn new(connection: Arc<dyn Connection>, http: AuxHttpClient, options: &ConnectOptions) -> Self {
        Self {
            connection,
            http,
            address: options.server_address.clone(),
            dev_mode: options.dev_mode,
            connected_at: Instant::now(),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Client for auxiliary REST calls against the same server.
    pub fn http(&self) -> &AuxHttpClient {
        &self.http
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("dev_mode", &self.dev_mode)
            .field("closed", &self.connection.is_closed())
            .finish()
    }
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Default)]
enum State {
    #[default]
    Disconnected,
    Connecting,
    Connected(Arc<Session>),
}

/// Resets `Connecting` back to `Disconnected` if a connect attempt is dropped
/// before it finishes.
struct ConnectingGuard<'a> {
    manager: &'a ConnectionManager,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.manager.lock_state();
            if matches!(*state, State::Connecting) {
                *state = State::Disconnected;
            }
        }
    }
}

/// Holds the process-wide backend session.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(State::Disconnected),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Establish the backend session.
    ///
    /// An existing session is closed before the new one is opened. On failure
    /// the manager is left `Disconnected` and the error is returned.
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        if options.server_address.trim().is_empty() {
            return Err(GatewayError::InvalidParams {
                message: "server address must not be empty".to_string(),
            });
        }
        if options.pairing_secret.is_empty() {
            return Err(GatewayError::InvalidParams {
                message: "pairing secret must not be empty".to_string(),
            });
        }

        let _lifecycle = self.lifecycle.lock().await;

        let previous = std::mem::replace(&mut *self.lock_state(), State::Connecting);
        let mut guard = ConnectingGuard {
            manager: self,
            armed: true,
        };

        if let State::Connected(previous) = previous {
            info!(
                "Replacing connection to {} with {}",
                previous.address(),
                options.server_address
            );
            Self::close_session(&previous).await;
        }

        if options.dev_mode {
            warn!(
                "Dev mode enabled: TLS certificate validation is disabled for HTTP calls to {}",
                options.server_address
            );
        }

        let outcome = self.open_session(&options).await;
        guard.armed = false;

        let mut state = self.lock_state();
        match outcome {
            Ok(session) => {
                info!("Connected to {}", session.address());
                *state = State::Connected(Arc::new(session));
                Ok(())
            }
            Err(e) => {
                warn!("Connecting to {} failed: {}", options.server_address, e);
                *state = State::Disconnected;
                Err(e)
            }
        }
    }

    async fn open_session(&self, options: &ConnectOptions) -> Result<Session> {
        let http = AuxHttpClient::new(options)?;
        let connection = tokio::time::timeout(
            BridgeConfig::CONNECT_TIMEOUT,
            self.transport.open(options),
        )
        .await
        .map_err(|_| GatewayError::Connect {
            address: options.server_address.clone(),
            message: format!("timed out after {:?}", BridgeConfig::CONNECT_TIMEOUT),
        })??;
        Ok(Session::new(connection, http, options))
    }

    async fn close_session(session: &Session) {
        match tokio::time::timeout(BridgeConfig::CLOSE_TIMEOUT, session.connection().close()).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Error closing RPC connection: {}", e),
            Err(_) => error!(
                "Closing RPC connection to {} timed out after {:?}",
                session.address(),
                BridgeConfig::CLOSE_TIMEOUT
            ),
        }
    }

    /// Whether a session exists.
    pub fn is_connected(&self) -> bool {
        matches!(*self.lock_state(), State::Connected(_))
    }

    pub fn state(&self) -> ConnectionState {
        match *self.lock_state() {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Snapshot of the current session, if connected.
    pub fn session(&self) -> Option<Arc<Session>> {
        match &*self.lock_state() {
            State::Connected(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// Close and drop the session. Idempotent; close errors are only logged.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = std::mem::take(&mut *self.lock_state());
        match previous {
            State::Connected(session) => {
                Self::close_session(&session).await;
                info!(
                    "Disconnected from {} after {:?}",
                    session.address(),
                    session.connected_at().elapsed()
                );
            }
            _ => debug!("Disconnect requested while not connected"),
        }
    }

    /// Drop `session` after the transport reported it closed.
    ///
    /// Does nothing if a different session has replaced it in the meantime.
    pub fn discard(&self, session: &Arc<Session>) -> bool {
        let mut state = self.lock_state();
        match &*state {
            State::Connected(current) if Arc::ptr_eq(current, session) => {
                warn!(
                    "Connection to {} lost after {:?}",
                    session.address(),
                    session.connected_at().elapsed()
                );
                *state = State::Disconnected;
                true
            }
            _ => false,
        }
    }
}

use crate::cancel::CancellationToken;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-call context handed to an invoker.
///
/// The token is a child of the gateway's shutdown token. The bridge cancels
/// it once the call's completion has fired, so anything an invoker spawned
/// and tied to the context stops with the call.
#[derive(Debug, Clone)]
pub struct CallContext {
    id: u64,
    method: Arc<str>,
    started: Instant,
    token: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(id: u64, method: &str, token: CancellationToken) -> Self {
        Self {
            id,
            method: Arc::from(method),
            started: Instant::now(),
            token,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Time since the call was scheduled.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

use crate::{GatewayError, Result};
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;
use tracing::{error, warn};

type HostCallback = Box<dyn FnOnce(String, Option<String>) + Send + 'static>;

enum Sink {
    Host(HostCallback),
    Channel(oneshot::Sender<Result<String>>),
}

/// Single-fire completion for one invocation.
///
/// `complete` consumes the value, so a second delivery does not type-check.
/// A completion dropped without being fired delivers an internal fault, so
/// the receiving side always hears back exactly once.
pub struct Completion {
    sink: Option<Sink>,
}

impl Completion {
    /// Wrap a host callback taking `(result, error)`.
    ///
    /// On failure the result is empty and the error is set; on success the
    /// error is `None`. Never both, never neither.
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: FnOnce(String, Option<String>) + Send + 'static,
    {
        Self {
            sink: Some(Sink::Host(Box::new(callback))),
        }
    }

    /// A completion paired with a receiver, for async callers.
    pub fn channel() -> (Self, oneshot::Receiver<Result<String>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Some(Sink::Channel(tx)),
            },
            rx,
        )
    }

    pub fn complete(mut self, outcome: Result<String>) {
        if let Some(sink) = self.sink.take() {
            deliver(sink, outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            warn!("Completion dropped without firing");
            deliver(
                sink,
                Err(GatewayError::InternalFault {
                    message: "call dropped without completing".to_string(),
                }),
            );
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.sink.is_some())
            .finish()
    }
}

fn deliver(sink: Sink, outcome: Result<String>) {
    match sink {
        Sink::Host(callback) => {
            let (result, error) = match outcome {
                Ok(result) => (result, None),
                Err(e) => (String::new(), Some(e.to_string())),
            };
            // A panicking host callback must not take the worker down with it.
            let fired = std::panic::catch_unwind(AssertUnwindSafe(move || callback(result, error)));
            if let Err(panic) = fired {
                error!("Completion callback panicked: {}", panic_message(&*panic));
            }
        }
        Sink::Channel(tx) => {
            // The receiver may have given up; nothing left to tell.
            let _ = tx.send(outcome);
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

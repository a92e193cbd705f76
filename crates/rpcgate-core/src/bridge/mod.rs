//! Invocation bridge.
//!
//! Turns `(method, request, callback)` into one scheduled remote call. The
//! connection and method checks happen synchronously on the caller's thread;
//! only calls that pass both are spawned. Whatever happens afterwards, the
//! callback fires exactly once.

mod completion;
mod context;
mod tracker;

pub use completion::Completion;
pub use context::CallContext;

use crate::cancel::CancellationToken;
use crate::connection::{ConnectionManager, Session};
use crate::registry::{Invoker, Registry};
use crate::{GatewayError, Result};
use completion::panic_message;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracker::{InFlight, InFlightGuard};
use tracing::{debug, warn};

/// What `invoke` did with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Completed synchronously with an error; nothing was spawned.
    Rejected,
    /// Spawned; the completion fires later.
    Scheduled { call_id: u64 },
}

/// Dispatches named calls onto the runtime.
pub struct Bridge {
    registry: Arc<Registry>,
    connections: Arc<ConnectionManager>,
    runtime: Handle,
    shutdown: CancellationToken,
    in_flight: InFlight,
    next_call_id: AtomicU64,
}

impl Bridge {
    pub fn new(
        registry: Arc<Registry>,
        connections: Arc<ConnectionManager>,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            connections,
            runtime,
            shutdown,
            in_flight: InFlight::default(),
            next_call_id: AtomicU64::new(1),
        }
    }

    /// Invoke `method` and report through `callback(result, error)`.
    ///
    /// Returns immediately. Not-connected and unknown-method errors are
    /// delivered before this returns.
    pub fn invoke<F>(&self, method: &str, request: impl Into<String>, callback: F) -> Dispatch
    where
        F: FnOnce(String, Option<String>) + Send + 'static,
    {
        self.invoke_with(method, request.into(), Completion::from_callback(callback))
    }

    /// Like [`Bridge::invoke`] but with a prepared completion.
    pub fn invoke_with(&self, method: &str, request: String, completion: Completion) -> Dispatch {
        let Some(session) = self.connections.session() else {
            debug!("Rejecting {}: not connected", method);
            completion.complete(Err(GatewayError::NotConnected));
            return Dispatch::Rejected;
        };

        let invoker = match self.registry.resolve(method) {
            Ok(invoker) => invoker,
            Err(e) => {
                completion.complete(Err(e));
                return Dispatch::Rejected;
            }
        };

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let ctx = CallContext::new(call_id, method, self.shutdown.child_token());
        debug!(
            "Scheduling call {} {} ({} bytes)",
            call_id,
            method,
            request.len()
        );

        let call = ScheduledCall {
            invoker,
            ctx,
            session,
            request,
            completion,
            connections: self.connections.clone(),
            _guard: self.in_flight.enter(),
        };
        self.runtime.spawn(call.run());

        Dispatch::Scheduled { call_id }
    }

    /// Invoke and await the outcome.
    pub async fn call(&self, method: &str, request: impl Into<String>) -> Result<String> {
        let (completion, rx) = Completion::channel();
        self.invoke_with(method, request.into(), completion);
        rx.await.map_err(|_| GatewayError::InternalFault {
            message: "completion channel closed".to_string(),
        })?
    }

    /// Number of scheduled calls that have not completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Resolves once every scheduled call has completed.
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("methods", &self.registry.len())
            .field("in_flight", &self.in_flight.count())
            .finish()
    }
}

struct ScheduledCall {
    invoker: Arc<dyn Invoker>,
    ctx: CallContext,
    session: Arc<Session>,
    request: String,
    completion: Completion,
    connections: Arc<ConnectionManager>,
    _guard: InFlightGuard,
}

impl ScheduledCall {
    async fn run(self) {
        let ScheduledCall {
            invoker,
            ctx,
            session,
            request,
            completion,
            connections,
            _guard,
        } = self;

        // Scheduled after shutdown began: the invoker never starts.
        let outcome = match ctx.token().check() {
            Err(cancelled) => Err(cancelled.into()),
            Ok(()) => {
                let call = AssertUnwindSafe(invoker.call(ctx.clone(), session.clone(), request))
                    .catch_unwind();

                tokio::select! {
                    biased;
                    outcome = call => outcome.unwrap_or_else(|panic| {
                        Err(GatewayError::InternalFault {
                            message: format!("invoker panicked: {}", panic_message(&*panic)),
                        })
                    }),
                    _ = ctx.cancelled() => Err(GatewayError::Cancelled),
                }
            }
        };

        match &outcome {
            Ok(result) => debug!(
                "Call {} {} completed in {:?} ({} bytes)",
                ctx.id(),
                ctx.method(),
                ctx.elapsed(),
                result.len()
            ),
            Err(e) => {
                warn!(
                    "Call {} {} failed after {:?}: {}",
                    ctx.id(),
                    ctx.method(),
                    ctx.elapsed(),
                    e
                );
                if e.is_connection_failure() && session.connection().is_closed() {
                    connections.discard(&session);
                }
            }
        }

        completion.complete(outcome);
        ctx.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use crate::test_support::{connected_manager, manager};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    type Outcome = (String, Option<String>);

    fn bridge(registry: RegistryBuilder, connections: Arc<ConnectionManager>) -> Bridge {
        Bridge::new(
            Arc::new(registry.build()),
            connections,
            Handle::current(),
            CancellationToken::new(),
        )
    }

    fn sample_registry() -> RegistryBuilder {
        let mut builder = RegistryBuilder::new();
        builder
            .register_fn("Test.Echo", |_, session, request| async move {
                session.connection().call("Test.Echo", &request).await
            })
            .unwrap();
        builder
            .register_fn("Test.Fail", |_, _, _| async {
                Err(GatewayError::transport("remote said no"))
            })
            .unwrap();
        builder
            .register_fn("Test.Panic", |_, _, _| async {
                if true {
                    panic!("invoker exploded");
                }
                Ok(String::new())
            })
            .unwrap();
        builder
            .register_fn("Test.Slow", |_, _, _| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("\"slow\"".to_string())
            })
            .unwrap();
        builder
            .register_fn("Test.Fast", |_, _, _| async { Ok("\"fast\"".to_string()) })
            .unwrap();
        builder
            .register_fn("Test.Hang", |_, _, _| async {
                futures::future::pending::<()>().await;
                Ok(String::new())
            })
            .unwrap();
        builder
    }

    fn recorder() -> (
        mpsc::UnboundedSender<Outcome>,
        mpsc::UnboundedReceiver<Outcome>,
    ) {
        mpsc::unbounded_channel()
    }

    fn callback(
        tx: &mpsc::UnboundedSender<Outcome>,
    ) -> impl FnOnce(String, Option<String>) + Send + 'static {
        let tx = tx.clone();
        move |result, error| {
            let _ = tx.send((result, error));
        }
    }

    #[tokio::test]
    async fn test_not_connected_completes_synchronously() {
        let bridge = bridge(sample_registry(), manager());
        let (tx, mut rx) = recorder();

        let dispatch = bridge.invoke("Test.Echo", "{}", callback(&tx));

        assert_eq!(dispatch, Dispatch::Rejected);
        assert_eq!(bridge.in_flight(), 0);
        let (result, error) = rx.try_recv().unwrap();
        assert_eq!(result, "");
        assert_eq!(error.as_deref(), Some("RPC connection not ready"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_method_completes_synchronously() {
        let bridge = bridge(sample_registry(), connected_manager().await);
        let (tx, mut rx) = recorder();

        let dispatch = bridge.invoke("Test.Missing", "{}", callback(&tx));

        assert_eq!(dispatch, Dispatch::Rejected);
        let (result, error) = rx.try_recv().unwrap();
        assert_eq!(result, "");
        assert_eq!(error.as_deref(), Some("rpc with name Test.Missing not found"));
    }

    #[tokio::test]
    async fn test_success_fires_once_with_result() {
        let bridge = bridge(sample_registry(), connected_manager().await);
        let (tx, mut rx) = recorder();

        let dispatch = bridge.invoke("Test.Echo", "{\"x\":1}", callback(&tx));
        assert!(matches!(dispatch, Dispatch::Scheduled { .. }));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), ("{\"x\":1}".to_string(), None));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invoker_error_fires_once_with_empty_result() {
        let bridge = bridge(sample_registry(), connected_manager().await);
        let (tx, mut rx) = recorder();

        bridge.invoke("Test.Fail", "{}", callback(&tx));
        drop(tx);

        let (result, error) = rx.recv().await.unwrap();
        assert_eq!(result, "");
        assert!(error.unwrap().contains("remote said no"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_fault() {
        let bridge = bridge(sample_registry(), connected_manager().await);

        let err = bridge.call("Test.Panic", "{}").await.unwrap_err();

        match err {
            GatewayError::InternalFault { message } => {
                assert!(message.contains("invoker exploded"))
            }
            other => panic!("expected InternalFault, got {:?}", other),
        }
        bridge.wait_idle().await;
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_results_arrive_in_completion_order() {
        let bridge = bridge(sample_registry(), connected_manager().await);
        let (tx, mut rx) = recorder();

        bridge.invoke("Test.Slow", "{}", callback(&tx));
        bridge.invoke("Test.Fast", "{}", callback(&tx));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().0, "\"fast\"");
        assert_eq!(rx.recv().await.unwrap().0, "\"slow\"");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_call_ids_are_distinct() {
        let bridge = bridge(sample_registry(), connected_manager().await);

        let first = bridge.invoke("Test.Fast", "{}", |_, _| {});
        let second = bridge.invoke("Test.Fast", "{}", |_, _| {});

        assert_ne!(first, second);
        bridge.wait_idle().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_calls() {
        let shutdown = CancellationToken::new();
        let bridge = Bridge::new(
            Arc::new(sample_registry().build()),
            connected_manager().await,
            Handle::current(),
            shutdown.clone(),
        );
        let (tx, mut rx) = recorder();

        bridge.invoke("Test.Hang", "{}", callback(&tx));
        tokio::task::yield_now().await;
        assert_eq!(bridge.in_flight(), 1);

        shutdown.cancel();

        let (result, error) = rx.recv().await.unwrap();
        assert_eq!(result, "");
        assert_eq!(error.as_deref(), Some("Call cancelled"));
        bridge.wait_idle().await;
    }

    #[tokio::test]
    async fn test_call_after_shutdown_never_starts_invoker() {
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut builder = RegistryBuilder::new();
        {
            let started = started.clone();
            builder
                .register_fn("Test.Record", move |_, _, _| {
                    started.store(true, Ordering::SeqCst);
                    async { Ok("{}".to_string()) }
                })
                .unwrap();
        }
        let shutdown = CancellationToken::new();
        let bridge = Bridge::new(
            Arc::new(builder.build()),
            connected_manager().await,
            Handle::current(),
            shutdown.clone(),
        );
        let (tx, mut rx) = recorder();

        shutdown.cancel();
        bridge.invoke("Test.Record", "{}", callback(&tx));

        let (result, error) = rx.recv().await.unwrap();
        assert_eq!(result, "");
        assert_eq!(error.as_deref(), Some("Call cancelled"));
        assert!(!started.load(Ordering::SeqCst));
        bridge.wait_idle().await;
    }

    #[tokio::test]
    async fn test_context_cancelled_after_callback() {
        let seen: Arc<Mutex<Option<CallContext>>> = Arc::default();
        let mut builder = RegistryBuilder::new();
        {
            let seen = seen.clone();
            builder
                .register_fn("Test.Capture", move |ctx, _, _| {
                    *seen.lock().unwrap() = Some(ctx);
                    async { Ok("{}".to_string()) }
                })
                .unwrap();
        }
        let bridge = bridge(builder, connected_manager().await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let seen = seen.clone();
            bridge.invoke("Test.Capture", "{}", move |_, _| {
                let ctx = seen.lock().unwrap().clone().unwrap();
                let _ = tx.send(ctx.is_cancelled());
            });
        }

        assert_eq!(rx.recv().await, Some(false));
        bridge.wait_idle().await;
        let ctx = seen.lock().unwrap().clone().unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_connection_drops_session() {
        let connections = connected_manager().await;
        let bridge = bridge(sample_registry(), connections.clone());

        connections
            .session()
            .unwrap()
            .connection()
            .close()
            .await
            .unwrap();
        assert!(connections.is_connected());

        let err = bridge.call("Test.Echo", "{}").await.unwrap_err();

        assert!(matches!(err, GatewayError::Transport { .. }));
        assert!(!connections.is_connected());
    }
}

//! Method registry.
//!
//! Method names map to [`Invoker`]s. Registration units add their methods to a
//! [`RegistryBuilder`] at startup, in a fixed order; the builder is then frozen
//! into a read-only [`Registry`] shared by every invocation.

pub mod catalog;
mod method_registry;

pub use catalog::{default_registrations, ForwardingService, RestService};
pub use method_registry::{Registry, RegistryBuilder};

use crate::bridge::CallContext;
use crate::connection::Session;
use crate::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Performs one remote call for a registered method.
///
/// The returned value is the serialized result handed to the host verbatim.
/// Completion is owned by the bridge, so an invoker only has to return.
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, session: Arc<Session>, request: String)
        -> Result<String>;
}

/// Adapts an async closure into an [`Invoker`].
pub struct FnInvoker<F, Fut>
where
    F: Fn(CallContext, Arc<Session>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnInvoker<F, Fut>
where
    F: Fn(CallContext, Arc<Session>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Invoker for FnInvoker<F, Fut>
where
    F: Fn(CallContext, Arc<Session>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        session: Arc<Session>,
        request: String,
    ) -> Result<String> {
        (self.f)(ctx, session, request).await
    }
}

/// A group of methods registered together at startup.
pub trait RegistrationUnit: Send + Sync {
    /// Unit name, used in logs and collision errors.
    fn name(&self) -> &str;

    /// Add this unit's methods to the registry.
    fn register_into(&self, registry: &mut RegistryBuilder) -> Result<()>;
}

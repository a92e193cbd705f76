//! rpcgate - Dynamic RPC dispatch bridge.
//!
//! A host that can only call in and hear back through a callback invokes any
//! registered backend method by name, with opaque JSON payloads, over one
//! shared backend connection. No per-method bindings are compiled into the
//! host.
//!
//! The pieces, leaves first:
//!
//! - [`registry`]: method names mapped to invokers, frozen at startup
//! - [`connection`]: the single backend session and its lifecycle
//! - [`bridge`]: schedules one call per invocation, fires its callback once
//! - [`Gateway`]: the five host-facing entry points
//!
//! # Example
//!
//! ```rust,ignore
//! use rpcgate::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> rpcgate::Result<()> {
//!     let gateway = Gateway::builder().with_default_registrations().build()?;
//!     gateway.connect_server("relay.example:443", false, "secret").await?;
//!
//!     gateway.invoke_rpc("lnrpc.Lightning.GetInfo", "{}", |result, error| {
//!         match error {
//!             Some(e) => eprintln!("failed: {}", e),
//!             None => println!("{}", result),
//!         }
//!     });
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod registry;
pub mod transport;

mod gateway;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use bridge::{Bridge, CallContext, Completion, Dispatch};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{BridgeConfig, ConnectOptions};
pub use connection::{ConnectionManager, ConnectionState, Session};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use registry::{
    default_registrations, FnInvoker, ForwardingService, Invoker, RegistrationUnit, Registry,
    RegistryBuilder, RestService,
};
pub use transport::{
    BackendDispatch, BackendServer, BackendServerHandle, Connection, TcpTransport, Transport,
};

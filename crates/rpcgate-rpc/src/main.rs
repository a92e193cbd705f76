//! rpcgate RPC host - JSON-RPC front end for the gateway.
//!
//! Exposes the five gateway entry points over JSON-RPC 2.0 on HTTP and stays
//! up until ctrl-c, then cancels in-flight calls and disconnects.

mod handler;
mod server;

use anyhow::Result;
use clap::Parser;
use rpcgate::Gateway;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rpcgate-rpc")]
#[command(about = "JSON-RPC host for the rpcgate dispatch bridge")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting rpcgate RPC host");

    let gateway = Arc::new(Gateway::builder().with_default_registrations().build()?);
    info!("{} methods registered", gateway.registry().len());

    let addr = server::start_server(gateway.clone(), &args.host, args.port).await?;

    // Hosts read the port from stdout
    println!("RPC_PORT={}", addr.port());

    info!("RPC host running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    gateway.shutdown().await;
    info!("Gateway stopped, exiting");

    Ok(())
}

//! Gateway binary entry point: parses CLI flags, loads config, builds the
//! router, and serves it until a shutdown signal arrives.
//!
//! Concrete per-vendor provider adapters are an external collaborator (see
//! `gateway_core::providers::Provider`) -- this binary does not link any.
//! An operator embeds this crate as a library and supplies real adapters to
//! [`gateway_server::create_server`] to get a working deployment; run as-is,
//! the gateway starts with zero providers and every route returns
//! `no provider available` until one is wired in.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use gateway_core::providers::Provider;
use gateway_server::config::Config;
use gateway_server::create_server;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Missing is not an error --
    /// env vars plus defaults are a legitimate all-env deployment.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(Some(&args.config))?;

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.clone())
        .init();

    let providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let (app, shutdown) = create_server(config, providers).await?;

    tracing::info!(%addr, "starting gateway");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(gate: Arc<gateway_server::shutdown::ShutdownGate>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight requests");
    gate.begin_draining();
    tokio::time::sleep(Duration::from_millis(100)).await;
}

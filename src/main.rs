use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mproxy::collection::{ChannelCollection, QueueRegistry, WorkerRegistry};
use mproxy::config;
use mproxy::server::{build_app, AppState, DEFAULT_RETRY_AFTER};

#[derive(Parser, Debug)]
#[command(
    name = "mproxy",
    version,
    about = "HTTP proxy server for message delivery through virtual channels"
)]
struct Args {
    /// Address to listen on.
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Port to listen on.
    #[arg(short = 'P', long, default_value_t = 8080)]
    port: u16,

    /// Path to the channel configuration file.
    #[arg(short = 'c', long, default_value = "config.example.yaml")]
    config: PathBuf,

    /// Log debug information.
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("mproxy=debug")
    } else {
        EnvFilter::new("mproxy=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config = %args.config.display(), "initializing components");

    let config = config::load(&args.config)
        .with_context(|| format!("read config {}", args.config.display()))?;
    let channels =
        ChannelCollection::from_config(&config, &QueueRegistry::defaults(), &WorkerRegistry::defaults())
            .context("build virtual channels")?;

    let state = Arc::new(AppState::new(channels, DEFAULT_RETRY_AFTER));
    let app = build_app(Arc::clone(&state));

    state.channels.activate_all().context("activate channels")?;

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("bind {}:{}", args.host, args.port))?;
    info!(host = %args.host, port = args.port, channels = state.channels.len(), "mproxy listening");

    state.set_maintenance(false);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    info!("shutting down");
    state.set_maintenance(true);
    state.channels.deactivate_all().await;

    Ok(())
}

async fn shutdown_signal() {
    // A failed handler install ends the wait immediately.
    let _ = tokio::signal::ctrl_c().await;
}

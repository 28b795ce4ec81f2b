mod cli;
mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tincan_signal::{MemoryEnvelopeStore, RedisEnvelopeStore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    cli::{Cli, Commands},
    config::Config,
    handlers::{RelayState, SharedStore, router},
};

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Some(Commands::Peek { url, peer }) = cli.command {
        if let Err(err) = cli::run_peek(url, peer).await {
            error!("peek failed: {err:#}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env().with_args(&cli.serve);
    if let Err(err) = serve(config).await {
        error!("relay stopped: {err:#}");
        std::process::exit(1);
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(
        "starting tincan relay on {} (signal ttl {}s)",
        config.listen_addr(),
        config.signal_ttl_seconds
    );

    let store: SharedStore = match &config.redis_url {
        Some(url) => {
            info!("envelope store: redis at {url}");
            let redis = RedisEnvelopeStore::connect(url, config.signal_ttl())
                .await
                .with_context(|| format!("failed to connect to redis at {url}"))?;
            Arc::new(redis)
        }
        None => {
            warn!("REDIS_URL not set; envelopes live in process memory");
            Arc::new(MemoryEnvelopeStore::with_ttl(config.signal_ttl()))
        }
    };

    let app = router(RelayState::new(store, config.trust_forwarded));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("tincan relay listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

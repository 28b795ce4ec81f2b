use anyhow::{Context, Result};
use clap::Parser;
use tincan_client_core::telemetry;
use tincan_client_core::terminal::{app, cli::Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = start(cli).await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn start(cli: Cli) -> Result<()> {
    let logging = cli.logging.to_config();
    telemetry::init(&logging).context("logging setup failed")?;
    app::run(cli).await?;
    Ok(())
}

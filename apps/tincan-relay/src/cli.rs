use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tincan_signal::SignalBatch;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "tincan-relay")]
#[command(about = "tincan signaling relay and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Address to bind (overrides TINCAN_RELAY_BIND)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides TINCAN_RELAY_PORT)
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Back the envelope log with Redis instead of process memory
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Seconds an envelope stays visible (overrides SIGNAL_TTL)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Ignore X-Forwarded-For and scope by the socket peer address
    #[arg(long)]
    pub no_forwarded: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dump what a relay currently shows to this network scope
    Peek {
        /// Relay base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Also list envelopes addressed to this peer id
        #[arg(long)]
        peer: Option<String>,
    },
}

pub async fn run_peek(url: String, peer: Option<String>) -> Result<()> {
    let base = url.trim_end_matches('/');
    debug!("peeking at {} as {:?}", base, peer);

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(5))
        .build()?;

    let mut request = client.get(format!("{base}/signal"));
    if let Some(peer) = &peer {
        request = request.query(&[("peerId", peer.as_str())]);
    }
    let batch: SignalBatch = request
        .send()
        .await
        .with_context(|| format!("relay at {base} is unreachable"))?
        .error_for_status()?
        .json()
        .await
        .context("relay returned a malformed signal batch")?;

    if let Some(peer) = &peer {
        println!("addressed to {peer}: {}", batch.signals.len());
        for envelope in &batch.signals {
            println!(
                "  [{}] {} {} -> {}",
                envelope.timestamp,
                envelope.kind.as_str(),
                envelope.from,
                envelope.to
            );
        }
    }

    println!("visible in scope: {}", batch.all_signals.len());
    for envelope in &batch.all_signals {
        match envelope.room_advert() {
            Some(advert) => println!(
                "  [{}] room {:?} hosted by {}{}",
                envelope.timestamp,
                advert.room_name,
                envelope.from,
                if advert.has_password { " (locked)" } else { "" }
            ),
            None => println!(
                "  [{}] {} {} -> {}",
                envelope.timestamp,
                envelope.kind.as_str(),
                envelope.from,
                envelope.to
            ),
        }
    }
    Ok(())
}

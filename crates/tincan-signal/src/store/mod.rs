pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::envelope::{Envelope, PostEnvelope, SignalBatch};

/// How long an envelope stays visible after the relay stamps it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Source of relay timestamps, in milliseconds since the unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("stored envelope could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Append-only, TTL-pruned envelope log partitioned by network scope.
///
/// Implementations prune expired envelopes on every access and keep at most one live room
/// advertisement per sender within a scope.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Stamp `envelope` with the relay clock and append it to `scope`.
    async fn append(&self, scope: &str, envelope: PostEnvelope) -> Result<Envelope, StoreError>;

    /// Every live envelope in `scope`, oldest first.
    async fn visible(&self, scope: &str) -> Result<Vec<Envelope>, StoreError>;
}

/// Build the `GET /signal` view for `peer_id` within `scope`.
pub async fn collect_signals(
    store: &dyn EnvelopeStore,
    scope: &str,
    peer_id: Option<&str>,
) -> Result<SignalBatch, StoreError> {
    let all_signals = store.visible(scope).await?;
    let signals = match peer_id.map(str::trim).filter(|peer| !peer.is_empty()) {
        Some(peer) => all_signals
            .iter()
            .filter(|envelope| envelope.to == peer)
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    Ok(SignalBatch {
        signals,
        all_signals,
    })
}

pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn is_expired(envelope: &Envelope, now: i64, ttl_millis: i64) -> bool {
    now.saturating_sub(envelope.timestamp) >= ttl_millis
}

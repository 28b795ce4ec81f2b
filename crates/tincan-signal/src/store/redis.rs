use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{Clock, EnvelopeStore, StoreError, SystemClock, is_expired, ttl_millis};
use crate::envelope::{Envelope, PostEnvelope};

/// Envelope log shared by every relay instance through Redis.
///
/// Handshake envelopes live in a sorted set per scope (scored by relay timestamp); room
/// advertisements live in a hash per scope keyed by sender, which gives the one-advert-per-host
/// rule for free.
#[derive(Clone)]
pub struct RedisEnvelopeStore {
    redis: ConnectionManager,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisEnvelopeStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self {
            redis,
            ttl,
            clock: Arc::new(SystemClock),
        })
    }

    fn key_ttl_seconds(&self) -> i64 {
        // Keys outlive their newest member by at most one TTL.
        i64::try_from(self.ttl.as_secs().max(1)).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl EnvelopeStore for RedisEnvelopeStore {
    async fn append(&self, scope: &str, envelope: PostEnvelope) -> Result<Envelope, StoreError> {
        let mut conn = self.redis.clone();
        let now = self.clock.now_millis();
        let stamped = Envelope::stamp(envelope, Uuid::new_v4().to_string(), now);
        let serialized = serde_json::to_string(&stamped)?;

        if stamped.is_room_advert() {
            let key = adverts_key(scope);
            conn.hset::<_, _, _, ()>(&key, &stamped.from, serialized)
                .await?;
            conn.expire::<_, ()>(&key, self.key_ttl_seconds()).await?;
        } else {
            let key = signals_key(scope);
            conn.zadd::<_, _, _, ()>(&key, serialized, now).await?;
            conn.expire::<_, ()>(&key, self.key_ttl_seconds()).await?;
        }

        tracing::trace!(
            target: "tincan::relay",
            scope = %scope,
            id = %stamped.id,
            kind = stamped.kind.as_str(),
            "stored envelope in redis"
        );
        Ok(stamped)
    }

    async fn visible(&self, scope: &str) -> Result<Vec<Envelope>, StoreError> {
        let mut conn = self.redis.clone();
        let now = self.clock.now_millis();
        let ttl = ttl_millis(self.ttl);
        let cutoff = now.saturating_sub(ttl);

        let signals = signals_key(scope);
        conn.zrembyscore::<_, _, _, ()>(&signals, "-inf", cutoff)
            .await?;
        let members: Vec<String> = conn.zrangebyscore(&signals, "-inf", "+inf").await?;

        let mut envelopes = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<Envelope>(&member) {
                Ok(envelope) => envelopes.push(envelope),
                Err(err) => {
                    tracing::warn!(target: "tincan::relay", scope = %scope, error = %err, "dropping undecodable envelope");
                    conn.zrem::<_, _, ()>(&signals, &member).await?;
                }
            }
        }

        let adverts = adverts_key(scope);
        let stored: HashMap<String, String> = conn.hgetall(&adverts).await?;
        for (from, serialized) in stored {
            let decoded = serde_json::from_str::<Envelope>(&serialized).ok();
            match decoded {
                Some(envelope) if !is_expired(&envelope, now, ttl) => envelopes.push(envelope),
                _ => {
                    conn.hdel::<_, _, ()>(&adverts, &from).await?;
                }
            }
        }

        envelopes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(envelopes)
    }
}

fn signals_key(scope: &str) -> String {
    format!("tincan:signals:{scope}")
}

fn adverts_key(scope: &str) -> String {
    format!("tincan:adverts:{scope}")
}

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{Clock, DEFAULT_TTL, EnvelopeStore, StoreError, SystemClock, is_expired, ttl_millis};
use crate::envelope::{Envelope, PostEnvelope};

/// Process-local envelope log. Starts empty and forgets everything on restart.
pub struct MemoryEnvelopeStore {
    ttl_millis: i64,
    clock: Arc<dyn Clock>,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<ScopedEnvelope>,
    last_timestamp: i64,
}

struct ScopedEnvelope {
    scope: String,
    envelope: Envelope,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_millis: ttl_millis(ttl),
            clock,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of envelopes currently retained across all scopes, expired ones included until the
    /// next access prunes them.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, state: &mut MemoryState, now: i64) {
        let ttl = self.ttl_millis;
        let before = state.entries.len();
        state
            .entries
            .retain(|entry| !is_expired(&entry.envelope, now, ttl));
        let pruned = before - state.entries.len();
        if pruned > 0 {
            tracing::trace!(target: "tincan::relay", pruned, "pruned expired envelopes");
        }
    }
}

impl Default for MemoryEnvelopeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn append(&self, scope: &str, envelope: PostEnvelope) -> Result<Envelope, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.prune(&mut state, now);

        // Timestamps are strictly increasing so pollers can use them as a cursor.
        let timestamp = now.max(state.last_timestamp + 1);
        state.last_timestamp = timestamp;

        if envelope.is_room_advert() {
            state.entries.retain(|entry| {
                !(entry.scope == scope
                    && entry.envelope.from == envelope.from
                    && entry.envelope.is_room_advert())
            });
        }

        let stamped = Envelope::stamp(envelope, Uuid::new_v4().to_string(), timestamp);
        state.entries.push(ScopedEnvelope {
            scope: scope.to_string(),
            envelope: stamped.clone(),
        });
        Ok(stamped)
    }

    async fn visible(&self, scope: &str) -> Result<Vec<Envelope>, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        self.prune(&mut state, now);
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.scope == scope)
            .map(|entry| entry.envelope.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ROOM_DISCOVERY, RoomAdvert};
    use crate::store::collect_signals;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn at(millis: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(millis)))
        }

        fn advance(&self, millis: i64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn store_at(clock: &Arc<ManualClock>) -> MemoryEnvelopeStore {
        MemoryEnvelopeStore::with_clock(DEFAULT_TTL, clock.clone())
    }

    #[test_timeout::tokio_timeout_test]
    async fn envelopes_expire_after_ttl() {
        let clock = ManualClock::at(1_000);
        let store = store_at(&clock);
        store
            .append("lan", PostEnvelope::offer("a", "b", json!({})))
            .await
            .unwrap();

        clock.advance(59_999);
        assert_eq!(store.visible("lan").await.unwrap().len(), 1);

        clock.advance(1);
        assert!(store.visible("lan").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn scopes_do_not_see_each_other() {
        let clock = ManualClock::at(0);
        let store = store_at(&clock);
        store
            .append("home", PostEnvelope::offer("a", "b", json!({})))
            .await
            .unwrap();
        store
            .append("office", PostEnvelope::offer("c", "b", json!({})))
            .await
            .unwrap();

        let home = store.visible("home").await.unwrap();
        assert_eq!(home.len(), 1);
        assert_eq!(home[0].from, "a");
    }

    #[test_timeout::tokio_timeout_test]
    async fn timestamps_strictly_increase_under_a_frozen_clock() {
        let clock = ManualClock::at(500);
        let store = store_at(&clock);
        let first = store
            .append("lan", PostEnvelope::offer("a", "b", json!(1)))
            .await
            .unwrap();
        let second = store
            .append("lan", PostEnvelope::answer("b", "a", json!(2)))
            .await
            .unwrap();
        assert_eq!(first.timestamp, 500);
        assert_eq!(second.timestamp, 501);
        assert_ne!(first.id, second.id);
    }

    #[test_timeout::tokio_timeout_test]
    async fn newer_advert_supersedes_older_one_from_same_host() {
        let clock = ManualClock::at(0);
        let store = store_at(&clock);
        let advert = |name: &str| RoomAdvert {
            room_name: name.into(),
            has_password: false,
        };
        store
            .append("lan", PostEnvelope::advert("host", &advert("old")))
            .await
            .unwrap();
        store
            .append("lan", PostEnvelope::advert("other", &advert("theirs")))
            .await
            .unwrap();
        store
            .append("lan", PostEnvelope::advert("host", &advert("new")))
            .await
            .unwrap();

        let adverts: Vec<_> = store
            .visible("lan")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|envelope| envelope.room_advert().map(|a| (envelope.from, a.room_name)))
            .collect();
        assert_eq!(
            adverts,
            vec![
                ("other".to_string(), "theirs".to_string()),
                ("host".to_string(), "new".to_string())
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn collect_signals_splits_addressed_and_scope_wide() {
        let clock = ManualClock::at(0);
        let store = store_at(&clock);
        store
            .append("lan", PostEnvelope::offer("a", "b", json!({})))
            .await
            .unwrap();
        store
            .append("lan", PostEnvelope::offer("a", "c", json!({})))
            .await
            .unwrap();
        store
            .append(
                "lan",
                PostEnvelope::advert(
                    "a",
                    &RoomAdvert {
                        room_name: "R".into(),
                        has_password: false,
                    },
                ),
            )
            .await
            .unwrap();

        let batch = collect_signals(&store, "lan", Some("b")).await.unwrap();
        assert_eq!(batch.signals.len(), 1);
        assert_eq!(batch.signals[0].to, "b");
        assert_eq!(batch.all_signals.len(), 3);

        let anonymous = collect_signals(&store, "lan", None).await.unwrap();
        assert!(anonymous.signals.is_empty());
        assert!(anonymous.all_signals.iter().any(|e| e.to == ROOM_DISCOVERY));
    }
}

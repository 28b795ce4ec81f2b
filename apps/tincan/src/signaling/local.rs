use async_trait::async_trait;
use std::sync::Arc;
use tincan_signal::{
    EnvelopeStore, MemoryEnvelopeStore, PostEnvelope, SignalBatch, collect_signals, scope_key,
};

use super::{RelayClient, SignalingError};

/// Relay living in the current process, backed by any [`EnvelopeStore`].
///
/// Every handle created through [`LocalRelay::in_scope`] shares the store but sees only its own
/// network scope, the way separate NATs would through the HTTP relay.
#[derive(Clone)]
pub struct LocalRelay {
    store: Arc<dyn EnvelopeStore>,
    scope: String,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryEnvelopeStore::new()))
    }

    pub fn with_store(store: Arc<dyn EnvelopeStore>) -> Self {
        Self {
            store,
            scope: scope_key("127.0.0.1"),
        }
    }

    /// A handle onto the same store as seen from `address`.
    pub fn in_scope(&self, address: &str) -> Self {
        Self {
            store: self.store.clone(),
            scope: scope_key(address),
        }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayClient for LocalRelay {
    async fn post(&self, envelope: PostEnvelope) -> Result<(), SignalingError> {
        if envelope.from.trim().is_empty() {
            return Err(SignalingError::Rejected("Missing required fields".into()));
        }
        self.store.append(&self.scope, envelope).await?;
        Ok(())
    }

    async fn fetch(&self, peer_id: Option<&str>) -> Result<SignalBatch, SignalingError> {
        Ok(collect_signals(self.store.as_ref(), &self.scope, peer_id).await?)
    }

    async fn discovery_key(&self) -> Result<String, SignalingError> {
        Ok(self.scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tincan_signal::{RoomAdvert, ROOM_DISCOVERY};

    #[test_timeout::tokio_timeout_test]
    async fn addressed_envelopes_reach_their_recipient() {
        let relay = LocalRelay::new();
        relay
            .post(PostEnvelope::offer("peer-a", "peer-b", json!({ "sdp": "v=0" })))
            .await
            .unwrap();

        let for_b = relay.fetch(Some("peer-b")).await.unwrap();
        assert_eq!(for_b.signals.len(), 1);
        let for_c = relay.fetch(Some("peer-c")).await.unwrap();
        assert!(for_c.signals.is_empty());
        assert_eq!(for_c.all_signals.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn scopes_are_isolated() {
        let home = LocalRelay::new();
        let elsewhere = home.in_scope("198.51.100.7");
        let advert = RoomAdvert {
            room_name: "R1".into(),
            has_password: false,
        };
        home.post(PostEnvelope::advert("peer-h", &advert)).await.unwrap();

        let seen = home.fetch(None).await.unwrap();
        assert_eq!(seen.all_signals.len(), 1);
        assert_eq!(seen.all_signals[0].to, ROOM_DISCOVERY);
        assert!(elsewhere.fetch(None).await.unwrap().all_signals.is_empty());
        assert_ne!(
            home.discovery_key().await.unwrap(),
            elsewhere.discovery_key().await.unwrap()
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn blank_sender_is_rejected() {
        let relay = LocalRelay::new();
        let err = relay
            .post(PostEnvelope::offer(" ", "peer-b", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::Rejected(_)));
    }
}

//! Finding rooms on the local network and advertising our own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tincan_signal::{Envelope, PostEnvelope, RoomAdvert};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::protocol::PeerId;
use crate::signaling::{RelayClient, SignalingError};

/// A joinable room as seen from the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListing {
    /// Peer id of the advertising host.
    pub id: PeerId,
    pub name: String,
    pub has_password: bool,
    /// Relay timestamp of the advertisement.
    pub advertised_at: i64,
}

/// Latest advertisement per host, newest first.
pub fn list_rooms(envelopes: &[Envelope]) -> Vec<RoomListing> {
    let mut latest: HashMap<&str, RoomListing> = HashMap::new();
    for envelope in envelopes {
        let Some(advert) = envelope.room_advert() else {
            continue;
        };
        let listing = RoomListing {
            id: envelope.from.clone(),
            name: advert.room_name,
            has_password: advert.has_password,
            advertised_at: envelope.timestamp,
        };
        match latest.get(envelope.from.as_str()) {
            Some(existing) if existing.advertised_at > listing.advertised_at => {}
            _ => {
                latest.insert(envelope.from.as_str(), listing);
            }
        }
    }
    let mut rooms: Vec<RoomListing> = latest.into_values().collect();
    rooms.sort_by(|a, b| {
        b.advertised_at
            .cmp(&a.advertised_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    rooms
}

/// Polls the relay for room advertisements.
#[derive(Clone)]
pub struct RoomScanner {
    relay: Arc<dyn RelayClient>,
    interval: Duration,
}

impl RoomScanner {
    pub fn new(relay: Arc<dyn RelayClient>, interval: Duration) -> Self {
        Self { relay, interval }
    }

    pub async fn scan_once(&self) -> Result<Vec<RoomListing>, SignalingError> {
        let batch = self.relay.fetch(None).await?;
        Ok(list_rooms(&batch.all_signals))
    }

    /// Keep scanning in the background. A failed poll keeps the previous listing.
    pub fn watch(self) -> (watch::Receiver<Vec<RoomListing>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.scan_once().await {
                    Ok(rooms) => {
                        tx.send_if_modified(|current| {
                            if *current == rooms {
                                false
                            } else {
                                *current = rooms;
                                true
                            }
                        });
                    }
                    Err(err) => {
                        debug!(target: "tincan::discovery", error = %err, "room scan failed");
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }
        });
        (rx, task)
    }
}

/// Re-sends a host's room advertisement on a heartbeat until dropped or stopped.
pub struct Advertiser {
    task: JoinHandle<()>,
}

impl Advertiser {
    pub fn start(
        relay: Arc<dyn RelayClient>,
        host_id: PeerId,
        advert: RoomAdvert,
        interval: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!(target: "tincan::discovery", host = %host_id, room = %advert.room_name, "advertising room");
                if let Err(err) = relay.post(PostEnvelope::advert(host_id.clone(), &advert)).await {
                    warn!(target: "tincan::discovery", error = %err, "failed to advertise room");
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::LocalRelay;
    use serde_json::json;

    fn advert(from: &str, name: &str, locked: bool, timestamp: i64) -> Envelope {
        let body = RoomAdvert {
            room_name: name.into(),
            has_password: locked,
        };
        Envelope::stamp(PostEnvelope::advert(from, &body), format!("{from}-{timestamp}"), timestamp)
    }

    #[test]
    fn latest_advert_per_host_wins() {
        let envelopes = vec![
            advert("peer-h", "old name", false, 10),
            advert("peer-h", "new name", true, 20),
            advert("peer-k", "K room", false, 15),
        ];
        let rooms = list_rooms(&envelopes);
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].id, "peer-h");
        assert_eq!(rooms[0].name, "new name");
        assert!(rooms[0].has_password);
        assert_eq!(rooms[1].name, "K room");
    }

    #[test]
    fn handshake_envelopes_and_bad_adverts_are_skipped() {
        let mut bogus = advert("peer-z", "x", false, 5);
        bogus.data = json!({ "nope": true });
        let envelopes = vec![
            Envelope::stamp(PostEnvelope::offer("peer-a", "peer-b", json!({})), "e1", 3),
            bogus,
        ];
        assert!(list_rooms(&envelopes).is_empty());
    }

    #[test]
    fn listing_wire_shape() {
        let listing = &list_rooms(&[advert("peer-h", "R1", false, 1)])[0];
        assert_eq!(
            serde_json::to_value(listing).unwrap(),
            json!({ "id": "peer-h", "name": "R1", "hasPassword": false, "advertisedAt": 1 })
        );
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn advertiser_heartbeat_keeps_one_listing() {
        let relay: Arc<dyn RelayClient> = Arc::new(LocalRelay::new());
        let advertiser = Advertiser::start(
            relay.clone(),
            "peer-h".into(),
            RoomAdvert {
                room_name: "R1".into(),
                has_password: false,
            },
            Duration::from_secs(5),
        );
        tokio::time::sleep(Duration::from_secs(12)).await;

        let scanner = RoomScanner::new(relay.clone(), Duration::from_secs(3));
        let rooms = scanner.scan_once().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "R1");
        // three heartbeats, one live advertisement
        assert_eq!(relay.fetch(None).await.unwrap().all_signals.len(), 1);

        advertiser.stop();
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn scanner_watch_reports_new_rooms() {
        let relay: Arc<dyn RelayClient> = Arc::new(LocalRelay::new());
        let (mut rooms, task) = RoomScanner::new(relay.clone(), Duration::from_secs(3)).watch();
        relay
            .post(PostEnvelope::advert(
                "peer-h",
                &RoomAdvert {
                    room_name: "R1".into(),
                    has_password: true,
                },
            ))
            .await
            .unwrap();
        loop {
            if rooms.borrow_and_update().iter().any(|room| room.name == "R1") {
                break;
            }
            rooms.changed().await.unwrap();
        }
        task.abort();
    }
}

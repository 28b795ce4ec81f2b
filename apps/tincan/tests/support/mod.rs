#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tincan_client_core::crypto::KdfParams;
use tincan_client_core::signaling::LocalRelay;
use tincan_client_core::transport::memory::MemoryNetwork;
use tincan_client_core::{ClientConfig, PeerIdentity, Room, RoomEvent, RoomListing, RoomOptions, Tincan};
use tokio::sync::broadcast;

pub const POLL: Duration = Duration::from_millis(200);

/// One local network: a shared relay and an in-process transport fabric.
pub struct Lan {
    pub relay: Arc<LocalRelay>,
    pub network: MemoryNetwork,
}

impl Lan {
    pub fn new() -> Self {
        Self {
            relay: Arc::new(LocalRelay::new()),
            network: MemoryNetwork::new(),
        }
    }

    pub fn config() -> ClientConfig {
        ClientConfig {
            poll_interval: POLL,
            discovery_interval: Duration::from_millis(300),
            heartbeat_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        }
    }

    pub fn tincan(&self) -> Tincan {
        Tincan::new(Self::config(), self.relay.clone(), Arc::new(self.network.clone()))
            .with_kdf(KdfParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            })
    }

    pub async fn host(&self, id: &str, room: &str, password: Option<&str>) -> Room {
        self.tincan()
            .host(room, options(id, password))
            .await
            .expect("host room")
    }

    pub async fn join(&self, id: &str, host: &str, password: Option<&str>) -> Room {
        let listing = self.listing(host).await;
        self.tincan()
            .join(&listing, options(id, password))
            .await
            .expect("join room")
    }

    /// Scan until `host` shows up in the room list.
    pub async fn listing(&self, host: &str) -> RoomListing {
        let tincan = self.tincan();
        loop {
            let rooms = tincan.list_rooms().await.expect("list rooms");
            if let Some(room) = rooms.into_iter().find(|room| room.id == host) {
                return room;
            }
            tokio::time::sleep(POLL).await;
        }
    }
}

pub fn options(id: &str, password: Option<&str>) -> RoomOptions {
    RoomOptions {
        display_name: Some(id.trim_start_matches("peer-").to_uppercase()),
        password: password.map(str::to_string),
        peer_id: Some(id.to_string()),
    }
}

pub fn ids(members: &[PeerIdentity]) -> Vec<&str> {
    members.iter().map(|member| member.id.as_str()).collect()
}

/// Wait until `check` holds, re-evaluating on a short virtual-time tick.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    while !check() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Skip events until one matches.
pub async fn next_matching(
    events: &mut broadcast::Receiver<RoomEvent>,
    wanted: impl Fn(&RoomEvent) -> bool,
) -> RoomEvent {
    loop {
        let event = events.recv().await.expect("room event");
        if wanted(&event) {
            return event;
        }
    }
}

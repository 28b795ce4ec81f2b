//! The room facade: one chat room seen from one peer.
//!
//! [`Tincan`] hosts and joins rooms. A [`Room`] owns the peer's session, its chat log and, while
//! it is host, the room advertisement heartbeat. Everything that happens in the room is
//! published as [`RoomEvent`]s.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tincan_signal::RoomAdvert;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::gate::{self, GateError};
use crate::chat::{ChatLog, Reaction};
use crate::config::ClientConfig;
use crate::crypto::{self, CryptoError, KdfParams, SessionKey};
use crate::discovery::{Advertiser, RoomListing, RoomScanner};
use crate::protocol::{self, AppMessage, ChatMessage, PeerId, PeerIdentity};
use crate::session::{SessionError, SessionEvent, SessionEvents, SessionHandle, SessionManager};
use crate::signaling::{HttpRelayClient, RelayClient, RelayConfig, SignalingError};
use crate::transport::TransportFactory;
use crate::transport::webrtc::WebRtcTransportFactory;

const EVENT_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("only the host can do that")]
    NotHost,
    #[error("no such peer in the room: {0}")]
    UnknownPeer(PeerId),
    #[error("name cannot be empty")]
    InvalidName,
    #[error("this room requires a password")]
    PasswordRequired,
    #[error("access denied")]
    AccessDenied,
    #[error("host never became reachable")]
    HostUnreachable,
    #[error("room has ended")]
    Ended,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<GateError> for RoomError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::AccessDenied => RoomError::AccessDenied,
            GateError::HostUnreachable => RoomError::HostUnreachable,
            GateError::SessionClosed => RoomError::Session(SessionError::Closed),
            GateError::Crypto(err) => RoomError::Crypto(err),
        }
    }
}

/// What happened in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A message from another peer, already decrypted.
    Message(ChatMessage),
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    HistoryBurned { by: PeerId },
    /// The room was burned; [`RoomEvent::Ended`] follows.
    SessionBurned { by: PeerId },
    /// This peer is now the host.
    Promoted { by: PeerId },
    Ended,
}

#[derive(Debug, Clone, Default)]
pub struct RoomOptions {
    pub display_name: Option<String>,
    pub password: Option<String>,
    /// Fixed peer id; a random one is generated otherwise.
    pub peer_id: Option<PeerId>,
}

impl RoomOptions {
    fn identity(&self, is_host: bool) -> PeerIdentity {
        let id = self.peer_id.clone().unwrap_or_else(protocol::generate_peer_id);
        let name = self
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(protocol::default_display_name);
        PeerIdentity::new(id, name, is_host)
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|password| !password.is_empty())
    }
}

/// Entry point for hosting, finding and joining rooms.
#[derive(Clone)]
pub struct Tincan {
    config: ClientConfig,
    relay: Arc<dyn RelayClient>,
    transports: Arc<dyn TransportFactory>,
    kdf: KdfParams,
}

impl Tincan {
    pub fn new(
        config: ClientConfig,
        relay: Arc<dyn RelayClient>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            relay,
            transports,
            kdf: KdfParams::default(),
        }
    }

    /// HTTP relay and WebRTC transports as described by `config`.
    pub fn from_config(config: ClientConfig) -> Result<Self, RoomError> {
        let relay = HttpRelayClient::new(RelayConfig::new(&config.relay_url)?)?;
        let transports = WebRtcTransportFactory::new(&config.stun_servers);
        Ok(Self::new(config, Arc::new(relay), Arc::new(transports)))
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn scanner(&self) -> RoomScanner {
        RoomScanner::new(self.relay.clone(), self.config.discovery_interval)
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomListing>, RoomError> {
        Ok(self.scanner().scan_once().await?)
    }

    /// The relay's name for this network. Peers sharing it see each other's rooms.
    pub async fn network_key(&self) -> Result<String, RoomError> {
        Ok(self.relay.discovery_key().await?)
    }

    /// Open a new room and start advertising it.
    pub async fn host(&self, room_name: &str, options: RoomOptions) -> Result<Room, RoomError> {
        let room_name = room_name.trim();
        if room_name.is_empty() {
            return Err(RoomError::InvalidName);
        }
        let key = options.password().map(|password| self.derive(password)).transpose()?;
        let identity = options.identity(true);
        info!(target: "tincan::room", peer = %identity.id, room = %room_name, locked = key.is_some(), "hosting room");

        let (session, events) = self.spawn_session(identity.clone());
        let room = self.open_room(identity, room_name, key, session, events, Vec::new());
        room.shared.start_advertising();
        Ok(room)
    }

    /// Connect to the host of `listing` and pass its gate.
    pub async fn join(&self, listing: &RoomListing, options: RoomOptions) -> Result<Room, RoomError> {
        let key = if listing.has_password {
            let password = options.password().ok_or(RoomError::PasswordRequired)?;
            Some(self.derive(password)?)
        } else {
            None
        };
        let identity = options.identity(false);
        info!(target: "tincan::room", peer = %identity.id, host = %listing.id, room = %listing.name, "joining room");

        let (session, mut events) = self.spawn_session(identity.clone());
        session.connect(listing.id.clone())?;
        let admitted = gate::await_admission(
            &session,
            &mut events,
            &listing.id,
            key.as_ref(),
            self.config.handshake_timeout,
        )
        .await;
        match admitted {
            Ok(backlog) => Ok(self.open_room(identity, &listing.name, key, session, events, backlog)),
            Err(err) => {
                warn!(target: "tincan::room", host = %listing.id, error = %err, "join failed");
                session.shutdown().await;
                Err(err.into())
            }
        }
    }

    fn derive(&self, password: &str) -> Result<SessionKey, CryptoError> {
        crypto::derive_key(password, &self.config.key_salt, self.kdf)
    }

    fn spawn_session(&self, identity: PeerIdentity) -> (SessionHandle, SessionEvents) {
        SessionManager::spawn(
            identity,
            self.relay.clone(),
            self.transports.clone(),
            self.config.poll_interval,
        )
    }

    fn open_room(
        &self,
        identity: PeerIdentity,
        room_name: &str,
        key: Option<SessionKey>,
        session: SessionHandle,
        events: SessionEvents,
        backlog: Vec<SessionEvent>,
    ) -> Room {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(RoomShared {
            session,
            relay: self.relay.clone(),
            heartbeat: self.config.heartbeat_interval,
            events: events_tx,
            state: Mutex::new(RoomState {
                advert: RoomAdvert {
                    room_name: room_name.to_string(),
                    has_password: key.is_some(),
                },
                identity,
                log: ChatLog::new(key),
                advertiser: None,
                ended: false,
            }),
        });
        let driver = tokio::spawn(drive(shared.clone(), backlog, events));
        Room { shared, driver }
    }
}

struct RoomState {
    identity: PeerIdentity,
    advert: RoomAdvert,
    log: ChatLog,
    advertiser: Option<Advertiser>,
    ended: bool,
}

struct RoomShared {
    session: SessionHandle,
    relay: Arc<dyn RelayClient>,
    heartbeat: std::time::Duration,
    events: broadcast::Sender<RoomEvent>,
    state: Mutex<RoomState>,
}

impl RoomShared {
    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    fn start_advertising(&self) {
        let mut state = self.state.lock();
        if state.ended || state.advertiser.is_some() {
            return;
        }
        state.advertiser = Some(Advertiser::start(
            self.relay.clone(),
            state.identity.id.clone(),
            state.advert.clone(),
            self.heartbeat,
        ));
    }

    /// Change our own identity and tell the mesh.
    fn set_identity(&self, update: impl FnOnce(&mut PeerIdentity)) -> Result<(), RoomError> {
        let identity = {
            let mut state = self.state.lock();
            update(&mut state.identity);
            state.identity.clone()
        };
        self.session.update_metadata(identity)?;
        Ok(())
    }

    fn require_host(&self) -> Result<(), RoomError> {
        let state = self.state.lock();
        if state.ended {
            Err(RoomError::Ended)
        } else if !state.identity.is_host {
            Err(RoomError::NotHost)
        } else {
            Ok(())
        }
    }

    /// Wipe local state and close the session.
    async fn end(&self) {
        {
            let mut state = self.state.lock();
            state.ended = true;
            state.advertiser = None;
            state.log.burn();
        }
        self.session.shutdown().await;
    }

    async fn handle(&self, event: SessionEvent) -> bool {
        let (from, message) = match event {
            SessionEvent::PeerJoined(peer) => {
                self.emit(RoomEvent::PeerJoined(peer));
                return true;
            }
            SessionEvent::PeerLeft(peer) => {
                self.emit(RoomEvent::PeerLeft(peer));
                return true;
            }
            SessionEvent::Message { from, message } => (from, message),
        };

        let reaction = {
            let mut state = self.state.lock();
            let RoomState { identity, log, .. } = &mut *state;
            log.react(identity, &from, message)
        };
        match reaction {
            Reaction::Ignored => {}
            Reaction::Displayed(message) => self.emit(RoomEvent::Message(message)),
            Reaction::HistoryBurned { by } => self.emit(RoomEvent::HistoryBurned { by }),
            Reaction::SessionBurned { by } => {
                self.emit(RoomEvent::SessionBurned { by });
                self.end().await;
                return false;
            }
            Reaction::Promoted { by } => {
                if let Err(err) = self.set_identity(|identity| identity.is_host = true) {
                    debug!(target: "tincan::room", error = %err, "promotion after session end");
                    return false;
                }
                self.start_advertising();
                self.emit(RoomEvent::Promoted { by });
            }
            Reaction::Reply(reply) => {
                if self.session.broadcast(reply).is_err() {
                    return false;
                }
            }
        }
        true
    }
}

async fn drive(shared: Arc<RoomShared>, backlog: Vec<SessionEvent>, mut events: SessionEvents) {
    let mut running = true;
    for event in backlog {
        if !shared.handle(event).await {
            running = false;
            break;
        }
    }
    while running {
        match events.recv().await {
            Some(event) => running = shared.handle(event).await,
            None => running = false,
        }
    }
    {
        let mut state = shared.state.lock();
        state.ended = true;
        state.advertiser = None;
    }
    debug!(target: "tincan::room", peer = %shared.session.local_id(), "room ended");
    shared.emit(RoomEvent::Ended);
}

/// A room this peer is in.
pub struct Room {
    shared: Arc<RoomShared>,
    driver: JoinHandle<()>,
}

impl Room {
    pub fn local_id(&self) -> &str {
        self.shared.session.local_id()
    }

    pub fn identity(&self) -> PeerIdentity {
        self.shared.state.lock().identity.clone()
    }

    pub fn room_name(&self) -> String {
        self.shared.state.lock().advert.room_name.clone()
    }

    pub fn is_host(&self) -> bool {
        self.shared.state.lock().identity.is_host
    }

    pub fn is_encrypted(&self) -> bool {
        self.shared.state.lock().log.is_encrypted()
    }

    pub fn is_active(&self) -> bool {
        !self.shared.state.lock().ended
    }

    pub fn session(&self) -> &SessionHandle {
        &self.shared.session
    }

    /// Subscribe to what happens in the room from now on.
    pub fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.shared.events.subscribe()
    }

    /// Current members, self first.
    pub fn members(&self) -> Vec<PeerIdentity> {
        self.shared.session.snapshot()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.shared.state.lock().log.history().to_vec()
    }

    /// Send `text` to everyone; returns the message as recorded locally.
    pub fn send(&self, text: &str) -> Result<ChatMessage, RoomError> {
        let (shown, wire) = {
            let mut state = self.shared.state.lock();
            if state.ended {
                return Err(RoomError::Ended);
            }
            let RoomState { identity, log, .. } = &mut *state;
            let wire = log.compose(identity, text)?;
            let shown = log.history().last().cloned().unwrap_or_else(|| wire.clone());
            (shown, wire)
        };
        self.shared.session.broadcast(AppMessage::Chat { payload: wire })?;
        Ok(shown)
    }

    pub fn rename(&self, display_name: &str) -> Result<(), RoomError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(RoomError::InvalidName);
        }
        if !self.is_active() {
            return Err(RoomError::Ended);
        }
        self.shared
            .set_identity(|identity| identity.display_name = display_name.to_string())
    }

    /// Host only: every peer clears its history.
    pub fn burn_logs(&self) -> Result<(), RoomError> {
        self.shared.require_host()?;
        self.shared.session.broadcast(AppMessage::BurnLogs)?;
        self.shared.state.lock().log.clear();
        info!(target: "tincan::room", peer = %self.local_id(), "burned logs");
        self.shared.emit(RoomEvent::HistoryBurned {
            by: self.local_id().to_string(),
        });
        Ok(())
    }

    /// Host only: every peer wipes the room and disconnects.
    pub async fn burn_chat(&self) -> Result<(), RoomError> {
        self.shared.require_host()?;
        self.shared.session.broadcast(AppMessage::BurnChat)?;
        info!(target: "tincan::room", peer = %self.local_id(), "burning room");
        self.shared.emit(RoomEvent::SessionBurned {
            by: self.local_id().to_string(),
        });
        self.shared.end().await;
        Ok(())
    }

    /// Host only: hand the host role to `peer_id`.
    pub fn delegate_host(&self, peer_id: &str) -> Result<(), RoomError> {
        self.shared.require_host()?;
        let known = self
            .members()
            .iter()
            .skip(1)
            .any(|member| member.id == peer_id);
        if !known {
            return Err(RoomError::UnknownPeer(peer_id.to_string()));
        }
        self.shared.session.broadcast(AppMessage::DelegateHost {
            to: peer_id.to_string(),
        })?;
        self.shared.state.lock().advertiser = None;
        self.shared.set_identity(|identity| identity.is_host = false)?;
        info!(target: "tincan::room", to = %peer_id, "delegated host");
        Ok(())
    }

    /// Leave without affecting anyone else.
    pub async fn leave(&self) {
        if self.is_active() {
            info!(target: "tincan::room", peer = %self.local_id(), "leaving room");
        }
        self.shared.end().await;
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.shared.state.lock().advertiser = None;
        if !self.driver.is_finished() {
            let session = self.shared.session.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { session.shutdown().await });
            }
        }
    }
}

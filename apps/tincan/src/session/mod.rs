//! The peer session manager.
//!
//! One task owns every connection of a peer. Commands from the room layer, transport events and
//! relay envelopes all arrive over channels and are handled one at a time, so connection state
//! is never touched concurrently. A second task polls the relay and forwards new envelopes.

pub mod connection;
pub mod mesh;

pub use connection::{Connection, ConnectionState};
pub use mesh::membership_snapshot;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tincan_signal::{Envelope, EnvelopeKind, PostEnvelope};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::protocol::{self, AppMessage, PeerId, PeerIdentity};
use crate::signaling::{RelayClient, SignalCursor};
use crate::transport::{
    EventSink, Role, TransportEvent, TransportFactory, TransportNotice,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
}

/// What the session reports upward besides membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    /// An application message for the chat layer. Chat messages arrive at most once per id.
    Message { from: PeerId, message: AppMessage },
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

enum Command {
    Connect(PeerId),
    Broadcast(AppMessage),
    UpdateMetadata(PeerIdentity),
    ConnectionStates(oneshot::Sender<HashMap<PeerId, ConnectionState>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct SessionHandle {
    local_id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    membership: watch::Receiver<Vec<PeerIdentity>>,
}

impl SessionHandle {
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Dial `peer_id` unless a connection to it already exists.
    pub fn connect(&self, peer_id: impl Into<PeerId>) -> Result<(), SessionError> {
        self.send(Command::Connect(peer_id.into()))
    }

    /// Send to every connected peer.
    pub fn broadcast(&self, message: AppMessage) -> Result<(), SessionError> {
        self.send(Command::Broadcast(message))
    }

    /// Replace our own identity (name, host flag) and announce it.
    pub fn update_metadata(&self, identity: PeerIdentity) -> Result<(), SessionError> {
        self.send(Command::UpdateMetadata(identity))
    }

    pub fn membership(&self) -> watch::Receiver<Vec<PeerIdentity>> {
        self.membership.clone()
    }

    pub fn snapshot(&self) -> Vec<PeerIdentity> {
        self.membership.borrow().clone()
    }

    pub async fn connection_states(&self) -> Result<HashMap<PeerId, ConnectionState>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ConnectionStates(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stop polling, close every connection and wait for the session task to finish. Idempotent.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

pub struct SessionManager;

impl SessionManager {
    /// Start the session task and its relay poller for `identity`.
    pub fn spawn(
        identity: PeerIdentity,
        relay: Arc<dyn RelayClient>,
        transports: Arc<dyn TransportFactory>,
        poll_interval: Duration,
    ) -> (SessionHandle, SessionEvents) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (envelopes_tx, envelopes_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (membership_tx, membership_rx) = watch::channel(vec![identity.clone()]);

        let poller = tokio::spawn(poll_relay(
            relay.clone(),
            identity.id.clone(),
            poll_interval,
            envelopes_tx,
        ));

        let handle = SessionHandle {
            local_id: identity.id.clone(),
            commands: commands_tx,
            membership: membership_rx,
        };

        info!(target: "tincan::session", peer = %identity.id, name = %identity.display_name, host = identity.is_host, "session started");
        let actor = SessionActor {
            identity,
            relay,
            transports,
            connections: HashMap::new(),
            next_generation: 0,
            seen_messages: HashSet::new(),
            notices_tx,
            membership_tx,
            events_tx,
        };
        tokio::spawn(actor.run(commands_rx, notices_rx, envelopes_rx, poller));

        (handle, events_rx)
    }
}

struct SessionActor {
    identity: PeerIdentity,
    relay: Arc<dyn RelayClient>,
    transports: Arc<dyn TransportFactory>,
    connections: HashMap<PeerId, Connection>,
    next_generation: u64,
    /// Chat message ids already delivered or sent.
    seen_messages: HashSet<String>,
    notices_tx: mpsc::UnboundedSender<TransportNotice>,
    membership_tx: watch::Sender<Vec<PeerIdentity>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notices: mpsc::UnboundedReceiver<TransportNotice>,
        mut envelopes: mpsc::Receiver<Vec<Envelope>>,
        poller: JoinHandle<()>,
    ) {
        let mut reply_on_exit = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        reply_on_exit = Some(reply);
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(notice) = notices.recv() => self.on_notice(notice),
                Some(batch) = envelopes.recv() => {
                    for envelope in batch {
                        self.on_envelope(envelope);
                    }
                }
            }
        }

        drop(commands);
        poller.abort();
        self.teardown();
        if let Some(reply) = reply_on_exit {
            let _ = reply.send(());
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(peer_id) => self.connect(peer_id, None),
            Command::Broadcast(message) => {
                if let AppMessage::Chat { payload } = &message {
                    self.seen_messages.insert(payload.id.clone());
                }
                self.broadcast(&message);
            }
            Command::UpdateMetadata(identity) => {
                self.identity = PeerIdentity {
                    id: self.identity.id.clone(),
                    ..identity
                };
                self.publish_membership();
                self.broadcast(&AppMessage::MetadataUpdate {
                    payload: self.identity.clone(),
                });
            }
            Command::ConnectionStates(reply) => {
                let states = self
                    .connections
                    .values()
                    .map(|connection| (connection.peer_id.clone(), connection.state))
                    .collect();
                let _ = reply.send(states);
            }
            Command::Shutdown(_) => {}
        }
    }

    /// Dial `peer_id`. An unfinished connection to it is replaced, a connected one is kept.
    fn connect(&mut self, peer_id: PeerId, metadata: Option<PeerIdentity>) {
        if peer_id == self.identity.id {
            return;
        }
        let mut metadata = metadata;
        match self.connections.remove(&peer_id) {
            Some(existing) if existing.is_connected() => {
                trace!(target: "tincan::session", peer = %peer_id, "already connected");
                self.connections.insert(peer_id, existing);
                return;
            }
            Some(mut stale) => {
                debug!(target: "tincan::session", peer = %peer_id, state = ?stale.state, "redialing over unfinished connection");
                metadata = metadata.or_else(|| stale.last_known_metadata.take());
                stale.close();
            }
            None => {}
        }
        debug!(target: "tincan::session", peer = %peer_id, "dialing");
        self.open(peer_id, Role::Initiator, metadata);
    }

    fn open(&mut self, peer_id: PeerId, role: Role, metadata: Option<PeerIdentity>) -> bool {
        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = EventSink::new(
            self.identity.id.clone(),
            peer_id.clone(),
            generation,
            self.notices_tx.clone(),
        );
        match self.transports.create(role, sink) {
            Ok(transport) => {
                let connection = Connection::new(peer_id.clone(), generation, role, transport, metadata);
                self.connections.insert(peer_id, connection);
                true
            }
            Err(err) => {
                warn!(target: "tincan::session", peer = %peer_id, error = %err, "failed to create transport");
                false
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        if envelope.from == self.identity.id || envelope.to != self.identity.id {
            return;
        }
        let from = envelope.from;
        match envelope.kind {
            EnvelopeKind::Offer => {
                let replaced_metadata = match self.connections.get(&from) {
                    Some(existing) if existing.is_connected() => {
                        debug!(target: "tincan::session", peer = %from, "ignoring offer from connected peer");
                        return;
                    }
                    Some(existing)
                        if existing.is_pending_initiator()
                            && mesh::keeps_own_offer(&self.identity.id, &from) =>
                    {
                        debug!(target: "tincan::session", peer = %from, "both sides dialed; keeping our offer");
                        return;
                    }
                    Some(existing) => existing.last_known_metadata.clone(),
                    None => None,
                };
                if let Some(mut stale) = self.connections.remove(&from) {
                    debug!(target: "tincan::session", peer = %from, "inbound offer supersedes pending connection");
                    stale.close();
                }
                if self.open(from.clone(), Role::Responder, replaced_metadata) {
                    if let Some(connection) = self.connections.get(&from) {
                        connection.transport.signal(envelope.data);
                    }
                }
            }
            EnvelopeKind::Answer => match self.connections.get(&from) {
                Some(connection) if connection.is_pending_initiator() => {
                    connection.transport.signal(envelope.data);
                }
                _ => trace!(target: "tincan::session", peer = %from, "discarding stale answer"),
            },
        }
    }

    fn on_notice(&mut self, notice: TransportNotice) {
        let TransportNotice {
            peer_id,
            generation,
            event,
        } = notice;
        let Some(connection) = self.connections.get_mut(&peer_id) else {
            return;
        };
        if connection.generation != generation {
            trace!(target: "tincan::session", peer = %peer_id, generation, "event from replaced transport");
            return;
        }

        match event {
            TransportEvent::Signal(description) => {
                let kind = match connection.role() {
                    Some(Role::Initiator) => EnvelopeKind::Offer,
                    Some(Role::Responder) => EnvelopeKind::Answer,
                    None => return,
                };
                self.post(PostEnvelope {
                    kind,
                    from: self.identity.id.clone(),
                    to: peer_id,
                    data: description,
                });
            }
            TransportEvent::Connected => {
                if connection.is_connected() {
                    return;
                }
                connection.state = ConnectionState::Connected;
                info!(target: "tincan::mesh", peer = %peer_id, "peer connected");
                let introduction = mesh::introduction_for(connection);
                self.publish_membership();
                let _ = self.events_tx.send(SessionEvent::PeerJoined(peer_id));
                self.broadcast(&AppMessage::MetadataUpdate {
                    payload: self.identity.clone(),
                });
                if self.identity.is_host {
                    self.broadcast(&introduction);
                }
            }
            TransportEvent::Data(payload) => self.on_payload(peer_id, &payload),
            TransportEvent::Closed => self.drop_connection(&peer_id, "closed"),
            TransportEvent::Error(reason) => {
                warn!(target: "tincan::session", peer = %peer_id, %reason, "transport error");
                self.drop_connection(&peer_id, "error");
            }
        }
    }

    fn on_payload(&mut self, from: PeerId, payload: &[u8]) {
        let message = match protocol::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(target: "tincan::session", peer = %from, error = %err, "dropping undecodable payload");
                return;
            }
        };
        trace!(target: "tincan::session", peer = %from, kind = message.kind(), "application message");

        match message {
            AppMessage::MetadataUpdate { payload } => {
                if let Some(connection) = self.connections.get_mut(&from) {
                    connection.last_known_metadata = Some(PeerIdentity {
                        id: from.clone(),
                        ..payload
                    });
                    self.publish_membership();
                }
            }
            AppMessage::PeerIntroduction { payload } => {
                let known = self
                    .connections
                    .get(&payload.id)
                    .is_some_and(Connection::is_connected);
                if mesh::should_dial(&self.identity.id, &payload, known) {
                    info!(target: "tincan::mesh", peer = %payload.id, via = %from, "dialing introduced peer");
                    self.connect(payload.id, Some(payload.metadata));
                }
            }
            AppMessage::Chat { payload } => {
                if !self.seen_messages.insert(payload.id.clone()) {
                    trace!(target: "tincan::session", id = %payload.id, "duplicate chat message");
                    return;
                }
                let _ = self.events_tx.send(SessionEvent::Message {
                    from,
                    message: AppMessage::Chat { payload },
                });
            }
            message => {
                let _ = self.events_tx.send(SessionEvent::Message { from, message });
            }
        }
    }

    fn broadcast(&self, message: &AppMessage) {
        let payload = match protocol::encode(message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "tincan::session", error = %err, "failed to encode message");
                return;
            }
        };
        for connection in self.connections.values().filter(|c| c.is_connected()) {
            if let Err(err) = connection.transport.send(payload.clone()) {
                warn!(
                    target: "tincan::session",
                    peer = %connection.peer_id,
                    kind = message.kind(),
                    error = %err,
                    "send failed"
                );
            }
        }
    }

    fn post(&self, envelope: PostEnvelope) {
        let relay = self.relay.clone();
        tokio::spawn(async move {
            let kind = envelope.kind;
            let to = envelope.to.clone();
            if let Err(err) = relay.post(envelope).await {
                warn!(target: "tincan::relay", to = %to, kind = kind.as_str(), error = %err, "failed to post envelope");
            }
        });
    }

    fn drop_connection(&mut self, peer_id: &str, reason: &str) {
        let Some(mut connection) = self.connections.remove(peer_id) else {
            return;
        };
        let was_connected = connection.is_connected();
        connection.close();
        debug!(target: "tincan::session", peer = %peer_id, reason, was_connected, "connection removed");
        if was_connected {
            self.publish_membership();
            let _ = self.events_tx.send(SessionEvent::PeerLeft(peer_id.to_string()));
        }
    }

    fn publish_membership(&self) {
        let members = membership_snapshot(&self.identity, self.connections.values());
        self.membership_tx.send_replace(members);
    }

    fn teardown(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.close();
        }
        self.seen_messages.clear();
        self.publish_membership();
        info!(target: "tincan::session", peer = %self.identity.id, "session closed");
    }
}

async fn poll_relay(
    relay: Arc<dyn RelayClient>,
    peer_id: PeerId,
    interval: Duration,
    envelopes: mpsc::Sender<Vec<Envelope>>,
) {
    let mut cursor = SignalCursor::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match relay.fetch(Some(&peer_id)).await {
            Ok(batch) => {
                let fresh = cursor.fresh(batch.signals);
                if !fresh.is_empty() && envelopes.send(fresh).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(target: "tincan::relay", error = %err, "relay poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChatMessage;
    use crate::signaling::LocalRelay;
    use crate::transport::PeerTransport;
    use crate::transport::memory::MemoryNetwork;

    const POLL: Duration = Duration::from_millis(100);

    fn spawn(
        id: &str,
        host: bool,
        relay: &Arc<LocalRelay>,
        network: &MemoryNetwork,
    ) -> (SessionHandle, SessionEvents) {
        SessionManager::spawn(
            PeerIdentity::new(id, id.to_uppercase(), host),
            relay.clone(),
            Arc::new(network.clone()),
            POLL,
        )
    }

    async fn wait_for_members(handle: &SessionHandle, count: usize) -> Vec<PeerIdentity> {
        let mut membership = handle.membership();
        loop {
            let current = membership.borrow_and_update().clone();
            if current.len() == count {
                return current;
            }
            membership.changed().await.unwrap();
        }
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn joiner_dials_host_through_relay() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _host_events) = spawn("peer-h", true, &relay, &network);
        let (joiner, _joiner_events) = spawn("peer-j", false, &relay, &network);

        joiner.connect("peer-h").unwrap();
        let members = wait_for_members(&joiner, 2).await;
        assert_eq!(members[0].id, "peer-j");
        assert_eq!(members[1].id, "peer-h");
        let host_view = wait_for_members(&host, 2).await;
        assert_eq!(host_view[0].id, "peer-h");

        let states = joiner.connection_states().await.unwrap();
        assert_eq!(states.get("peer-h"), Some(&ConnectionState::Connected));
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn duplicate_chat_ids_are_delivered_once() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _host_events) = spawn("peer-h", true, &relay, &network);
        let (joiner, mut joiner_events) = spawn("peer-j", false, &relay, &network);
        joiner.connect("peer-h").unwrap();
        wait_for_members(&host, 2).await;
        wait_for_members(&joiner, 2).await;

        let identity = PeerIdentity::new("peer-h", "H", true);
        let message = ChatMessage::new(&identity, "once");
        host.broadcast(AppMessage::Chat { payload: message.clone() }).unwrap();
        host.broadcast(AppMessage::Chat { payload: message.clone() }).unwrap();
        host.broadcast(AppMessage::BurnLogs).unwrap();

        let mut chats = 0;
        loop {
            match joiner_events.recv().await.unwrap() {
                SessionEvent::Message { message: AppMessage::Chat { payload }, .. } => {
                    assert_eq!(payload, message);
                    chats += 1;
                }
                SessionEvent::Message { message: AppMessage::BurnLogs, .. } => break,
                _ => {}
            }
        }
        assert_eq!(chats, 1);
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn failed_send_does_not_abort_broadcast() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _) = spawn("peer-h", true, &relay, &network);
        let (a, mut a_events) = spawn("peer-a", false, &relay, &network);
        let (b, mut b_events) = spawn("peer-b", false, &relay, &network);
        a.connect("peer-h").unwrap();
        b.connect("peer-h").unwrap();
        wait_for_members(&host, 3).await;

        network.fail_sends("peer-h", "peer-a");
        host.broadcast(AppMessage::BurnChat).unwrap();

        loop {
            if let SessionEvent::Message { message: AppMessage::BurnChat, from } =
                b_events.recv().await.unwrap()
            {
                assert_eq!(from, "peer-h");
                break;
            }
        }
        tokio::time::sleep(POLL).await;
        while let Ok(event) = a_events.try_recv() {
            assert!(!matches!(event, SessionEvent::Message { message: AppMessage::BurnChat, .. }));
        }
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn disconnect_updates_membership_and_reports_departure() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, mut host_events) = spawn("peer-h", true, &relay, &network);
        let (joiner, _) = spawn("peer-j", false, &relay, &network);
        joiner.connect("peer-h").unwrap();
        wait_for_members(&host, 2).await;

        network.disconnect("peer-h", "peer-j");
        let members = wait_for_members(&host, 1).await;
        assert_eq!(members[0].id, "peer-h");
        loop {
            if let SessionEvent::PeerLeft(peer) = host_events.recv().await.unwrap() {
                assert_eq!(peer, "peer-j");
                break;
            }
        }
        assert!(host.connection_states().await.unwrap().is_empty());
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn metadata_updates_replace_cached_identity() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _) = spawn("peer-h", true, &relay, &network);
        let (joiner, _) = spawn("peer-j", false, &relay, &network);
        joiner.connect("peer-h").unwrap();
        wait_for_members(&host, 2).await;

        joiner
            .update_metadata(PeerIdentity::new("spoofed-id", "Juniper", false))
            .unwrap();
        let mut membership = host.membership();
        loop {
            let members = membership.borrow_and_update().clone();
            if members.get(1).is_some_and(|m| m.display_name == "Juniper") {
                assert_eq!(members[1].id, "peer-j");
                break;
            }
            membership.changed().await.unwrap();
        }
        assert_eq!(joiner.snapshot()[0].display_name, "Juniper");
        assert_eq!(joiner.snapshot()[0].id, "peer-j");
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn offers_from_connected_peers_are_ignored() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _) = spawn("peer-h", true, &relay, &network);
        let (joiner, _) = spawn("peer-j", false, &relay, &network);
        joiner.connect("peer-h").unwrap();
        wait_for_members(&host, 2).await;

        relay
            .post(PostEnvelope::offer("peer-j", "peer-h", serde_json::json!({ "kind": "offer", "endpoint": 999 })))
            .await
            .unwrap();
        tokio::time::sleep(POLL * 3).await;
        let states = host.connection_states().await.unwrap();
        assert_eq!(states.get("peer-j"), Some(&ConnectionState::Connected));
        assert_eq!(network.link_count(), 1);
    }

    /// An initiator endpoint on `network` for `local` dialing `remote`, driven by hand.
    fn manual_dial(
        network: &MemoryNetwork,
        local: &str,
        remote: &str,
    ) -> (Box<dyn PeerTransport>, mpsc::UnboundedReceiver<TransportNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = network
            .create(Role::Initiator, EventSink::new(local, remote, 1, tx))
            .unwrap();
        (transport, rx)
    }

    async fn next_description(notices: &mut mpsc::UnboundedReceiver<TransportNotice>) -> serde_json::Value {
        loop {
            if let TransportEvent::Signal(description) = notices.recv().await.unwrap().event {
                return description;
            }
        }
    }

    async fn answer_for(relay: &LocalRelay, to: &str, from: &str) -> serde_json::Value {
        loop {
            let batch = relay.fetch(Some(to)).await.unwrap();
            if let Some(answer) = batch
                .signals
                .into_iter()
                .find(|envelope| envelope.from == from && envelope.kind == EnvelopeKind::Answer)
            {
                return answer.data;
            }
            tokio::time::sleep(POLL).await;
        }
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn simultaneous_dials_still_connect() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (a, _) = spawn("peer-a", false, &relay, &network);
        let (b, _) = spawn("peer-b", false, &relay, &network);

        a.connect("peer-b").unwrap();
        b.connect("peer-a").unwrap();
        wait_for_members(&a, 2).await;
        wait_for_members(&b, 2).await;

        tokio::time::sleep(POLL * 5).await;
        assert_eq!(
            a.connection_states().await.unwrap().get("peer-b"),
            Some(&ConnectionState::Connected)
        );
        assert_eq!(
            b.connection_states().await.unwrap().get("peer-a"),
            Some(&ConnectionState::Connected)
        );
        assert_eq!(network.link_count(), 1);
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn inbound_offer_replaces_pending_dial_of_larger_id() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (b, _) = spawn("peer-b", false, &relay, &network);
        b.connect("peer-a").unwrap();
        tokio::time::sleep(POLL).await;
        assert_eq!(
            b.connection_states().await.unwrap().get("peer-a"),
            Some(&ConnectionState::Pending(Role::Initiator))
        );

        let (dialer, mut notices) = manual_dial(&network, "peer-a", "peer-b");
        let offer = next_description(&mut notices).await;
        relay.post(PostEnvelope::offer("peer-a", "peer-b", offer)).await.unwrap();

        let answer = answer_for(&relay, "peer-a", "peer-b").await;
        assert_eq!(
            b.connection_states().await.unwrap().get("peer-a"),
            Some(&ConnectionState::Pending(Role::Responder))
        );
        dialer.signal(answer);
        let members = wait_for_members(&b, 2).await;
        assert_eq!(members[1].id, "peer-a");
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn smaller_id_keeps_its_dial_against_inbound_offer() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (a, _) = spawn("peer-a", false, &relay, &network);
        a.connect("peer-b").unwrap();
        tokio::time::sleep(POLL).await;

        let (_dialer, mut notices) = manual_dial(&network, "peer-b", "peer-a");
        let offer = next_description(&mut notices).await;
        relay.post(PostEnvelope::offer("peer-b", "peer-a", offer)).await.unwrap();
        tokio::time::sleep(POLL * 3).await;

        assert_eq!(
            a.connection_states().await.unwrap().get("peer-b"),
            Some(&ConnectionState::Pending(Role::Initiator))
        );
        let answered = relay
            .fetch(Some("peer-b"))
            .await
            .unwrap()
            .signals
            .iter()
            .any(|envelope| envelope.kind == EnvelopeKind::Answer);
        assert!(!answered);
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn redial_recovers_an_abandoned_answer() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (b, _) = spawn("peer-b", false, &relay, &network);

        // b answers an offer whose dialer never reads the answer
        let (_dialer, mut notices) = manual_dial(&network, "peer-a", "peer-b");
        let offer = next_description(&mut notices).await;
        relay.post(PostEnvelope::offer("peer-a", "peer-b", offer)).await.unwrap();
        answer_for(&relay, "peer-a", "peer-b").await;
        assert_eq!(
            b.connection_states().await.unwrap().get("peer-a"),
            Some(&ConnectionState::Pending(Role::Responder))
        );

        let (a, _) = spawn("peer-a", false, &relay, &network);
        tokio::time::sleep(POLL * 3).await;
        b.connect("peer-a").unwrap();
        wait_for_members(&a, 2).await;
        wait_for_members(&b, 2).await;
        assert_eq!(
            b.connection_states().await.unwrap().get("peer-a"),
            Some(&ConnectionState::Connected)
        );
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn stray_answers_are_discarded() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _) = spawn("peer-h", true, &relay, &network);
        let (joiner, _) = spawn("peer-j", false, &relay, &network);
        joiner.connect("peer-h").unwrap();
        wait_for_members(&host, 2).await;

        let bogus = serde_json::json!({ "kind": "answer", "endpoint": 999 });
        relay
            .post(PostEnvelope::answer("peer-z", "peer-h", bogus.clone()))
            .await
            .unwrap();
        relay
            .post(PostEnvelope::answer("peer-j", "peer-h", bogus))
            .await
            .unwrap();
        tokio::time::sleep(POLL * 3).await;

        let states = host.connection_states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states.get("peer-j"), Some(&ConnectionState::Connected));
        assert_eq!(host.snapshot().len(), 2);
        assert_eq!(network.link_count(), 1);
    }

    #[test_timeout::tokio_timeout_test(30, paused)]
    async fn shutdown_closes_connections() {
        let relay = Arc::new(LocalRelay::new());
        let network = MemoryNetwork::new();
        let (host, _) = spawn("peer-h", true, &relay, &network);
        let (joiner, _) = spawn("peer-j", false, &relay, &network);
        joiner.connect("peer-h").unwrap();
        wait_for_members(&host, 2).await;

        joiner.shutdown().await;
        assert!(joiner.is_closed());
        assert!(joiner.broadcast(AppMessage::BurnLogs).is_err());
        assert_eq!(wait_for_members(&host, 1).await.len(), 1);
        assert_eq!(network.link_count(), 0);
        // a second shutdown is harmless
        joiner.shutdown().await;
    }
}

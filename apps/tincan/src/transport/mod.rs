//! Point-to-point connections between two peers.
//!
//! A transport is created as initiator or responder, trades opaque session descriptions through
//! the session manager, and then carries byte payloads. Everything it has to say comes back as a
//! [`TransportEvent`] through its [`EventSink`], tagged with the connection generation so late
//! events from a replaced transport can be told apart.

pub mod memory;
pub mod webrtc;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Local session description to hand to the remote side.
    Signal(Value),
    Connected,
    Data(Bytes),
    Closed,
    Error(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport is closed")]
    Closed,
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("transport setup failed: {0}")]
    Setup(String),
}

/// One event, addressed to the connection it came from.
#[derive(Debug, Clone)]
pub struct TransportNotice {
    pub peer_id: PeerId,
    pub generation: u64,
    pub event: TransportEvent,
}

#[derive(Debug, Clone)]
pub struct EventSink {
    local_id: PeerId,
    peer_id: PeerId,
    generation: u64,
    tx: mpsc::UnboundedSender<TransportNotice>,
}

impl EventSink {
    pub fn new(
        local_id: impl Into<PeerId>,
        peer_id: impl Into<PeerId>,
        generation: u64,
        tx: mpsc::UnboundedSender<TransportNotice>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            peer_id: peer_id.into(),
            generation,
            tx,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// The remote end of the connection.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Returns false once the session manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportNotice {
                peer_id: self.peer_id.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

pub trait PeerTransport: Send + Sync {
    /// Feed the remote side's session description.
    fn signal(&self, description: Value);

    fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Tear the connection down. Emits nothing locally.
    fn close(&self);
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, role: Role, events: EventSink) -> Result<Box<dyn PeerTransport>, TransportError>;
}

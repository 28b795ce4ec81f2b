use std::fmt;

use crate::protocol::{PeerId, PeerIdentity};
use crate::transport::{PeerTransport, Role};

/// Lifecycle of one connection. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending(Role),
    Connected,
    Closed,
}

/// The session's view of one remote peer.
pub struct Connection {
    pub peer_id: PeerId,
    /// Distinguishes this attempt from earlier ones to the same peer.
    pub generation: u64,
    pub state: ConnectionState,
    pub transport: Box<dyn PeerTransport>,
    pub last_known_metadata: Option<PeerIdentity>,
}

impl Connection {
    pub fn new(
        peer_id: PeerId,
        generation: u64,
        role: Role,
        transport: Box<dyn PeerTransport>,
        metadata: Option<PeerIdentity>,
    ) -> Self {
        Self {
            peer_id,
            generation,
            state: ConnectionState::Pending(role),
            transport,
            last_known_metadata: metadata,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_pending_initiator(&self) -> bool {
        self.state == ConnectionState::Pending(Role::Initiator)
    }

    pub fn role(&self) -> Option<Role> {
        match self.state {
            ConnectionState::Pending(role) => Some(role),
            _ => None,
        }
    }

    /// Cached metadata, or the anonymous placeholder until the peer announces itself.
    pub fn identity(&self) -> PeerIdentity {
        self.last_known_metadata
            .clone()
            .unwrap_or_else(|| PeerIdentity::anonymous(self.peer_id.clone()))
    }

    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.transport.close();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_id", &self.peer_id)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("last_known_metadata", &self.last_known_metadata)
            .finish()
    }
}

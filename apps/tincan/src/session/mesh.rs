//! Membership and introductions.
//!
//! A joiner only dials the host. When a newcomer connects, the host introduces it to everyone it
//! is already connected to, and each of those peers dials the newcomer. Every pair therefore has
//! exactly one dialing side, and the graph converges to a full mesh. If two peers still dial each
//! other at once (a manual redial), [`keeps_own_offer`] picks the side whose offer survives.

use super::connection::Connection;
use crate::protocol::{AppMessage, PeerIdentity, PeerIntroduction};

/// Self first, then every connected peer in the order its connection was opened. Pending
/// connections are invisible.
pub fn membership_snapshot<'a>(
    local: &PeerIdentity,
    connections: impl IntoIterator<Item = &'a Connection>,
) -> Vec<PeerIdentity> {
    let mut connected: Vec<&Connection> = connections
        .into_iter()
        .filter(|connection| connection.is_connected())
        .collect();
    connected.sort_by_key(|connection| connection.generation);

    let mut members = Vec::with_capacity(connected.len() + 1);
    members.push(local.clone());
    members.extend(connected.into_iter().map(Connection::identity));
    members
}

/// What the host tells the mesh about a peer that just connected to it.
pub fn introduction_for(newcomer: &Connection) -> AppMessage {
    AppMessage::PeerIntroduction {
        payload: PeerIntroduction {
            id: newcomer.peer_id.clone(),
            metadata: newcomer.identity(),
        },
    }
}

/// Whether an introduction should make this peer dial the introduced one. `connected` is whether
/// a live connection to it already exists; an unfinished one gets redialed.
pub fn should_dial(local_id: &str, introduced: &PeerIntroduction, connected: bool) -> bool {
    introduced.id != local_id && !connected
}

/// When two peers dial each other at once, the one with the smaller id keeps its offer and the
/// other answers it.
pub fn keeps_own_offer(local_id: &str, remote_id: &str) -> bool {
    local_id < remote_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::connection::ConnectionState;
    use crate::transport::{PeerTransport, Role, TransportError};
    use bytes::Bytes;
    use serde_json::Value;

    struct NullTransport;

    impl PeerTransport for NullTransport {
        fn signal(&self, _description: Value) {}

        fn send(&self, _payload: Bytes) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&self) {}
    }

    fn connection(id: &str, generation: u64, state: ConnectionState) -> Connection {
        let mut connection = Connection::new(
            id.to_string(),
            generation,
            Role::Initiator,
            Box::new(NullTransport),
            None,
        );
        connection.state = state;
        connection
    }

    fn ids(members: &[PeerIdentity]) -> Vec<&str> {
        members.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn self_first_then_connected_in_open_order() {
        let local = PeerIdentity::new("peer-self", "me", false);
        let connections = [
            connection("peer-c", 3, ConnectionState::Connected),
            connection("peer-a", 1, ConnectionState::Connected),
            connection("peer-p", 2, ConnectionState::Pending(Role::Responder)),
            connection("peer-x", 4, ConnectionState::Closed),
        ];
        let members = membership_snapshot(&local, connections.iter());
        assert_eq!(ids(&members), vec!["peer-self", "peer-a", "peer-c"]);
    }

    #[test]
    fn alone_is_just_self() {
        let local = PeerIdentity::new("peer-self", "me", true);
        assert_eq!(membership_snapshot(&local, std::iter::empty()), vec![local]);
    }

    #[test]
    fn unknown_metadata_shows_as_anonymous() {
        let local = PeerIdentity::new("peer-self", "me", false);
        let mut named = connection("peer-n", 1, ConnectionState::Connected);
        named.last_known_metadata = Some(PeerIdentity::new("peer-n", "Nadia", true));
        let quiet = connection("peer-q", 2, ConnectionState::Connected);
        let members = membership_snapshot(&local, [&named, &quiet]);
        assert_eq!(members[1].display_name, "Nadia");
        assert!(members[1].is_host);
        assert_eq!(members[2], PeerIdentity::anonymous("peer-q"));
    }

    #[test]
    fn introductions_name_the_newcomer() {
        let newcomer = connection("peer-j", 7, ConnectionState::Connected);
        match introduction_for(&newcomer) {
            AppMessage::PeerIntroduction { payload } => {
                assert_eq!(payload.id, "peer-j");
                assert_eq!(payload.metadata.display_name, "Anonymous");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dial_only_unknown_others() {
        let intro = PeerIntroduction {
            id: "peer-j".into(),
            metadata: PeerIdentity::anonymous("peer-j"),
        };
        assert!(should_dial("peer-k", &intro, false));
        assert!(!should_dial("peer-k", &intro, true));
        assert!(!should_dial("peer-j", &intro, false));
    }

    #[test]
    fn exactly_one_side_keeps_its_offer() {
        assert!(keeps_own_offer("peer-a", "peer-b"));
        assert!(!keeps_own_offer("peer-b", "peer-a"));
    }
}

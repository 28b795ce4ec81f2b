use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{EventSink, PeerTransport, Role, TransportError, TransportEvent, TransportFactory};
use crate::protocol::PeerId;

/// In-process stand-in for a peer-to-peer network.
///
/// Every peer of a test shares one network. An initiator's description names its endpoint; the
/// responder answers with its own, and feeding that answer back links the pair and reports
/// `Connected` on both sides. Nothing leaves the process.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    next_endpoint: u64,
    endpoints: HashMap<u64, Endpoint>,
    blocked: HashSet<(PeerId, PeerId)>,
}

struct Endpoint {
    role: Role,
    sink: EventSink,
    /// Initiator endpoint this responder answered.
    answered: Option<u64>,
    linked: Option<u64>,
}

impl Endpoint {
    fn owner(&self) -> &str {
        self.sink.local_id()
    }

    fn remote(&self) -> &str {
        self.sink.peer_id()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every live link between `a` and `b`, reporting `Closed` to both sides.
    pub fn disconnect(&self, a: &str, b: &str) {
        let mut state = self.state.lock();
        let doomed: Vec<u64> = state
            .endpoints
            .iter()
            .filter(|(_, endpoint)| {
                (endpoint.owner() == a && endpoint.remote() == b)
                    || (endpoint.owner() == b && endpoint.remote() == a)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            if let Some(endpoint) = state.endpoints.remove(&id) {
                endpoint.sink.emit(TransportEvent::Closed);
            }
        }
    }

    /// Make every send from `from` to `to` fail until the network is dropped.
    pub fn fail_sends(&self, from: &str, to: &str) {
        self.state
            .lock()
            .blocked
            .insert((from.to_string(), to.to_string()));
    }

    /// Number of linked endpoint pairs, counted once per pair.
    pub fn link_count(&self) -> usize {
        let state = self.state.lock();
        state
            .endpoints
            .values()
            .filter(|endpoint| endpoint.linked.is_some())
            .count()
            / 2
    }

    fn signal(&self, endpoint_id: u64, description: Value) {
        let mut state = self.state.lock();
        let Some(endpoint) = state.endpoints.get(&endpoint_id) else {
            return;
        };
        let role = endpoint.role;
        let sink = endpoint.sink.clone();

        let (kind, remote) = match parse_description(&description) {
            Some(parsed) => parsed,
            None => {
                sink.emit(TransportEvent::Error("unreadable description".into()));
                return;
            }
        };

        match (role, kind) {
            (Role::Responder, "offer") => {
                if !state.endpoints.contains_key(&remote) {
                    sink.emit(TransportEvent::Error(format!("unknown endpoint {remote}")));
                    return;
                }
                if let Some(endpoint) = state.endpoints.get_mut(&endpoint_id) {
                    endpoint.answered = Some(remote);
                }
                sink.emit(TransportEvent::Signal(
                    json!({ "kind": "answer", "endpoint": endpoint_id }),
                ));
            }
            (Role::Initiator, "answer") => {
                let answers_us = state
                    .endpoints
                    .get(&remote)
                    .is_some_and(|responder| responder.answered == Some(endpoint_id));
                if !answers_us {
                    sink.emit(TransportEvent::Error(format!("unknown endpoint {remote}")));
                    return;
                }
                for (this, other) in [(endpoint_id, remote), (remote, endpoint_id)] {
                    if let Some(endpoint) = state.endpoints.get_mut(&this) {
                        endpoint.linked = Some(other);
                        endpoint.sink.emit(TransportEvent::Connected);
                    }
                }
            }
            (_, kind) => {
                sink.emit(TransportEvent::Error(format!(
                    "unexpected {kind} description for {role:?}"
                )));
            }
        }
    }

    fn send(&self, endpoint_id: u64, payload: Bytes) -> Result<(), TransportError> {
        let state = self.state.lock();
        let endpoint = state
            .endpoints
            .get(&endpoint_id)
            .ok_or(TransportError::Closed)?;
        let remote = endpoint
            .linked
            .and_then(|remote| state.endpoints.get(&remote))
            .ok_or(TransportError::NotConnected)?;
        let route = (endpoint.owner().to_string(), remote.owner().to_string());
        if state.blocked.contains(&route) {
            return Err(TransportError::NotConnected);
        }
        remote.sink.emit(TransportEvent::Data(payload));
        Ok(())
    }

    fn close(&self, endpoint_id: u64) {
        let mut state = self.state.lock();
        let Some(endpoint) = state.endpoints.remove(&endpoint_id) else {
            return;
        };
        if let Some(remote) = endpoint.linked.and_then(|id| state.endpoints.remove(&id)) {
            remote.sink.emit(TransportEvent::Closed);
        }
    }
}

impl TransportFactory for MemoryNetwork {
    fn create(&self, role: Role, events: EventSink) -> Result<Box<dyn PeerTransport>, TransportError> {
        let mut state = self.state.lock();
        state.next_endpoint += 1;
        let id = state.next_endpoint;
        if role == Role::Initiator {
            events.emit(TransportEvent::Signal(
                json!({ "kind": "offer", "endpoint": id }),
            ));
        }
        state.endpoints.insert(
            id,
            Endpoint {
                role,
                sink: events,
                answered: None,
                linked: None,
            },
        );
        Ok(Box::new(MemoryTransport {
            network: self.clone(),
            endpoint: id,
        }))
    }
}

struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: u64,
}

impl PeerTransport for MemoryTransport {
    fn signal(&self, description: Value) {
        self.network.signal(self.endpoint, description);
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.network.send(self.endpoint, payload)
    }

    fn close(&self) {
        self.network.close(self.endpoint);
    }
}

fn parse_description(description: &Value) -> Option<(&str, u64)> {
    let kind = description.get("kind")?.as_str()?;
    let endpoint = description.get("endpoint")?.as_u64()?;
    Some((kind, endpoint))
}

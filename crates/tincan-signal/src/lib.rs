//! Relay-side primitives shared by the tincan signaling relay and its peers.
//!
//! Peers never talk to each other through the relay beyond bootstrapping: an envelope carries one
//! opaque session description (or a room advertisement) from one peer id to another, and the
//! relay only has to stamp, scope and expire them.

pub mod envelope;
pub mod scope;
pub mod store;

pub use envelope::{
    DiscoveryKey, Envelope, EnvelopeKind, PostAck, PostEnvelope, ROOM_DISCOVERY, RoomAdvert,
    SignalBatch,
};
pub use scope::{forwarded_client, scope_key};
pub use store::memory::MemoryEnvelopeStore;
#[cfg(feature = "redis")]
pub use store::redis::RedisEnvelopeStore;
pub use store::{Clock, DEFAULT_TTL, EnvelopeStore, StoreError, SystemClock, collect_signals};

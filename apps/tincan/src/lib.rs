//! Client core for tincan: serverless, LAN-scoped, end-to-end encrypted group chat.
//!
//! Peers find each other through a polling signaling relay, form a full WebRTC mesh through
//! host-mediated introductions, and then talk directly. The relay only ever sees session
//! descriptions and room advertisements.

pub mod chat;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod protocol;
pub mod room;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod terminal;
pub mod transport;

pub use config::ClientConfig;
pub use discovery::RoomListing;
pub use protocol::{AppMessage, ChatMessage, PeerId, PeerIdentity};
pub use room::{Room, RoomError, RoomEvent, RoomOptions, Tincan};

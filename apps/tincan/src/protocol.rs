//! Application messages exchanged over established peer connections.

use bytes::Bytes;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PeerId = String;

pub const ANONYMOUS_NAME: &str = "Anonymous";

/// What a participant says about itself. Only its owner mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub id: PeerId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default)]
    pub is_host: bool,
}

impl PeerIdentity {
    pub fn new(id: impl Into<PeerId>, display_name: impl Into<String>, is_host: bool) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_host,
        }
    }

    /// Placeholder for a connected peer whose metadata has not arrived yet.
    pub fn anonymous(id: impl Into<PeerId>) -> Self {
        Self::new(id, ANONYMOUS_NAME, false)
    }
}

/// Random `peer-xxxxxxx` identifier, fresh for every session.
pub fn generate_peer_id() -> PeerId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("peer-{suffix}")
}

/// Random `NODE_####` display name.
pub fn default_display_name() -> String {
    format!("NODE_{:04}", rand::thread_rng().gen_range(0..10_000))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: PeerId,
    pub sender_name: String,
    /// Opaque to the session layer; ciphertext in password-protected rooms.
    pub content: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(sender: &PeerIdentity, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.id.clone(),
            sender_name: sender.display_name.clone(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIntroduction {
    pub id: PeerId,
    pub metadata: PeerIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppMessage {
    Chat {
        payload: ChatMessage,
    },
    BurnLogs,
    BurnChat,
    DelegateHost {
        to: PeerId,
    },
    MetadataUpdate {
        payload: PeerIdentity,
    },
    PeerIntroduction {
        payload: PeerIntroduction,
    },
    #[serde(rename_all = "camelCase")]
    PasswordVerify {
        from_id: PeerId,
        challenge: String,
    },
    #[serde(rename_all = "camelCase")]
    HandshakeSuccess {
        to_id: PeerId,
    },
}

impl AppMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            AppMessage::Chat { .. } => "chat",
            AppMessage::BurnLogs => "burn-logs",
            AppMessage::BurnChat => "burn-chat",
            AppMessage::DelegateHost { .. } => "delegate-host",
            AppMessage::MetadataUpdate { .. } => "metadata-update",
            AppMessage::PeerIntroduction { .. } => "peer-introduction",
            AppMessage::PasswordVerify { .. } => "password-verify",
            AppMessage::HandshakeSuccess { .. } => "handshake-success",
        }
    }
}

pub fn encode(message: &AppMessage) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(message).map(Bytes::from)
}

pub fn decode(payload: &[u8]) -> Result<AppMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recipient used by hosts to advertise a joinable room to everyone in the same network scope.
pub const ROOM_DISCOVERY: &str = "room-discovery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Offer,
    Answer,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "offer" => Some(EnvelopeKind::Offer),
            "answer" => Some(EnvelopeKind::Answer),
            _ => None,
        }
    }
}

/// Envelope as submitted by a peer, before the relay stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub data: Value,
}

impl PostEnvelope {
    pub fn offer(from: impl Into<String>, to: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EnvelopeKind::Offer,
            from: from.into(),
            to: to.into(),
            data,
        }
    }

    pub fn answer(from: impl Into<String>, to: impl Into<String>, data: Value) -> Self {
        Self {
            kind: EnvelopeKind::Answer,
            from: from.into(),
            to: to.into(),
            data,
        }
    }

    pub fn advert(from: impl Into<String>, advert: &RoomAdvert) -> Self {
        Self {
            kind: EnvelopeKind::Offer,
            from: from.into(),
            to: ROOM_DISCOVERY.to_string(),
            data: serde_json::to_value(advert).unwrap_or(Value::Null),
        }
    }

    pub fn is_room_advert(&self) -> bool {
        self.kind == EnvelopeKind::Offer && self.to == ROOM_DISCOVERY
    }
}

/// A stored, relay-stamped envelope. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Relay-assigned identifier; lets pollers tell apart envelopes sharing a timestamp.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub data: Value,
    /// Relay clock, milliseconds since the unix epoch.
    pub timestamp: i64,
}

impl Envelope {
    pub fn stamp(post: PostEnvelope, id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            kind: post.kind,
            from: post.from,
            to: post.to,
            data: post.data,
            timestamp,
        }
    }

    pub fn is_room_advert(&self) -> bool {
        self.kind == EnvelopeKind::Offer && self.to == ROOM_DISCOVERY
    }

    /// Decodes the advertisement body, if this envelope is a well-formed room advertisement.
    pub fn room_advert(&self) -> Option<RoomAdvert> {
        if !self.is_room_advert() {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAdvert {
    pub room_name: String,
    #[serde(default)]
    pub has_password: bool,
}

/// `GET /signal` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBatch {
    /// Envelopes addressed to the requesting peer.
    #[serde(default)]
    pub signals: Vec<Envelope>,
    /// Everything live in the requester's network scope; used for room discovery.
    #[serde(default)]
    pub all_signals: Vec<Envelope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAck {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryKey {
    pub discovery_key: String,
}

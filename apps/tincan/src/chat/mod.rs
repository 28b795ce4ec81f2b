//! Chat history and the reactions to host-authority commands.
//!
//! Host commands are advisory: recipients honor them from anyone. Only the local front end
//! refuses to issue them when this peer is not the host.

pub mod gate;

use tracing::{debug, info};

use crate::crypto::{self, CHALLENGE, CryptoError, Decrypted, SessionKey};
use crate::protocol::{AppMessage, ChatMessage, PeerId, PeerIdentity};

/// What the room has to do after the chat layer saw a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Ignored,
    Displayed(ChatMessage),
    HistoryBurned { by: PeerId },
    /// Wipe everything and leave the session.
    SessionBurned { by: PeerId },
    /// We were named the new host.
    Promoted { by: PeerId },
    /// Broadcast this in response.
    Reply(AppMessage),
}

/// Decrypted chat history of one room, plus the key it is sealed with.
#[derive(Debug, Default)]
pub struct ChatLog {
    history: Vec<ChatMessage>,
    key: Option<SessionKey>,
}

impl ChatLog {
    pub fn new(key: Option<SessionKey>) -> Self {
        Self {
            history: Vec::new(),
            key,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Drop history and key material.
    pub fn burn(&mut self) {
        self.history.clear();
        self.key = None;
    }

    /// Build the outgoing message for `text`: returns the wire form (sealed when the room has a
    /// key) and records the readable form locally.
    pub fn compose(&mut self, sender: &PeerIdentity, text: &str) -> Result<ChatMessage, CryptoError> {
        let shown = ChatMessage::new(sender, text);
        let wire = match &self.key {
            Some(key) => ChatMessage {
                content: crypto::encrypt(text, key)?,
                ..shown.clone()
            },
            None => shown.clone(),
        };
        self.history.push(shown);
        Ok(wire)
    }

    /// Record an incoming message, opening it when the room is encrypted. Unreadable content is
    /// kept with a placeholder.
    pub fn receive(&mut self, wire: ChatMessage) -> ChatMessage {
        let content = match &self.key {
            Some(key) => crypto::decrypt(&wire.content, key).into_display(),
            None => wire.content.clone(),
        };
        let shown = ChatMessage { content, ..wire };
        self.history.push(shown.clone());
        shown
    }

    /// Apply one application message coming from `from`.
    pub fn react(&mut self, local: &PeerIdentity, from: &str, message: AppMessage) -> Reaction {
        match message {
            AppMessage::Chat { payload } => Reaction::Displayed(self.receive(payload)),
            AppMessage::BurnLogs => {
                info!(target: "tincan::chat", by = %from, "history burned");
                self.clear();
                Reaction::HistoryBurned { by: from.to_string() }
            }
            AppMessage::BurnChat => {
                info!(target: "tincan::chat", by = %from, "session burned");
                self.burn();
                Reaction::SessionBurned { by: from.to_string() }
            }
            AppMessage::DelegateHost { to } if to == local.id => {
                info!(target: "tincan::chat", by = %from, "promoted to host");
                Reaction::Promoted { by: from.to_string() }
            }
            AppMessage::PasswordVerify { from_id, challenge } if local.is_host => {
                self.verify_challenge(from_id, &challenge)
            }
            other => {
                debug!(target: "tincan::chat", kind = other.kind(), from = %from, "nothing to do");
                Reaction::Ignored
            }
        }
    }

    fn verify_challenge(&self, joiner: PeerId, challenge: &str) -> Reaction {
        let Some(key) = &self.key else {
            return Reaction::Ignored;
        };
        match crypto::decrypt(challenge, key) {
            Decrypted::Plaintext(text) if text == CHALLENGE => {
                info!(target: "tincan::gate", peer = %joiner, "admitting peer");
                Reaction::Reply(AppMessage::HandshakeSuccess { to_id: joiner })
            }
            _ => {
                info!(target: "tincan::gate", peer = %joiner, "password check failed");
                Reaction::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DECRYPT_FAILED_PLACEHOLDER, DEFAULT_SALT, derive_key, test_params};

    fn key(password: &str) -> SessionKey {
        derive_key(password, DEFAULT_SALT, test_params()).unwrap()
    }

    fn host() -> PeerIdentity {
        PeerIdentity::new("peer-h", "H", true)
    }

    fn joiner() -> PeerIdentity {
        PeerIdentity::new("peer-j", "J", false)
    }

    #[test]
    fn plain_rooms_pass_content_through() {
        let mut sender = ChatLog::new(None);
        let mut receiver = ChatLog::new(None);
        let wire = sender.compose(&host(), "hello").unwrap();
        assert_eq!(wire.content, "hello");
        let shown = receiver.receive(wire);
        assert_eq!(shown.content, "hello");
        assert_eq!(sender.history().len(), 1);
        assert_eq!(receiver.history().len(), 1);
    }

    #[test]
    fn encrypted_rooms_seal_on_the_wire() {
        let mut sender = ChatLog::new(Some(key("pw")));
        let mut receiver = ChatLog::new(Some(key("pw")));
        let wire = sender.compose(&host(), "hello").unwrap();
        assert_ne!(wire.content, "hello");
        assert_eq!(sender.history()[0].content, "hello");
        assert_eq!(receiver.receive(wire).content, "hello");
    }

    #[test]
    fn unreadable_messages_show_placeholder() {
        let mut sender = ChatLog::new(Some(key("right")));
        let mut receiver = ChatLog::new(Some(key("wrong")));
        let wire = sender.compose(&host(), "secret").unwrap();
        let shown = receiver.receive(wire.clone());
        assert_eq!(shown.content, DECRYPT_FAILED_PLACEHOLDER);
        assert_eq!(shown.id, wire.id);
        assert_eq!(receiver.history().len(), 1);
    }

    #[test]
    fn burn_commands_are_honored_from_anyone() {
        let mut log = ChatLog::new(Some(key("pw")));
        log.compose(&joiner(), "one").unwrap();
        assert_eq!(
            log.react(&joiner(), "peer-x", AppMessage::BurnLogs),
            Reaction::HistoryBurned { by: "peer-x".into() }
        );
        assert!(log.history().is_empty());
        assert!(log.is_encrypted());

        log.compose(&joiner(), "two").unwrap();
        assert_eq!(
            log.react(&joiner(), "peer-x", AppMessage::BurnChat),
            Reaction::SessionBurned { by: "peer-x".into() }
        );
        assert!(log.history().is_empty());
        assert!(!log.is_encrypted());
    }

    #[test]
    fn delegation_only_promotes_the_target() {
        let mut log = ChatLog::default();
        let to_me = AppMessage::DelegateHost { to: "peer-j".into() };
        let to_other = AppMessage::DelegateHost { to: "peer-k".into() };
        assert_eq!(
            log.react(&joiner(), "peer-h", to_me),
            Reaction::Promoted { by: "peer-h".into() }
        );
        assert_eq!(log.react(&joiner(), "peer-h", to_other), Reaction::Ignored);
    }

    #[test]
    fn host_admits_only_the_right_password() {
        let mut host_log = ChatLog::new(Some(key("pw")));
        let good = AppMessage::PasswordVerify {
            from_id: "peer-j".into(),
            challenge: crypto::encrypt(CHALLENGE, &key("pw")).unwrap(),
        };
        assert_eq!(
            host_log.react(&host(), "peer-j", good.clone()),
            Reaction::Reply(AppMessage::HandshakeSuccess { to_id: "peer-j".into() })
        );

        let bad = AppMessage::PasswordVerify {
            from_id: "peer-j".into(),
            challenge: crypto::encrypt(CHALLENGE, &key("nope")).unwrap(),
        };
        assert_eq!(host_log.react(&host(), "peer-j", bad), Reaction::Ignored);

        let wrong_literal = AppMessage::PasswordVerify {
            from_id: "peer-j".into(),
            challenge: crypto::encrypt("something else", &key("pw")).unwrap(),
        };
        assert_eq!(host_log.react(&host(), "peer-j", wrong_literal), Reaction::Ignored);

        // non-hosts never answer challenges
        let mut joiner_log = ChatLog::new(Some(key("pw")));
        assert_eq!(joiner_log.react(&joiner(), "peer-k", good), Reaction::Ignored);
    }
}

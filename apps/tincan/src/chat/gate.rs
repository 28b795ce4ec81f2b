//! Admission of a joiner into a room.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::crypto::{self, CHALLENGE, CryptoError, SessionKey};
use crate::protocol::AppMessage;
use crate::session::{SessionEvent, SessionEvents, SessionHandle};

#[derive(Error, Debug)]
pub enum GateError {
    #[error("access denied")]
    AccessDenied,
    #[error("host never became reachable")]
    HostUnreachable,
    #[error("session closed while waiting for admission")]
    SessionClosed,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Wait until `host_id` lets us in.
///
/// Unprotected rooms admit as soon as the host shows up in membership. Protected rooms send the
/// encrypted challenge once the host is visible and then wait for a `handshake-success` naming us.
/// The whole wait is bounded by `timeout`. Session events that arrive meanwhile are returned so
/// the caller can replay them.
pub async fn await_admission(
    session: &SessionHandle,
    events: &mut SessionEvents,
    host_id: &str,
    key: Option<&SessionKey>,
    timeout: Duration,
) -> Result<Vec<SessionEvent>, GateError> {
    let deadline = Instant::now() + timeout;
    let mut membership = session.membership();
    let mut buffered = Vec::new();
    let mut challenge_sent = false;

    loop {
        let host_visible = membership
            .borrow_and_update()
            .iter()
            .any(|member| member.id == host_id);
        if host_visible && !challenge_sent {
            match key {
                None => {
                    info!(target: "tincan::gate", host = %host_id, "admitted to open room");
                    return Ok(buffered);
                }
                Some(key) => {
                    let challenge = crypto::encrypt(CHALLENGE, key)?;
                    session
                        .broadcast(AppMessage::PasswordVerify {
                            from_id: session.local_id().to_string(),
                            challenge,
                        })
                        .map_err(|_| GateError::SessionClosed)?;
                    debug!(target: "tincan::gate", host = %host_id, "challenge sent");
                    challenge_sent = true;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                info!(target: "tincan::gate", host = %host_id, challenge_sent, "admission timed out");
                return Err(if challenge_sent {
                    GateError::AccessDenied
                } else {
                    GateError::HostUnreachable
                });
            }
            changed = membership.changed() => {
                if changed.is_err() {
                    return Err(GateError::SessionClosed);
                }
            }
            event = events.recv() => match event {
                None => return Err(GateError::SessionClosed),
                Some(SessionEvent::Message {
                    message: AppMessage::HandshakeSuccess { to_id },
                    from,
                }) if to_id == session.local_id() => {
                    info!(target: "tincan::gate", host = %from, "admitted");
                    return Ok(buffered);
                }
                Some(SessionEvent::Message {
                    message: AppMessage::HandshakeSuccess { .. },
                    ..
                }) => {}
                Some(other) => buffered.push(other),
            },
        }
    }
}

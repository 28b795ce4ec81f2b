//! Shared-secret message encryption for a room.
//!
//! The room password is stretched with Argon2id into a 32-byte secret, then expanded with
//! HKDF-SHA256 into a ChaCha20-Poly1305 key. Every message gets a fresh random nonce; the wire
//! form is `base64(nonce || ciphertext)`.

use argon2::{Algorithm, Argon2, ParamsBuilder, Version};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Literal a joiner encrypts to prove it holds the room key.
pub const CHALLENGE: &str = "BURNER_CHALLENGE";
/// Shown in place of a message that could not be decrypted.
pub const DECRYPT_FAILED_PLACEHOLDER: &str = "[DECRYPT_FAILED]";
pub const DEFAULT_SALT: &str = "local-salt";

const HKDF_INFO_AEAD: &[u8] = b"tincan:room:aead:v1";
const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("room password cannot be empty")]
    EmptyPassword,
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("encryption failed: {0}")]
    Cipher(String),
}

/// Symmetric room key. Everyone who typed the same password derives the same key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Short, non-reversible tag for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        digest[..4].iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Outcome of decrypting one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    Plaintext(String),
    /// Wrong key, tampered payload, or not ciphertext at all.
    Failed,
}

impl Decrypted {
    pub fn is_failed(&self) -> bool {
        matches!(self, Decrypted::Failed)
    }

    /// Text to show a user: the plaintext, or the placeholder.
    pub fn into_display(self) -> String {
        match self {
            Decrypted::Plaintext(text) => text,
            Decrypted::Failed => DECRYPT_FAILED_PLACEHOLDER.to_string(),
        }
    }
}

/// Deterministically derive the room key from a password and a salt label.
pub fn derive_key(password: &str, salt: &str, params: KdfParams) -> Result<SessionKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let params = ParamsBuilder::new()
        .m_cost(params.memory_kib)
        .t_cost(params.iterations)
        .p_cost(params.parallelism)
        .output_len(32)
        .build()
        .map_err(|err| CryptoError::Kdf(err.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    // Argon2 wants at least 8 salt bytes; hashing the label accepts any label.
    let salt_bytes = Sha256::digest(salt.as_bytes());
    let mut stretched = [0u8; 32];
    argon
        .hash_password_into(password.as_bytes(), &salt_bytes, &mut stretched)
        .map_err(|err| CryptoError::Kdf(err.to_string()))?;

    let hkdf = Hkdf::<Sha256>::new(Some(salt_bytes.as_slice()), &stretched);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO_AEAD, &mut key)
        .map_err(|err| CryptoError::Kdf(format!("hkdf expand failed: {err}")))?;
    Ok(SessionKey(key))
}

pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .map_err(|err| CryptoError::Cipher(err.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64_STANDARD.encode(sealed))
}

pub fn decrypt(ciphertext: &str, key: &SessionKey) -> Decrypted {
    let Ok(sealed) = BASE64_STANDARD.decode(ciphertext.trim().as_bytes()) else {
        return Decrypted::Failed;
    };
    if sealed.len() <= NONCE_LEN {
        return Decrypted::Failed;
    }
    let (nonce, body) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    match cipher.decrypt(Nonce::from_slice(nonce), body) {
        Ok(plaintext) => String::from_utf8(plaintext)
            .map(Decrypted::Plaintext)
            .unwrap_or(Decrypted::Failed),
        Err(_) => Decrypted::Failed,
    }
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

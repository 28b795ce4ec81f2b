use sha2::{Digest, Sha256};

/// Hash a peer's apparent address into the opaque key that scopes envelope visibility.
///
/// Peers behind the same NAT share a public address and therefore a scope; the raw address is
/// never stored or returned.
pub fn scope_key(address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First hop of an `X-Forwarded-For` header, if it names anything.
pub fn forwarded_client(header: &str) -> Option<&str> {
    header
        .split(',')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

//! Challenge-response authentication.

use sha2::{Digest, Sha256};

/// Trailing key characters transmitted with the digest so the gateway
/// can identify the key without seeing it.
pub(crate) const BUCKET_ID_LENGTH: usize = 5;

/// Solves a gateway challenge.
///
/// The reply is `sha256(challenge|key)` in lowercase hex, suffixed with
/// the key's bucket id. The caller guarantees the key is at least
/// [`BUCKET_ID_LENGTH`] characters.
pub(crate) fn solve(challenge: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut reply = String::with_capacity(digest.len() * 2 + 1 + BUCKET_ID_LENGTH);
    for byte in digest.iter() {
        reply.push_str(&format!("{byte:02x}"));
    }
    reply.push('-');
    reply.push_str(&key[key.len() - BUCKET_ID_LENGTH..]);
    reply
}

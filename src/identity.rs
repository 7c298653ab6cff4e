//! Deterministic short identifiers.
//!
//! Identities are a name-based UUIDv5 of the canonical string rendered in a
//! base57 alphabet (shortuuid compatible) and truncated to eight characters,
//! so the same URL always lands on the same record and feed file.

use uuid::Uuid;

const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const ENCODED_LEN: usize = 22;
pub const ID_LEN: usize = 8;

/// Derives the short id for a canonical string (a sanitized URL or a username).
pub fn derive_id(canonical: &str) -> String {
    let lowered = canonical.to_ascii_lowercase();
    let namespace = if lowered.starts_with("http://") || lowered.starts_with("https://") {
        Uuid::NAMESPACE_URL
    } else {
        Uuid::NAMESPACE_DNS
    };
    let uuid = Uuid::new_v5(&namespace, canonical.as_bytes());
    let mut encoded = encode(uuid.as_u128());
    encoded.truncate(ID_LEN);
    encoded
}

/// Most significant digit first, left padded with the first alphabet symbol.
fn encode(mut value: u128) -> String {
    let base = ALPHABET.len() as u128;
    let mut digits = Vec::with_capacity(ENCODED_LEN);
    while value > 0 {
        digits.push(ALPHABET[(value % base) as usize]);
        value /= base;
    }
    while digits.len() < ENCODED_LEN {
        digits.push(ALPHABET[0]);
    }
    digits.iter().rev().map(|&byte| byte as char).collect()
}

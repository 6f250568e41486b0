//! Stable content hashes for previews and synthesized turn identifiers.

use sha2::{Digest, Sha256};

/// Hex characters kept for a preview hash.
const TEXT_HASH_LEN: usize = 16;
/// Hex characters kept for identifier fragments.
const SHORT_HASH_LEN: usize = 8;

/// Stable hash of a preview string, used as `textHash` on discovered variants.
#[must_use]
pub fn text_hash(text: &str) -> String {
    hex_digest(text, TEXT_HASH_LEN)
}

/// Short hash used inside synthesized turn identifiers.
#[must_use]
pub fn short_hash(text: &str) -> String {
    hex_digest(text, SHORT_HASH_LEN)
}

fn hex_digest(text: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let bytes = hasher.finalize();
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(len)
        .collect()
}

//! SHA-256 hashing utilities.
//!
//! Every hash on the wire is the lowercase hex encoding of SHA-256 over the
//! UTF-8 bytes of a canonical record string. Peers compare hashes on the hex
//! representation, so the helpers here always return `String`.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes and return the raw 32-byte digest.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash arbitrary bytes and return the lowercase hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_bytes(data))
}

/// SHA-256 applied twice, as used for address checksums.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256_bytes(&sha256_bytes(data))
}

/// Render an amount with the fixed 8-decimal precision used in canonical
/// records. Any deviation here changes transaction ids and breaks signatures.
pub fn format_amount(amount: f64) -> String {
    format!("{:.8}", amount)
}

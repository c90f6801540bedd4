//! Certificate fingerprints via `ring::digest`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::digest::{digest, SHA256};

/// SHA-256 of a DER certificate, base64 encoded.
///
/// This is the encoding federation metadata uses for `sha256` pin digests.
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}

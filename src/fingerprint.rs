//! Query ids derived from canonical query text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Length of a query id: a base64-encoded 256-bit digest.
pub const QUERY_ID_LEN: usize = 44;

/// Derive the query id of a canonical query.
///
/// SHA-256 over the UTF-8 bytes, rendered as padded standard base64.
pub fn fingerprint(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    STANDARD.encode(digest)
}

//! Small SHA-256 helpers shared by every layer that needs a digest over an
//! in-memory buffer. Streaming, file-backed hashing (chunked 1 MiB hashing
//! over arbitrary byte ranges of the container file) lives in
//! `mv2s-storage::digest`, which composes with the `FileBackend`.

use sha2::{Digest, Sha256};

/// SHA-256 of a single in-memory buffer.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// SHA-256 of the empty byte string — used as the expected checksum of WAL
/// padding records.
pub fn sha256_empty() -> [u8; 32] {
    sha256(&[])
}

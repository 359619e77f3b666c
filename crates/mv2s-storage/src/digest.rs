//! Streaming SHA-256 over byte ranges of a `FileBackend`.

use crate::file::FileBackend;
use mv2s_core::MvResult;
use sha2::{Digest, Sha256};

/// Chunk size used when hashing large byte ranges, so a single digest pass
/// never materializes the whole range in memory at once.
const CHUNK_SIZE: usize = 1 << 20;

/// Hash `length` bytes starting at `offset`, one chunk at a time.
pub fn hash_range(backend: &mut FileBackend, offset: u64, length: u64) -> MvResult<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut remaining = length;
    let mut cursor = offset;
    while remaining > 0 {
        let take = remaining.min(CHUNK_SIZE as u64) as usize;
        let chunk = backend.read_exactly(cursor, take)?;
        hasher.update(&chunk);
        cursor += take as u64;
        remaining -= take as u64;
    }
    Ok(hasher.finalize().into())
}

/// Hash an in-memory buffer directly (used for staged blobs before they are
/// written to disk).
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn range_hash_matches_in_memory_hash() {
        let tmp = NamedTempFile::new().unwrap();
        let mut backend = FileBackend::open_existing(tmp.path()).unwrap();
        let data = vec![7u8; 3 * (1 << 20) + 17];
        backend.write_all_at(0, &data).unwrap();
        let streamed = hash_range(&mut backend, 0, data.len() as u64).unwrap();
        let direct = hash_bytes(&data);
        assert_eq!(streamed, direct);
    }
}

//! Fixed-size footer trailing the TOC.

use crate::codec::{Reader, Writer};
use mv2s_core::{MvError, MvResult};

/// 4-byte magic identifying a footer.
pub const FOOTER_MAGIC: [u8; 4] = *b"MV2F";

/// Fixed on-disk size of the footer: magic(4) + toc_len(8) + toc_hash(32) +
/// file_generation(8) + wal_committed_seq(8).
pub const FOOTER_SIZE: usize = 4 + 8 + 32 + 8 + 8;

/// Maximum number of trailing bytes scanned backward from end-of-file when
/// searching for the last valid footer during recovery.
pub const MAX_FOOTER_SCAN_BYTES: u64 = 64 * 1024 * 1024;

/// Decoded footer identifying the current TOC and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Length in bytes of the TOC this footer identifies.
    pub toc_len: u64,
    /// SHA-256 of the TOC body.
    pub toc_hash: [u8; 32],
    /// Container generation this footer commits.
    pub file_generation: u64,
    /// Highest WAL sequence number reflected by this TOC.
    pub wal_committed_seq: u64,
}

impl Footer {
    /// Encode to exactly [`FOOTER_SIZE`] bytes.
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut w = Writer::new();
        w.raw(&FOOTER_MAGIC);
        w.u64(self.toc_len);
        w.raw(&self.toc_hash);
        w.u64(self.file_generation);
        w.u64(self.wal_committed_seq);
        let bytes = w.into_bytes();
        let mut out = [0u8; FOOTER_SIZE];
        out.copy_from_slice(&bytes);
        out
    }

    /// Decode a footer from exactly [`FOOTER_SIZE`] bytes, rejecting a bad magic.
    pub fn decode(bytes: &[u8]) -> MvResult<Self> {
        if bytes.len() != FOOTER_SIZE {
            return Err(MvError::InvalidFooter {
                reason: format!("expected {} bytes, got {}", FOOTER_SIZE, bytes.len()),
            });
        }
        let mut r = Reader::new(bytes);
        let magic = r.raw(4)?;
        if magic != FOOTER_MAGIC.as_slice() {
            return Err(MvError::InvalidFooter {
                reason: "bad magic".to_string(),
            });
        }
        let toc_len = r.u64()?;
        let toc_hash = r.digest32()?;
        let file_generation = r.u64()?;
        let wal_committed_seq = r.u64()?;
        Ok(Footer {
            toc_len,
            toc_hash,
            file_generation,
            wal_committed_seq,
        })
    }
}

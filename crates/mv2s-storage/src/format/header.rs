//! Double-buffered 4096-byte header pages.

use crate::codec::{Reader, Writer};
use crate::digest::hash_bytes;
use mv2s_core::{limits::HEADER_PAGE_SIZE, MvError, MvResult};

/// 4-byte magic identifying a header page.
pub const HEADER_MAGIC: [u8; 4] = *b"MV2H";

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Decoded contents of one header page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    /// Format version of this page.
    pub format_version: u16,
    /// Spec major version this page was written against.
    pub spec_major: u8,
    /// Spec minor version this page was written against.
    pub spec_minor: u8,
    /// Monotonically increasing ping-pong generation for this page slot.
    pub header_page_generation: u64,
    /// Generation of the container as a whole (matches the committed footer).
    pub file_generation: u64,
    /// Absolute offset of the current footer.
    pub footer_offset: u64,
    /// Absolute start offset of the WAL ring.
    pub wal_offset: u64,
    /// Size in bytes of the WAL ring.
    pub wal_size: u64,
    /// Writer's current write position within the ring.
    pub wal_write_pos: u64,
    /// Last checkpointed position within the ring.
    pub wal_checkpoint_pos: u64,
    /// Highest WAL sequence number reflected in the current TOC.
    pub wal_committed_seq: u64,
    /// SHA-256 of the current TOC.
    pub toc_checksum: [u8; 32],
}

impl HeaderPage {
    fn encode_body(&self, checksum_zeroed: bool) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(&HEADER_MAGIC);
        w.u16(self.format_version);
        w.u8(self.spec_major);
        w.u8(self.spec_minor);
        w.u64(self.header_page_generation);
        w.u64(self.file_generation);
        w.u64(self.footer_offset);
        w.u64(self.wal_offset);
        w.u64(self.wal_size);
        w.u64(self.wal_write_pos);
        w.u64(self.wal_checkpoint_pos);
        w.u64(self.wal_committed_seq);
        w.raw(&self.toc_checksum);
        if checksum_zeroed {
            w.raw(&[0u8; 32]);
        }
        w.into_bytes()
    }

    /// Encode this page into a fixed-size 4096-byte buffer, computing the
    /// trailing checksum over the body with the checksum slot zeroed.
    pub fn encode(&self) -> [u8; HEADER_PAGE_SIZE as usize] {
        let zeroed_body = self.encode_body(true);
        let checksum = hash_bytes(&zeroed_body);
        let mut body = self.encode_body(false);
        body.extend_from_slice(&checksum);
        let mut page = [0u8; HEADER_PAGE_SIZE as usize];
        page[..body.len()].copy_from_slice(&body);
        page
    }

    /// Decode and verify a 4096-byte header page. Returns `Ok(None)` if the
    /// page does not carry the expected magic (e.g. never written).
    pub fn decode(page: &[u8]) -> MvResult<Option<Self>> {
        if page.len() < 4 || page[0..4] != HEADER_MAGIC.as_slice() {
            return Ok(None);
        }
        let mut r = Reader::new(page);
        r.raw(4)?; // magic
        let format_version = r.u16()?;
        let spec_major = r.u8()?;
        let spec_minor = r.u8()?;
        let header_page_generation = r.u64()?;
        let file_generation = r.u64()?;
        let footer_offset = r.u64()?;
        let wal_offset = r.u64()?;
        let wal_size = r.u64()?;
        let wal_write_pos = r.u64()?;
        let wal_checkpoint_pos = r.u64()?;
        let wal_committed_seq = r.u64()?;
        let toc_checksum = r.digest32()?;
        let stored_checksum = r.digest32()?;

        let page = HeaderPage {
            format_version,
            spec_major,
            spec_minor,
            header_page_generation,
            file_generation,
            footer_offset,
            wal_offset,
            wal_size,
            wal_write_pos,
            wal_checkpoint_pos,
            wal_committed_seq,
            toc_checksum,
        };
        let zeroed_body = page.encode_body(true);
        let expected = hash_bytes(&zeroed_body);
        if expected != stored_checksum {
            return Err(MvError::ChecksumMismatch {
                scope: "header page".to_string(),
            });
        }
        Ok(Some(page))
    }
}

/// Select the valid page out of the ping-ponged pair: the one with the
/// larger `header_page_generation` whose checksum verifies. Falls back to
/// the other page if one fails to decode.
pub fn select_valid_page(page0: &[u8], page1: &[u8]) -> MvResult<HeaderPage> {
    let p0 = HeaderPage::decode(page0);
    let p1 = HeaderPage::decode(page1);
    match (p0, p1) {
        (Ok(Some(a)), Ok(Some(b))) => {
            if b.header_page_generation > a.header_page_generation {
                Ok(b)
            } else {
                Ok(a)
            }
        }
        (Ok(Some(a)), _) => Ok(a),
        (_, Ok(Some(b))) => Ok(b),
        _ => Err(MvError::InvalidHeader {
            reason: "neither header page slot decoded successfully".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(generation: u64) -> HeaderPage {
        HeaderPage {
            format_version: FORMAT_VERSION,
            spec_major: 1,
            spec_minor: 0,
            header_page_generation: generation,
            file_generation: generation,
            footer_offset: 1_000_000,
            wal_offset: 8192,
            wal_size: 65536,
            wal_write_pos: 128,
            wal_checkpoint_pos: 64,
            wal_committed_seq: 9,
            toc_checksum: [3u8; 32],
        }
    }

    #[test]
    fn round_trips() {
        let page = sample(5);
        let bytes = page.encode();
        let decoded = HeaderPage::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let page = sample(5);
        let mut bytes = page.encode();
        bytes[6] ^= 0xFF;
        assert!(HeaderPage::decode(&bytes).is_err());
    }

    #[test]
    fn never_written_page_decodes_to_none() {
        let bytes = [0u8; HEADER_PAGE_SIZE as usize];
        assert!(HeaderPage::decode(&bytes).unwrap().is_none());
    }

    #[test]
    fn select_picks_higher_generation() {
        let older = sample(1).encode();
        let newer = sample(2).encode();
        let selected = select_valid_page(&older, &newer).unwrap();
        assert_eq!(selected.header_page_generation, 2);
    }

    #[test]
    fn select_falls_back_when_one_slot_blank() {
        let blank = [0u8; HEADER_PAGE_SIZE as usize];
        let written = sample(3).encode();
        let selected = select_valid_page(&blank, &written).unwrap();
        assert_eq!(selected.header_page_generation, 3);
    }
}

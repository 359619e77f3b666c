//! WAL record framing: 48-byte header, little-endian, three record kinds
//! (Data, Padding, Sentinel).

use mv2s_core::{MvError, MvResult};
use sha2::{Digest, Sha256};

/// Size in bytes of a WAL record header.
pub const RECORD_HEADER_SIZE: usize = 48;

/// Flag bit marking a record as padding (skip bytes, no payload meaning).
pub const FLAG_IS_PADDING: u32 = 0b01;

/// One decoded WAL record: header fields plus its raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Strictly monotonic sequence number (0 reserved for the sentinel).
    pub sequence: u64,
    /// Length in bytes of `payload`.
    pub length: u32,
    /// Flag bits (`FLAG_IS_PADDING`).
    pub flags: u32,
    /// SHA-256 of `payload` (of the empty slice for padding; all-zero for
    /// the sentinel).
    pub checksum: [u8; 32],
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl RawRecord {
    /// True if this is a data record (neither padding nor the sentinel).
    pub fn is_data(&self) -> bool {
        self.sequence != 0 && self.flags & FLAG_IS_PADDING == 0
    }

    /// True if this is a padding record.
    pub fn is_padding(&self) -> bool {
        self.flags & FLAG_IS_PADDING != 0
    }

    /// True if this is the ring's sentinel record: 48 zero bytes
    /// (`sequence=0, length=0, flags=0, checksum=0`).
    pub fn is_sentinel(&self) -> bool {
        self.sequence == 0 && self.length == 0 && self.flags == 0 && self.checksum == [0u8; 32]
    }

    /// Build a data record, computing its checksum from `payload`.
    pub fn data(sequence: u64, payload: Vec<u8>) -> MvResult<Self> {
        if payload.len() > u32::MAX as usize {
            return Err(MvError::CapacityExceeded {
                limit: u32::MAX as u64,
                requested: payload.len() as u64,
            });
        }
        let checksum = sha256(&payload);
        Ok(Self {
            sequence,
            length: payload.len() as u32,
            flags: 0,
            checksum,
            payload,
        })
    }

    /// Build a padding record skipping `skip_bytes` (the record header
    /// itself is part of the skipped span; checksum is over the empty slice).
    pub fn padding(sequence: u64, skip_bytes: u32) -> Self {
        Self {
            sequence,
            length: skip_bytes,
            flags: FLAG_IS_PADDING,
            checksum: sha256(&[]),
            payload: Vec::new(),
        }
    }

    /// Build the ring's sentinel record: 48 zero bytes.
    pub fn sentinel() -> Self {
        Self {
            sequence: 0,
            length: 0,
            flags: 0,
            checksum: [0u8; 32],
            payload: Vec::new(),
        }
    }

    /// Total on-disk footprint of this record (header + payload bytes,
    /// where padding's "payload" is the skipped span rather than stored
    /// bytes).
    pub fn on_disk_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64
            + if self.is_padding() {
                self.length as u64
            } else {
                self.payload.len() as u64
            }
    }

    /// Encode the 48-byte header plus payload bytes (padding writes no
    /// payload bytes beyond the header; the skip is realized by the writer
    /// advancing its cursor past unwritten bytes).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.checksum);
        if !self.is_padding() {
            out.extend_from_slice(&self.payload);
        }
        out
    }

    /// Decode a 48-byte header from `header_bytes` without the payload.
    pub fn decode_header(header_bytes: &[u8]) -> MvResult<(u64, u32, u32, [u8; 32])> {
        if header_bytes.len() != RECORD_HEADER_SIZE {
            return Err(MvError::WalCorruption {
                offset: 0,
                reason: format!(
                    "expected {} header bytes, got {}",
                    RECORD_HEADER_SIZE,
                    header_bytes.len()
                ),
            });
        }
        let sequence = u64::from_le_bytes(header_bytes[0..8].try_into().unwrap());
        let length = u32::from_le_bytes(header_bytes[8..12].try_into().unwrap());
        let flags = u32::from_le_bytes(header_bytes[12..16].try_into().unwrap());
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&header_bytes[16..48]);
        Ok((sequence, length, flags, checksum))
    }

    /// Verify that `payload` actually hashes to `checksum` (data records only;
    /// padding and the sentinel carry no payload to check).
    pub fn verify_payload_checksum(&self) -> bool {
        if self.is_padding() || self.is_sentinel() {
            return true;
        }
        sha256(&self.payload) == self.checksum
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_record_round_trips_through_encode() {
        let rec = RawRecord::data(1, b"hello".to_vec()).unwrap();
        let bytes = rec.encode();
        assert_eq!(bytes.len(), RECORD_HEADER_SIZE + 5);
        let (seq, len, flags, checksum) = RawRecord::decode_header(&bytes[..RECORD_HEADER_SIZE]).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(len, 5);
        assert_eq!(flags, 0);
        assert_eq!(checksum, rec.checksum);
    }

    #[test]
    fn padding_record_has_no_payload_bytes() {
        let rec = RawRecord::padding(0, 100);
        assert!(rec.is_padding());
        assert_eq!(rec.encode().len(), RECORD_HEADER_SIZE);
        assert_eq!(rec.on_disk_len(), RECORD_HEADER_SIZE as u64 + 100);
    }

    #[test]
    fn sentinel_is_48_zero_bytes() {
        let rec = RawRecord::sentinel();
        assert!(rec.is_sentinel());
        assert!(!rec.is_data());
        assert!(!rec.is_padding());
        assert_eq!(rec.encode(), vec![0u8; RECORD_HEADER_SIZE]);
    }

    #[test]
    fn tampered_payload_fails_checksum_verification() {
        let mut rec = RawRecord::data(1, b"hello".to_vec()).unwrap();
        rec.payload[0] = b'H';
        assert!(!rec.verify_payload_checksum());
    }
}

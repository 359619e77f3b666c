//! Payload compression backends selected by `PayloadEncoding`.

use mv2s_core::{MvError, MvResult, PayloadEncoding};

/// Compress and decompress payload bytes for a given encoding tag.
pub trait Compressor {
    /// Compress `input`, returning the stored bytes.
    fn compress(&self, input: &[u8]) -> MvResult<Vec<u8>>;

    /// Decompress `input` back to `canonical_length` bytes.
    fn decompress(&self, input: &[u8], canonical_length: u64) -> MvResult<Vec<u8>>;
}

/// No-op compressor for [`PayloadEncoding::Plain`].
pub struct PlainCompressor;

impl Compressor for PlainCompressor {
    fn compress(&self, input: &[u8]) -> MvResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], _canonical_length: u64) -> MvResult<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// zstd compressor for [`PayloadEncoding::Zstd`].
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Build a compressor at the given zstd level.
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, input: &[u8]) -> MvResult<Vec<u8>> {
        zstd::encode_all(input, self.level)
            .map_err(|e| MvError::EncodingError { reason: e.to_string() })
    }

    fn decompress(&self, input: &[u8], canonical_length: u64) -> MvResult<Vec<u8>> {
        let out = zstd::decode_all(input)
            .map_err(|e| MvError::DecodingError { reason: e.to_string() })?;
        if out.len() as u64 != canonical_length {
            return Err(MvError::DecodingError {
                reason: format!(
                    "decompressed length {} does not match canonical_length {}",
                    out.len(),
                    canonical_length
                ),
            });
        }
        Ok(out)
    }
}

/// Select the compressor implementation for an encoding tag.
pub fn compressor_for(encoding: PayloadEncoding) -> MvResult<Box<dyn Compressor>> {
    match encoding {
        PayloadEncoding::Plain => Ok(Box::new(PlainCompressor)),
        PayloadEncoding::Zstd => Ok(Box::new(ZstdCompressor::default())),
        PayloadEncoding::Reserved2 => Err(MvError::DecodingError {
            reason: "encoding tag 2 is reserved and not yet assigned".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_round_trips() {
        let c = ZstdCompressor::default();
        let data = b"hello hello hello hello hello".repeat(10);
        let compressed = c.compress(&data).unwrap();
        let restored = c.decompress(&compressed, data.len() as u64).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn zstd_rejects_length_mismatch() {
        let c = ZstdCompressor::default();
        let data = b"some data to compress".to_vec();
        let compressed = c.compress(&data).unwrap();
        assert!(c.decompress(&compressed, (data.len() + 1) as u64).is_err());
    }

    #[test]
    fn plain_is_identity() {
        let c = PlainCompressor;
        let data = b"raw bytes".to_vec();
        let compressed = c.compress(&data).unwrap();
        assert_eq!(compressed, data);
        let restored = c.decompress(&compressed, data.len() as u64).unwrap();
        assert_eq!(restored, data);
    }
}

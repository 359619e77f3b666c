//! Low-level binary encoding primitives shared by the header, footer, and
//! TOC codecs: explicit length-prefixed little-endian encoding.

use mv2s_core::{MvError, MvResult};

/// Append-only little-endian byte writer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// New empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Current length of the accumulated buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Write a little-endian `u16`.
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Write a little-endian `u32`.
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Write a little-endian `u64`.
    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Write a little-endian `i64`.
    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Write a presence flag: `1` if `Some`, `0` if `None`.
    pub fn presence(&mut self, present: bool) -> &mut Self {
        self.u8(if present { 1 } else { 0 });
        self
    }

    /// Write a length-prefixed (`u32`) byte slice.
    pub fn bytes_lp(&mut self, data: &[u8]) -> &mut Self {
        self.u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        self
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn str_lp(&mut self, s: &str) -> &mut Self {
        self.bytes_lp(s.as_bytes())
    }

    /// Write a fixed-width array verbatim (e.g. a 32-byte digest).
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }
}

/// Cursor-based little-endian byte reader with exact-bounds checking.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap a byte slice for sequential decoding.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes remaining after the current cursor position.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current absolute cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> MvResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(MvError::DecodingError {
                reason: format!(
                    "expected {} bytes at position {}, only {} remain",
                    n,
                    self.pos,
                    self.remaining()
                ),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn u8(&mut self) -> MvResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn u16(&mut self) -> MvResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a little-endian `u32`.
    pub fn u32(&mut self) -> MvResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a little-endian `u64`.
    pub fn u64(&mut self) -> MvResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a little-endian `i64`.
    pub fn i64(&mut self) -> MvResult<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read a presence flag written by [`Writer::presence`].
    pub fn presence(&mut self) -> MvResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(MvError::DecodingError {
                reason: format!("invalid presence byte {other}"),
            }),
        }
    }

    /// Read a length-prefixed byte slice as an owned `Vec<u8>`.
    pub fn bytes_lp(&mut self) -> MvResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn str_lp(&mut self) -> MvResult<String> {
        let bytes = self.bytes_lp()?;
        String::from_utf8(bytes).map_err(|e| MvError::DecodingError {
            reason: format!("invalid utf-8: {e}"),
        })
    }

    /// Read a fixed-width array verbatim.
    pub fn raw(&mut self, n: usize) -> MvResult<&'a [u8]> {
        self.take(n)
    }

    /// Read a 32-byte digest.
    pub fn digest32(&mut self) -> MvResult<[u8; 32]> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }
}

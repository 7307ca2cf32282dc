//! Read buffer for decoding XDR protocol data
//!
//! Every read checks the remaining length first and reports
//! [`Error::BufferUnderflow`] instead of panicking, which the transport uses
//! to detect a message that has not fully arrived yet.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::BlobId;

/// A buffer for reading XDR encoded protocol data
#[derive(Debug)]
pub struct ReadBuffer {
    /// The underlying byte data
    data: Bytes,
    /// Current read position
    pos: usize,
}

/// Largest length-prefixed field accepted from the server
///
/// Replies are bounded by the client's own buffer sizes, all far below this.
/// A larger length word means the stream is out of sync.
pub(crate) const MAX_OPAQUE_LENGTH: usize = 16 * 1024 * 1024;

/// Number of padding bytes after a variable field of `len` bytes
#[inline]
pub(crate) fn xdr_padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

impl ReadBuffer {
    /// Create a new ReadBuffer from bytes
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a new ReadBuffer from a byte slice
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
            pos: 0,
        }
    }

    /// Get the current position in the buffer
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to be read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if there are at least `n` bytes remaining
    #[inline]
    pub fn has_remaining(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    /// Skip `n` bytes in the buffer
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.pos += n;
        Ok(())
    }

    /// Reset the buffer position to the beginning
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    #[inline]
    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::BufferUnderflow {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Raw reads
    // =========================================================================

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read `n` raw bytes without any alignment
    pub fn read_bytes_owned(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_remaining(n)?;
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    /// Peek at the next XDR word without consuming it
    pub fn peek_u32(&self) -> Result<u32> {
        self.ensure_remaining(4)?;
        let b = &self.data[self.pos..self.pos + 4];
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    // =========================================================================
    // XDR words
    // =========================================================================

    /// Read a big-endian u32
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.peek_u32()?;
        self.pos += 4;
        Ok(value)
    }

    /// Read a big-endian i32
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a big-endian i64 (XDR hyper)
    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(i64::from_be_bytes(b))
    }

    /// Read an XDR float
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read an XDR double
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    /// Read a quad (blob id): high word then low word
    pub fn read_quad(&mut self) -> Result<BlobId> {
        let high = self.read_u32()?;
        let low = self.read_u32()?;
        Ok(BlobId::new(high, low))
    }

    // =========================================================================
    // Variable length fields
    // =========================================================================

    /// Read a fixed-size opaque field of `n` bytes plus its padding
    pub fn read_fixed_opaque(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_remaining(n + xdr_padding(n))?;
        let bytes = self.read_bytes_owned(n)?;
        self.pos += xdr_padding(n);
        Ok(bytes)
    }

    /// Read a length-prefixed opaque field plus its padding
    pub fn read_opaque(&mut self) -> Result<Bytes> {
        let len = self.peek_u32()? as usize;
        if len > MAX_OPAQUE_LENGTH {
            return Err(Error::Protocol(format!("opaque field of {} bytes", len)));
        }
        self.ensure_remaining(4 + len + xdr_padding(len))?;
        self.pos += 4;
        self.read_fixed_opaque(len)
    }

    /// Read a length-prefixed string (lossy UTF-8)
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_opaque()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // =========================================================================
    // Little-endian (info buffer) reads
    // =========================================================================

    /// Read a little-endian u16 (info item length)
    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.ensure_remaining(2)?;
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    /// Read a little-endian integer of `len` bytes (server "vax" integer)
    pub fn read_vax_int(&mut self, len: usize) -> Result<i64> {
        if len > 8 {
            return Err(Error::Protocol(format!("integer info item of {} bytes", len)));
        }
        self.ensure_remaining(len)?;
        let mut value: i64 = 0;
        for (shift, byte) in self.data[self.pos..self.pos + len].iter().enumerate() {
            value |= (*byte as i64) << (8 * shift);
        }
        // Sign-extend
        if (1..8).contains(&len) && self.data[self.pos + len - 1] & 0x80 != 0 {
            value -= 1i64 << (8 * len);
        }
        self.pos += len;
        Ok(value)
    }

    /// Read an info item value: u16 length followed by a vax integer
    pub fn read_info_int(&mut self) -> Result<i64> {
        let len = self.read_u16_le()? as usize;
        self.read_vax_int(len)
    }

    /// Read an info item value: u16 length followed by raw text
    pub fn read_info_string(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        let bytes = self.read_bytes_owned(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl From<&[u8]> for ReadBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

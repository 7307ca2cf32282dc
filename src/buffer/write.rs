//! Write buffer for encoding XDR protocol data
//!
//! Provides the XDR primitives (4-byte words, hypers, padded opaque fields)
//! used by every request message.

use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::read::xdr_padding;
use crate::error::{Error, Result};
use crate::types::BlobId;

/// A buffer for writing XDR protocol data
#[derive(Debug)]
pub struct WriteBuffer {
    /// The underlying byte buffer
    data: BytesMut,
}

impl WriteBuffer {
    /// Create a new WriteBuffer with default capacity
    pub fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(256),
        }
    }

    /// Create a new WriteBuffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the current length of data in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the buffer contents as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the buffer into immutable Bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    // =========================================================================
    // XDR words
    // =========================================================================

    /// Write a big-endian u32
    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    /// Write a big-endian i32
    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32(value);
    }

    /// Write a big-endian i64 (XDR hyper)
    pub fn write_i64(&mut self, value: i64) {
        self.data.put_i64(value);
    }

    /// Write an XDR float
    pub fn write_f32(&mut self, value: f32) {
        self.data.put_u32(value.to_bits());
    }

    /// Write an XDR double
    pub fn write_f64(&mut self, value: f64) {
        self.data.put_u64(value.to_bits());
    }

    /// Write a quad (blob id): high word then low word
    pub fn write_quad(&mut self, id: BlobId) {
        self.data.put_u32(id.high());
        self.data.put_u32(id.low());
    }

    // =========================================================================
    // Variable length fields
    // =========================================================================

    /// Write raw bytes followed by XDR padding, without a length prefix
    pub fn write_fixed_opaque(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
        self.write_padding(bytes.len());
    }

    /// Write a length-prefixed opaque field followed by XDR padding
    pub fn write_opaque(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| Error::BufferOverflow {
            needed: bytes.len(),
            available: u32::MAX as usize,
        })?;
        self.data.put_u32(len);
        self.write_fixed_opaque(bytes);
        Ok(())
    }

    /// Write a length-prefixed string
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_opaque(value.as_bytes())
    }

    fn write_padding(&mut self, len: usize) {
        for _ in 0..xdr_padding(len) {
            self.data.put_u8(0);
        }
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

//! Parameter block ("clumplet") builder
//!
//! Database, transaction and blob parameter blocks are little-endian
//! tag/length/value sequences, unlike the XDR framing around them.

use crate::error::{Error, Result};

/// Builder for DPB / TPB / BPB style parameter blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamBuffer {
    data: Vec<u8>,
}

impl ParamBuffer {
    /// Start a block with its version byte
    pub fn with_version(version: u8) -> Self {
        Self { data: vec![version] }
    }

    /// Append a bare tag
    pub fn add_tag(&mut self, tag: u8) -> &mut Self {
        self.data.push(tag);
        self
    }

    /// Append a tag followed by a length-prefixed byte string
    pub fn add_bytes(&mut self, tag: u8, value: &[u8]) -> Result<&mut Self> {
        let len = u8::try_from(value.len()).map_err(|_| Error::BufferOverflow {
            needed: value.len(),
            available: u8::MAX as usize,
        })?;
        self.data.push(tag);
        self.data.push(len);
        self.data.extend_from_slice(value);
        Ok(self)
    }

    /// Append a tag followed by a length-prefixed string
    pub fn add_string(&mut self, tag: u8, value: &str) -> Result<&mut Self> {
        self.add_bytes(tag, value.as_bytes())
    }

    /// Append a tag followed by a 4-byte little-endian integer
    pub fn add_int(&mut self, tag: u8, value: u32) -> &mut Self {
        self.data.push(tag);
        self.data.push(4);
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a tag followed by a single byte value
    pub fn add_byte(&mut self, tag: u8, value: u8) -> &mut Self {
        self.data.push(tag);
        self.data.push(1);
        self.data.push(value);
        self
    }

    /// The encoded block
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume into the encoded block
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

//! Blob identifiers

use std::fmt;

/// Server-side identifier of a blob value
///
/// Rows carry blob columns as ids; the content is read on demand by opening
/// the id inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlobId {
    high: u32,
    low: u32,
}

impl BlobId {
    /// Create an id from its two XDR words
    pub const fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    /// High word (relation id)
    pub fn high(&self) -> u32 {
        self.high
    }

    /// Low word
    pub fn low(&self) -> u32 {
        self.low
    }

    /// The id as one 64-bit integer
    pub fn as_u64(&self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }

    /// The all-zero id the server uses for "no blob"
    pub fn is_null(&self) -> bool {
        self.high == 0 && self.low == 0
    }
}

impl From<u64> for BlobId {
    fn from(value: u64) -> Self {
        Self::new((value >> 32) as u32, value as u32)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.high, self.low)
    }
}

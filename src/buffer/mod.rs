//! Buffer abstractions for Firebird protocol encoding/decoding
//!
//! This module provides buffer types for reading and writing XDR protocol
//! data, and a builder for the little-endian parameter blocks embedded in it.

mod param;
mod read;
mod write;

pub use param::ParamBuffer;
pub use read::ReadBuffer;
pub use write::WriteBuffer;

//! Firebird data type encoding and decoding
//!
//! Native representations for the column types that need more than a
//! primitive: scaled integers, the packed date/time formats and blob ids.

mod blob;
mod date;
mod number;

pub use blob::BlobId;
pub use date::{
    decode_date, decode_time, decode_timestamp, encode_date, encode_time, encode_timestamp,
    TIME_UNITS_PER_SECOND,
};
pub use number::Numeric;

//! DATE, TIME and TIMESTAMP encoding and decoding
//!
//! Wire formats:
//! - DATE: signed 32-bit count of days since 1858-11-17 (Modified Julian Day)
//! - TIME: unsigned 32-bit count of 1/10000 second units since midnight
//! - TIMESTAMP: DATE word followed by TIME word

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{Error, Result};

/// TIME resolution: units per second
pub const TIME_UNITS_PER_SECOND: u32 = 10_000;

/// Days from 0001-01-01 (day 1) to 1858-11-17
const MJD_EPOCH_FROM_CE: i32 = 678_576;

const NANOS_PER_UNIT: u32 = 1_000_000_000 / TIME_UNITS_PER_SECOND;

/// Decode a wire DATE
pub fn decode_date(days: i32) -> Result<NaiveDate> {
    days.checked_add(MJD_EPOCH_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| Error::DataConversion(format!("date out of range: {} days", days)))
}

/// Encode a date for the wire
pub fn encode_date(date: &NaiveDate) -> i32 {
    date.num_days_from_ce() - MJD_EPOCH_FROM_CE
}

/// Decode a wire TIME
pub fn decode_time(units: u32) -> Result<NaiveTime> {
    let secs = units / TIME_UNITS_PER_SECOND;
    let nanos = (units % TIME_UNITS_PER_SECOND) * NANOS_PER_UNIT;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| Error::DataConversion(format!("time out of range: {} units", units)))
}

/// Encode a time for the wire (sub-unit precision is truncated)
pub fn encode_time(time: &NaiveTime) -> u32 {
    // Leap-second nanos (>= 1e9) are clamped into the last unit of the second
    let nanos = time.nanosecond().min(999_999_999);
    time.num_seconds_from_midnight() * TIME_UNITS_PER_SECOND + nanos / NANOS_PER_UNIT
}

/// Decode a wire TIMESTAMP
pub fn decode_timestamp(days: i32, units: u32) -> Result<NaiveDateTime> {
    Ok(decode_date(days)?.and_time(decode_time(units)?))
}

/// Encode a timestamp for the wire
pub fn encode_timestamp(ts: &NaiveDateTime) -> (i32, u32) {
    (encode_date(&ts.date()), encode_time(&ts.time()))
}

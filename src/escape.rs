//! SQL literal rendering
//!
//! [`escape`] turns a [`Value`] into text that can be pasted into a SQL
//! statement. Parameters should be preferred; this exists for statements
//! that cannot take them (DDL defaults, `EXECUTE BLOCK` bodies, logging).

use std::fmt::Write;

use chrono::{NaiveTime, Timelike};

use crate::error::{Error, Result};
use crate::row::Value;
use crate::types::TIME_UNITS_PER_SECOND;

/// Render `value` as a Firebird SQL literal
///
/// ```rust
/// use firebird_rs::{escape, Value};
///
/// assert_eq!(escape(&Value::from("it's")).unwrap(), "'it''s'");
/// assert_eq!(escape(&Value::Null).unwrap(), "NULL");
/// ```
pub fn escape(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => quote(s),
        Value::Bytes(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for byte in bytes {
                let _ = write!(out, "{:02X}", byte);
            }
            out.push('\'');
            out
        }
        Value::Integer(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(f) => {
            return Err(Error::DataConversion(format!(
                "{} has no SQL literal",
                f
            )))
        }
        Value::Numeric(n) => n.to_string(),
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
        Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("TIME '{}'", time_literal(t)),
        Value::Timestamp(ts) => format!(
            "TIMESTAMP '{} {}'",
            ts.date().format("%Y-%m-%d"),
            time_literal(&ts.time())
        ),
        Value::Blob(id) => {
            return Err(Error::DataConversion(format!(
                "blob {} has no SQL literal",
                id
            )))
        }
    })
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// `HH:MM:SS.ffff`, at the server's 1/10000 s resolution
fn time_literal(t: &NaiveTime) -> String {
    let nanos_per_unit = 1_000_000_000 / TIME_UNITS_PER_SECOND;
    // Leap second nanos (>= 1e9) fold into the last unit
    let units = (t.nanosecond() / nanos_per_unit).min(TIME_UNITS_PER_SECOND - 1);
    format!("{}.{:04}", t.format("%H:%M:%S"), units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlobId, Numeric};
    use chrono::NaiveDate;

    #[test]
    fn test_escape_text_and_bytes() {
        assert_eq!(escape(&Value::from("plain")).unwrap(), "'plain'");
        assert_eq!(escape(&Value::from("O'Brien's")).unwrap(), "'O''Brien''s'");
        assert_eq!(escape(&Value::from("")).unwrap(), "''");
        assert_eq!(escape(&Value::Bytes(vec![0x00, 0xAB, 0x10])).unwrap(), "X'00AB10'");
    }

    #[test]
    fn test_escape_numbers() {
        assert_eq!(escape(&Value::Integer(-42)).unwrap(), "-42");
        assert_eq!(escape(&Value::Float(1.5)).unwrap(), "1.5");
        assert_eq!(escape(&Value::Numeric(Numeric::new(12345, -2))).unwrap(), "123.45");
        assert!(escape(&Value::Float(f64::NAN)).is_err());
        assert!(escape(&Value::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_escape_other_types() {
        assert_eq!(escape(&Value::Null).unwrap(), "NULL");
        assert_eq!(escape(&Value::Boolean(true)).unwrap(), "TRUE");
        assert_eq!(escape(&Value::Boolean(false)).unwrap(), "FALSE");

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(escape(&Value::Date(date)).unwrap(), "DATE '2024-02-29'");

        let time = NaiveTime::from_hms_micro_opt(13, 5, 9, 123_456).unwrap();
        assert_eq!(escape(&Value::Time(time)).unwrap(), "TIME '13:05:09.1234'");
        assert_eq!(
            escape(&Value::Timestamp(date.and_time(time))).unwrap(),
            "TIMESTAMP '2024-02-29 13:05:09.1234'"
        );

        assert!(escape(&Value::Blob(BlobId::new(1, 2))).is_err());
    }
}

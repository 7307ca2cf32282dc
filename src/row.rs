//! Row data handling for Firebird query results
//!
//! This module provides types and functions for:
//! - Decoding row messages from the XDR wire format
//! - Representing column values in a type-safe manner
//! - Shaping rows as positional arrays or name-keyed objects
//!
//! Decoding happens in two steps. [`read_row`] only walks the wire layout and
//! runs inside the connection driver, where a failure would desynchronise the
//! stream; conversion to [`Value`] (character sets, scales, calendar types)
//! happens afterwards on the caller's side, where a bad value is just an error.

use std::fmt;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;

use crate::buffer::ReadBuffer;
use crate::constants::{charset, sql_type};
use crate::error::{Error, Result};
use crate::statement::ColumnInfo;
use crate::types::{decode_date, decode_time, decode_timestamp, BlobId, Numeric};

/// Represents a value from a Firebird column or a statement parameter.
///
/// # Example
///
/// ```rust
/// use firebird_rs::Value;
///
/// fn describe(value: &Value) -> String {
///     match value {
///         Value::Null => "NULL".to_string(),
///         Value::String(s) => format!("text {}", s),
///         Value::Integer(i) => format!("integer {}", i),
///         other => other.to_string(),
///     }
/// }
/// assert_eq!(describe(&Value::from(42)), "integer 42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Text (CHAR, VARCHAR)
    String(String),
    /// Binary text (CHARACTER SET OCTETS)
    Bytes(Vec<u8>),
    /// SMALLINT, INTEGER, BIGINT
    Integer(i64),
    /// FLOAT, DOUBLE PRECISION
    Float(f64),
    /// NUMERIC / DECIMAL with a non-zero scale
    Numeric(Numeric),
    /// BOOLEAN
    Boolean(bool),
    /// DATE
    Date(NaiveDate),
    /// TIME
    Time(NaiveTime),
    /// TIMESTAMP
    Timestamp(NaiveDateTime),
    /// BLOB / ARRAY reference, read on demand
    Blob(BlobId),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Numeric(n) => n.rescale(0).ok(),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Numeric(n) => Some(n.to_f64()),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as a date
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    /// Try to get as a time of day
    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// Try to get as a timestamp
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Try to get as a blob id
    pub fn as_blob_id(&self) -> Option<BlobId> {
        match self {
            Value::Blob(id) => Some(*id),
            _ => None,
        }
    }

    /// Render as JSON
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|&x| Json::from(x)).collect()),
            Value::Integer(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Numeric(n) => serde_json::Number::from_f64(n.to_f64())
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Json::String(t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => Json::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::Blob(id) => Json::String(id.to_string()),
        }
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Numeric> for Value {
    fn from(v: Numeric) -> Self {
        Value::Numeric(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<BlobId> for Value {
    fn from(v: BlobId) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl TryFrom<&Value> for i64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::UnexpectedNull),
            other => other
                .as_i64()
                .ok_or_else(|| Error::DataConversion(format!("{:?} is not an integer", other))),
        }
    }
}

impl TryFrom<&Value> for f64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::UnexpectedNull),
            other => other
                .as_f64()
                .ok_or_else(|| Error::DataConversion(format!("{:?} is not a number", other))),
        }
    }
}

impl TryFrom<&Value> for String {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::UnexpectedNull),
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl TryFrom<&Value> for bool {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::UnexpectedNull),
            other => other
                .as_bool()
                .ok_or_else(|| Error::DataConversion(format!("{:?} is not a boolean", other))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Numeric(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Blob(id) => write!(f, "<BLOB {}>", id),
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// How decoded rows are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowShape {
    /// Values in column order
    #[default]
    Array,
    /// Values keyed by column alias, in column order
    Object,
}

/// A row of data from a query result.
///
/// Both shapes are produced from the same column descriptors; which one a
/// caller receives is decided by [`RowShape`].
///
/// # Example
///
/// ```rust,no_run
/// use firebird_rs::{Database, Row};
///
/// # async fn example(db: Database) -> firebird_rs::Result<()> {
/// let rows = db.query("SELECT ID, NAME FROM PEOPLE", &[]).await?;
/// for row in &rows {
///     let id = row.get(0).and_then(|v| v.as_i64());
///     let name = row.get_by_name("NAME").and_then(|v| v.as_str());
///     println!("{:?}: {:?}", id, name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Positional row
    Array(Vec<Value>),
    /// Name-keyed row; a later column wins over an earlier one with the same key
    Object(IndexMap<String, Value>),
}

impl Row {
    /// Shape of this row
    pub fn shape(&self) -> RowShape {
        match self {
            Row::Array(_) => RowShape::Array,
            Row::Object(_) => RowShape::Object,
        }
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        match self {
            Row::Array(values) => values.len(),
            Row::Object(map) => map.len(),
        }
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a value by column position
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Row::Array(values) => values.get(index),
            Row::Object(map) => map.get_index(index).map(|(_, v)| v),
        }
    }

    /// Get a value by key (object rows only); exact match first, then ASCII case-insensitive
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        match self {
            Row::Array(_) => None,
            Row::Object(map) => map.get(name).or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            }),
        }
    }

    /// Values in column order
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Row::Array(values) => values.iter().collect(),
            Row::Object(map) => map.values().collect(),
        }
    }

    /// Consume the row and return the values in column order
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Row::Array(values) => values,
            Row::Object(map) => map.into_values().collect(),
        }
    }

    /// Render as a JSON array or object
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Row::Array(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Row::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Arrange converted values into the requested shape
pub(crate) fn shape_row(
    values: Vec<Value>,
    columns: &[ColumnInfo],
    shape: RowShape,
    lowercase_keys: bool,
) -> Row {
    match shape {
        RowShape::Array => Row::Array(values),
        RowShape::Object => {
            let mut map = IndexMap::with_capacity(values.len());
            for (column, value) in columns.iter().zip(values) {
                let key = if lowercase_keys {
                    column.alias.to_lowercase()
                } else {
                    column.alias.clone()
                };
                map.insert(key, value);
            }
            Row::Object(map)
        }
    }
}

// =============================================================================
// Wire decoding
// =============================================================================

/// A column value as laid out on the wire, before conversion
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WireValue {
    Null,
    Text(Bytes),
    Int(i64),
    Float(f64),
    Date(i32),
    Time(u32),
    Timestamp(i32, u32),
    Quad(BlobId),
    Bool(bool),
}

/// Read one row message: each value followed by its null indicator
pub(crate) fn read_row(buf: &mut ReadBuffer, columns: &[ColumnInfo]) -> Result<Vec<WireValue>> {
    let mut row = Vec::with_capacity(columns.len());
    for column in columns {
        let value = read_value(buf, column)?;
        let indicator = buf.read_i32()?;
        row.push(if indicator != 0 { WireValue::Null } else { value });
    }
    Ok(row)
}

fn read_value(buf: &mut ReadBuffer, column: &ColumnInfo) -> Result<WireValue> {
    Ok(match column.sql_type {
        sql_type::TEXT => WireValue::Text(buf.read_fixed_opaque(column.length as usize)?),
        sql_type::VARYING => WireValue::Text(buf.read_opaque()?),
        sql_type::NULL => WireValue::Null,
        sql_type::SHORT | sql_type::LONG => WireValue::Int(buf.read_i32()? as i64),
        sql_type::INT64 => WireValue::Int(buf.read_i64()?),
        sql_type::FLOAT => WireValue::Float(buf.read_f32()? as f64),
        sql_type::DOUBLE | sql_type::D_FLOAT => WireValue::Float(buf.read_f64()?),
        sql_type::TYPE_DATE => WireValue::Date(buf.read_i32()?),
        sql_type::TYPE_TIME => WireValue::Time(buf.read_u32()?),
        sql_type::TIMESTAMP => {
            let date = buf.read_i32()?;
            let time = buf.read_u32()?;
            WireValue::Timestamp(date, time)
        }
        sql_type::BLOB | sql_type::ARRAY | sql_type::QUAD => WireValue::Quad(buf.read_quad()?),
        sql_type::BOOLEAN => WireValue::Bool(buf.read_fixed_opaque(1)?[0] != 0),
        other => {
            return Err(Error::Protocol(format!(
                "cannot decode SQL type {} of column {}",
                other, column.alias
            )))
        }
    })
}

/// Convert a wire row into values using its column descriptors
pub(crate) fn convert_row(raw: Vec<WireValue>, columns: &[ColumnInfo]) -> Result<Vec<Value>> {
    raw.into_iter()
        .zip(columns)
        .map(|(value, column)| convert_value(value, column))
        .collect()
}

fn convert_value(value: WireValue, column: &ColumnInfo) -> Result<Value> {
    Ok(match value {
        WireValue::Null => Value::Null,
        WireValue::Text(bytes) => {
            let charset_id = column.charset_id();
            if charset_id == charset::OCTETS {
                Value::Bytes(bytes.to_vec())
            } else {
                let mut text = decode_text(&bytes, charset_id)?;
                if column.sql_type == sql_type::TEXT {
                    // CHAR columns are blank padded to their byte length
                    text.truncate(text.trim_end_matches(' ').len());
                }
                Value::String(text)
            }
        }
        WireValue::Int(i) if column.scale == 0 => Value::Integer(i),
        WireValue::Int(i) => Value::Numeric(Numeric::new(i, column.scale as i32)),
        WireValue::Float(f) => Value::Float(f),
        WireValue::Date(days) => Value::Date(decode_date(days)?),
        WireValue::Time(units) => Value::Time(decode_time(units)?),
        WireValue::Timestamp(days, units) => Value::Timestamp(decode_timestamp(days, units)?),
        WireValue::Quad(id) => Value::Blob(id),
        WireValue::Bool(b) => Value::Boolean(b),
    })
}

/// Decode text in the given character set
///
/// Single-byte sets map each byte to the code point of the same value.
/// NONE carries whatever the client stored; it is read as UTF-8 when valid.
pub(crate) fn decode_text(bytes: &[u8], charset_id: u16) -> Result<String> {
    match charset_id {
        charset::NONE => Ok(match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => latin1(bytes),
        }),
        charset::ASCII | charset::ISO8859_1 | charset::WIN1252 => Ok(latin1(bytes)),
        _ => String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::DataConversion(format!("invalid UTF-8 text: {}", e))),
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

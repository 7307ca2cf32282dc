//! BLR message descriptions
//!
//! Row and parameter messages are described to the server in BLR:
//!
//! ```text
//! blr_version5 blr_begin blr_message 0 <u16 LE item count>
//!   <item> blr_short 0      -- one value plus its null indicator per field
//! blr_end blr_eoc
//! ```
//!
//! Output rows are described from the column descriptors returned by prepare;
//! parameters are described from the bound values themselves and converted
//! to the declared parameter types by the server.

use bytes::Bytes;

use crate::buffer::WriteBuffer;
use crate::constants::{blr, charset, sql_type};
use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::ColumnInfo;
use crate::types::{encode_date, encode_time, encode_timestamp};

/// Longest text parameter the server accepts inline
const MAX_TEXT_PARAM: usize = 32767;

fn begin(fields: usize) -> Result<Vec<u8>> {
    let items = u16::try_from(fields * 2).map_err(|_| Error::BufferOverflow {
        needed: fields * 2,
        available: u16::MAX as usize,
    })?;
    let mut out = Vec::with_capacity(8 + fields * 8);
    out.extend_from_slice(&[blr::VERSION5, blr::BEGIN, blr::MESSAGE, 0]);
    out.extend_from_slice(&items.to_le_bytes());
    Ok(out)
}

fn finish(mut out: Vec<u8>) -> Vec<u8> {
    out.extend_from_slice(&[blr::END, blr::EOC]);
    out
}

fn text_item(out: &mut Vec<u8>, code: u8, charset: u16, length: u16) {
    out.push(code);
    out.extend_from_slice(&charset.to_le_bytes());
    out.extend_from_slice(&length.to_le_bytes());
}

/// BLR describing the output row of a statement
pub(crate) fn output_blr(columns: &[ColumnInfo]) -> Result<Vec<u8>> {
    let mut out = begin(columns.len())?;
    for column in columns {
        let scale = column.scale as i8 as u8;
        match column.sql_type {
            sql_type::VARYING => {
                text_item(&mut out, blr::VARYING2, column.subtype as u16, column.length)
            }
            sql_type::TEXT => text_item(&mut out, blr::TEXT2, column.subtype as u16, column.length),
            sql_type::NULL => text_item(&mut out, blr::TEXT2, 0, 0),
            sql_type::SHORT => out.extend_from_slice(&[blr::SHORT, scale]),
            sql_type::LONG => out.extend_from_slice(&[blr::LONG, scale]),
            sql_type::INT64 => out.extend_from_slice(&[blr::INT64, scale]),
            sql_type::QUAD => out.extend_from_slice(&[blr::QUAD, scale]),
            sql_type::BLOB | sql_type::ARRAY => out.extend_from_slice(&[blr::QUAD, 0]),
            sql_type::FLOAT => out.push(blr::FLOAT),
            sql_type::DOUBLE => out.push(blr::DOUBLE),
            sql_type::D_FLOAT => out.push(blr::D_FLOAT),
            sql_type::TYPE_DATE => out.push(blr::SQL_DATE),
            sql_type::TYPE_TIME => out.push(blr::SQL_TIME),
            sql_type::TIMESTAMP => out.push(blr::TIMESTAMP),
            sql_type::BOOLEAN => out.push(blr::BOOL),
            other => {
                return Err(Error::FeatureNotSupported(format!(
                    "column {} has SQL type {}",
                    column.alias, other
                )))
            }
        }
        out.extend_from_slice(&[blr::SHORT, 0]);
    }
    Ok(finish(out))
}

/// Encoded input message: BLR description plus XDR data
#[derive(Debug, Clone, Default)]
pub(crate) struct ParamMessage {
    blr: Vec<u8>,
    data: Bytes,
    count: usize,
}

impl ParamMessage {
    /// Message for a statement without parameters
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Describe and encode `values`; text is tagged with `charset_id`
    pub(crate) fn encode(values: &[Value], charset_id: u16) -> Result<Self> {
        if values.is_empty() {
            return Ok(Self::empty());
        }
        let mut out = begin(values.len())?;
        let mut data = WriteBuffer::with_capacity(values.len() * 16);
        for value in values {
            let null = encode_value(&mut out, &mut data, value, charset_id)?;
            out.extend_from_slice(&[blr::SHORT, 0]);
            data.write_i32(if null { -1 } else { 0 });
        }
        Ok(Self {
            blr: finish(out),
            data: data.freeze(),
            count: values.len(),
        })
    }

    pub(crate) fn blr(&self) -> &[u8] {
        &self.blr
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Append the BLR item and data for one value; returns whether it is NULL
fn encode_value(
    out: &mut Vec<u8>,
    data: &mut WriteBuffer,
    value: &Value,
    charset_id: u16,
) -> Result<bool> {
    match value {
        Value::Null => {
            text_item(out, blr::TEXT2, charset::NONE, 0);
            return Ok(true);
        }
        Value::String(s) => encode_text(out, data, s.as_bytes(), charset_id)?,
        Value::Bytes(b) => encode_text(out, data, b, charset::OCTETS)?,
        Value::Integer(i) => {
            out.extend_from_slice(&[blr::INT64, 0]);
            data.write_i64(*i);
        }
        Value::Numeric(n) => {
            let scale = i8::try_from(n.scale).map_err(|_| {
                Error::DataConversion(format!("numeric scale {} out of range", n.scale))
            })?;
            out.extend_from_slice(&[blr::INT64, scale as u8]);
            data.write_i64(n.value);
        }
        Value::Float(f) => {
            out.push(blr::DOUBLE);
            data.write_f64(*f);
        }
        Value::Boolean(b) => {
            out.push(blr::BOOL);
            data.write_fixed_opaque(&[*b as u8]);
        }
        Value::Date(d) => {
            out.push(blr::SQL_DATE);
            data.write_i32(encode_date(d));
        }
        Value::Time(t) => {
            out.push(blr::SQL_TIME);
            data.write_u32(encode_time(t));
        }
        Value::Timestamp(ts) => {
            let (date, time) = encode_timestamp(ts);
            out.push(blr::TIMESTAMP);
            data.write_i32(date);
            data.write_u32(time);
        }
        Value::Blob(id) => {
            out.extend_from_slice(&[blr::QUAD, 0]);
            data.write_quad(*id);
        }
    }
    Ok(false)
}

fn encode_text(out: &mut Vec<u8>, data: &mut WriteBuffer, bytes: &[u8], charset_id: u16) -> Result<()> {
    if bytes.len() > MAX_TEXT_PARAM {
        return Err(Error::DataConversion(format!(
            "{} byte parameter exceeds {} bytes; bind it to a BLOB column",
            bytes.len(),
            MAX_TEXT_PARAM
        )));
    }
    text_item(out, blr::TEXT2, charset_id, bytes.len() as u16);
    data.write_fixed_opaque(bytes);
    Ok(())
}

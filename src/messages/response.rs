//! Server responses
//!
//! Every request is answered by exactly one logical reply. Most replies are a
//! generic `op_response`:
//!
//! ```text
//! op_response
//! u32    object handle (or segment state for op_get_segment)
//! quad   blob id
//! opaque data (info buffers, segments)
//! status vector
//! ```
//!
//! Fetches are answered by a run of `op_fetch_response` headers each followed
//! by one row, terminated by a header with a zero row count. `op_execute2`
//! is answered by `op_sql_response` (zero or one row) followed by
//! `op_response`. The server may interleave `op_dummy` keep-alives, which
//! are skipped.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::ReadBuffer;
use crate::constants::{isc_arg, protocol, Operation, FETCH_NO_MORE_ROWS};
use crate::error::{Error, Result, StatusEntry, StatusVector};
use crate::row::{read_row, WireValue};
use crate::statement::ColumnInfo;
use crate::types::BlobId;

/// What the reply to a request looks like
#[derive(Debug, Clone)]
pub(crate) enum Expect {
    /// No reply (op_disconnect)
    Nothing,
    /// `op_accept` / `op_reject` to `op_connect`
    Accept,
    /// Generic `op_response`
    Response,
    /// Batch of `op_fetch_response` rows
    Fetch(Arc<[ColumnInfo]>),
    /// `op_sql_response` then `op_response`
    SqlResponse(Arc<[ColumnInfo]>),
}

/// Negotiated connection parameters from `op_accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptInfo {
    /// Protocol version chosen by the server
    pub version: u32,
    /// Architecture chosen by the server
    pub architecture: u32,
    /// Packet type chosen by the server
    pub ptype: u32,
}

/// Decoded `op_response`
#[derive(Debug, Clone, Default)]
pub(crate) struct GenericResponse {
    pub(crate) handle: u32,
    pub(crate) blob_id: BlobId,
    pub(crate) data: Bytes,
    pub(crate) status: StatusVector,
}

/// Rows returned by one `op_fetch`
#[derive(Debug, Default)]
pub(crate) struct FetchBatch {
    pub(crate) rows: Vec<Vec<WireValue>>,
    /// Server signalled end of cursor
    pub(crate) exhausted: bool,
}

/// A decoded reply
#[derive(Debug)]
pub(crate) enum Reply {
    Nothing,
    Accept(AcceptInfo),
    Response(GenericResponse),
    Fetch(FetchBatch),
    Sql {
        row: Option<Vec<WireValue>>,
        response: GenericResponse,
    },
}

impl Reply {
    /// The generic response, failing with its status vector if it is an error
    pub(crate) fn into_response(self) -> Result<GenericResponse> {
        match self {
            Reply::Response(response) | Reply::Sql { response, .. } => {
                response.status.clone().into_result()?;
                Ok(response)
            }
            other => Err(unexpected("op_response", &other)),
        }
    }

    pub(crate) fn into_accept(self) -> Result<AcceptInfo> {
        match self {
            Reply::Accept(info) => Ok(info),
            Reply::Response(response) => {
                response.status.into_result()?;
                Err(Error::Protocol("op_response without error to op_connect".into()))
            }
            other => Err(unexpected("op_accept", &other)),
        }
    }

    pub(crate) fn into_fetch(self) -> Result<FetchBatch> {
        match self {
            Reply::Fetch(batch) => Ok(batch),
            Reply::Response(response) => {
                response.status.into_result()?;
                Err(Error::Protocol("op_response without error to op_fetch".into()))
            }
            other => Err(unexpected("op_fetch_response", &other)),
        }
    }

    /// Output row of `op_execute2` (if any) after checking the status
    pub(crate) fn into_sql(self) -> Result<Option<Vec<WireValue>>> {
        match self {
            Reply::Sql { row, response } => {
                response.status.into_result()?;
                Ok(row)
            }
            Reply::Response(response) => {
                response.status.into_result()?;
                Ok(None)
            }
            other => Err(unexpected("op_sql_response", &other)),
        }
    }
}

fn unexpected(expected: &str, reply: &Reply) -> Error {
    Error::Internal(format!("expected {} reply, got {:?}", expected, reply))
}

/// Decode the reply to a request from the start of `buf`
pub(crate) fn decode_reply(buf: &mut ReadBuffer, expect: &Expect) -> Result<Reply> {
    match expect {
        Expect::Nothing => Ok(Reply::Nothing),
        Expect::Accept => match read_operation(buf)? {
            Operation::Accept => Ok(Reply::Accept(decode_accept(buf)?)),
            Operation::Reject => Err(Error::ConnectionRejected),
            Operation::Response => Ok(Reply::Response(decode_response_body(buf)?)),
            actual => Err(Error::UnexpectedOperation {
                expected: "op_accept",
                actual,
            }),
        },
        Expect::Response => {
            let response = expect_response(buf)?;
            Ok(Reply::Response(response))
        }
        Expect::Fetch(columns) => decode_fetch(buf, columns),
        Expect::SqlResponse(columns) => match read_operation(buf)? {
            Operation::SqlResponse => {
                let count = buf.read_u32()?;
                let row = if count > 0 {
                    Some(read_row(buf, columns)?)
                } else {
                    None
                };
                let response = expect_response(buf)?;
                Ok(Reply::Sql { row, response })
            }
            Operation::Response => Ok(Reply::Response(decode_response_body(buf)?)),
            actual => Err(Error::UnexpectedOperation {
                expected: "op_sql_response",
                actual,
            }),
        },
    }
}

/// Read the next operation code, skipping keep-alives
fn read_operation(buf: &mut ReadBuffer) -> Result<Operation> {
    loop {
        let op = Operation::try_from(buf.read_u32()?)?;
        if op != Operation::Dummy {
            return Ok(op);
        }
    }
}

fn expect_response(buf: &mut ReadBuffer) -> Result<GenericResponse> {
    match read_operation(buf)? {
        Operation::Response => decode_response_body(buf),
        actual => Err(Error::UnexpectedOperation {
            expected: "op_response",
            actual,
        }),
    }
}

fn decode_accept(buf: &mut ReadBuffer) -> Result<AcceptInfo> {
    let version = buf.read_u32()?;
    let architecture = buf.read_u32()?;
    let ptype = buf.read_u32()?;
    if !protocol::OFFERED.iter().any(|(v, ..)| *v == version) {
        return Err(Error::UnsupportedProtocol(version));
    }
    Ok(AcceptInfo {
        version,
        architecture,
        ptype,
    })
}

fn decode_response_body(buf: &mut ReadBuffer) -> Result<GenericResponse> {
    let handle = buf.read_u32()?;
    let blob_id = buf.read_quad()?;
    let data = buf.read_opaque()?;
    let status = decode_status_vector(buf)?;
    Ok(GenericResponse {
        handle,
        blob_id,
        data,
        status,
    })
}

fn decode_fetch(buf: &mut ReadBuffer, columns: &[ColumnInfo]) -> Result<Reply> {
    let mut batch = FetchBatch::default();
    loop {
        match read_operation(buf)? {
            Operation::FetchResponse => {}
            Operation::Response if batch.rows.is_empty() => {
                return Ok(Reply::Response(decode_response_body(buf)?));
            }
            actual => {
                return Err(Error::UnexpectedOperation {
                    expected: "op_fetch_response",
                    actual,
                })
            }
        }
        let status = buf.read_u32()?;
        let count = buf.read_u32()?;
        if count == 0 {
            batch.exhausted = status == FETCH_NO_MORE_ROWS;
            return Ok(Reply::Fetch(batch));
        }
        batch.rows.push(read_row(buf, columns)?);
    }
}

/// Decode a status vector into its entries
pub(crate) fn decode_status_vector(buf: &mut ReadBuffer) -> Result<StatusVector> {
    let mut status = StatusVector::default();
    loop {
        match buf.read_u32()? {
            isc_arg::END => return Ok(status),
            isc_arg::GDS => {
                let code = buf.read_u32()?;
                if code != 0 {
                    status.entries.push(StatusEntry {
                        code,
                        args: Vec::new(),
                    });
                }
            }
            isc_arg::STRING | isc_arg::CSTRING => {
                let arg = buf.read_string()?;
                if let Some(entry) = status.entries.last_mut() {
                    entry.args.push(arg);
                }
            }
            isc_arg::NUMBER => {
                let arg = buf.read_i32()?;
                if let Some(entry) = status.entries.last_mut() {
                    entry.args.push(arg.to_string());
                }
            }
            isc_arg::INTERPRETED => status.interpreted.push(buf.read_string()?),
            isc_arg::SQL_STATE => status.sql_state = Some(buf.read_string()?),
            other => {
                return Err(Error::Protocol(format!(
                    "unknown status vector argument {}",
                    other
                )))
            }
        }
    }
}

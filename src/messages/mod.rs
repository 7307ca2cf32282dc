//! Firebird wire protocol messages
//!
//! Request builders grouped by the object they act on, and the decoder for
//! the replies. Requests are plain byte payloads tagged with the shape of
//! the reply they expect; the sequencer pairs them up by order alone.

mod blob;
mod blr;
mod connect;
mod describe;
mod response;
mod statement;
mod transaction;

use std::sync::Arc;

use bytes::Bytes;

pub(crate) use blob::{
    parse_segments, BatchSegmentsMessage, BlobMessage, CreateBlobMessage, GetSegmentMessage,
    OpenBlobMessage,
};
pub(crate) use blr::{output_blr, ParamMessage};
pub(crate) use connect::{AttachMessage, ConnectMessage, DetachMessage, DisconnectMessage};
pub(crate) use describe::{describe_items, DescribeInfo, RecordCounts};
pub(crate) use response::{decode_reply, Expect, Reply};
pub use response::AcceptInfo;
pub(crate) use statement::{
    AllocateStatementMessage, ExecuteMessage, FetchMessage, FreeStatementMessage, InfoSqlMessage,
    PrepareMessage,
};
pub(crate) use transaction::{TransactionEndMessage, TransactionMessage};

use crate::statement::ColumnInfo;

/// One encoded request and the reply it expects
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub(crate) payload: Bytes,
    pub(crate) expect: Expect,
}

impl Request {
    /// Request answered by a generic `op_response`
    pub(crate) fn response(payload: Bytes) -> Self {
        Self {
            payload,
            expect: Expect::Response,
        }
    }

    /// `op_connect`, answered by `op_accept`
    pub(crate) fn accept(payload: Bytes) -> Self {
        Self {
            payload,
            expect: Expect::Accept,
        }
    }

    /// Request with no reply
    pub(crate) fn no_reply(payload: Bytes) -> Self {
        Self {
            payload,
            expect: Expect::Nothing,
        }
    }

    /// `op_fetch`, answered by rows described by `columns`
    pub(crate) fn fetch(payload: Bytes, columns: Arc<[ColumnInfo]>) -> Self {
        Self {
            payload,
            expect: Expect::Fetch(columns),
        }
    }

    /// `op_execute2`, answered by a singleton row and a response
    pub(crate) fn sql_response(payload: Bytes, columns: Arc<[ColumnInfo]>) -> Self {
        Self {
            payload,
            expect: Expect::SqlResponse(columns),
        }
    }

    /// Operation code of the request (first XDR word)
    pub(crate) fn op_code(&self) -> u32 {
        match self.payload.get(..4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }
}

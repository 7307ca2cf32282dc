//! Transaction messages

use bytes::Bytes;

use crate::buffer::WriteBuffer;
use crate::constants::Operation;
use crate::error::Result;

/// `op_transaction` request carrying the transaction parameter block
#[derive(Debug)]
pub(crate) struct TransactionMessage<'a> {
    database: u32,
    tpb: &'a [u8],
}

impl<'a> TransactionMessage<'a> {
    pub(crate) fn new(database: u32, tpb: &'a [u8]) -> Self {
        Self { database, tpb }
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(16 + self.tpb.len());
        buf.write_u32(Operation::Transaction as u32);
        buf.write_u32(self.database);
        buf.write_opaque(self.tpb)?;
        Ok(buf.freeze())
    }
}

/// Commit / rollback (plain or retaining) of one transaction
#[derive(Debug)]
pub(crate) struct TransactionEndMessage {
    op: Operation,
    transaction: u32,
}

impl TransactionEndMessage {
    pub(crate) fn commit(transaction: u32, retaining: bool) -> Self {
        let op = if retaining {
            Operation::CommitRetaining
        } else {
            Operation::Commit
        };
        Self { op, transaction }
    }

    pub(crate) fn rollback(transaction: u32, retaining: bool) -> Self {
        let op = if retaining {
            Operation::RollbackRetaining
        } else {
            Operation::Rollback
        };
        Self { op, transaction }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(8);
        buf.write_u32(self.op as u32);
        buf.write_u32(self.transaction);
        buf.freeze()
    }
}

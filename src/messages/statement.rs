//! Statement messages
//!
//! Allocate, prepare, describe, execute, fetch and free. Parameter and row
//! layouts travel as BLR message descriptions built in [`super::blr`].

use bytes::Bytes;

use crate::buffer::WriteBuffer;
use crate::constants::{info, Operation};
use crate::error::Result;

use super::blr::ParamMessage;

/// `op_allocate_statement`
#[derive(Debug)]
pub(crate) struct AllocateStatementMessage {
    database: u32,
}

impl AllocateStatementMessage {
    pub(crate) fn new(database: u32) -> Self {
        Self { database }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(8);
        buf.write_u32(Operation::AllocateStatement as u32);
        buf.write_u32(self.database);
        buf.freeze()
    }
}

/// `op_prepare_statement`, returning the describe info buffer
#[derive(Debug)]
pub(crate) struct PrepareMessage<'a> {
    transaction: u32,
    statement: u32,
    dialect: u32,
    sql: &'a str,
    items: &'a [u8],
}

impl<'a> PrepareMessage<'a> {
    pub(crate) fn new(
        transaction: u32,
        statement: u32,
        dialect: u32,
        sql: &'a str,
        items: &'a [u8],
    ) -> Self {
        Self {
            transaction,
            statement,
            dialect,
            sql,
            items,
        }
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(32 + self.sql.len() + self.items.len());
        buf.write_u32(Operation::PrepareStatement as u32);
        buf.write_u32(self.transaction);
        buf.write_u32(self.statement);
        buf.write_u32(self.dialect);
        buf.write_string(self.sql)?;
        buf.write_opaque(self.items)?;
        buf.write_u32(info::BUFFER_LENGTH);
        Ok(buf.freeze())
    }
}

/// `op_info_sql`
#[derive(Debug)]
pub(crate) struct InfoSqlMessage<'a> {
    statement: u32,
    items: &'a [u8],
}

impl<'a> InfoSqlMessage<'a> {
    pub(crate) fn new(statement: u32, items: &'a [u8]) -> Self {
        Self { statement, items }
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(24 + self.items.len());
        buf.write_u32(Operation::InfoSql as u32);
        buf.write_u32(self.statement);
        buf.write_u32(0); // incarnation
        buf.write_opaque(self.items)?;
        buf.write_u32(info::BUFFER_LENGTH);
        Ok(buf.freeze())
    }
}

/// `op_execute`, or `op_execute2` when an output message is requested
#[derive(Debug)]
pub(crate) struct ExecuteMessage<'a> {
    statement: u32,
    transaction: u32,
    params: &'a ParamMessage,
    output_blr: Option<&'a [u8]>,
}

impl<'a> ExecuteMessage<'a> {
    pub(crate) fn new(statement: u32, transaction: u32, params: &'a ParamMessage) -> Self {
        Self {
            statement,
            transaction,
            params,
            output_blr: None,
        }
    }

    /// Request the singleton output row described by `blr`
    pub(crate) fn with_output(mut self, blr: &'a [u8]) -> Self {
        self.output_blr = Some(blr);
        self
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let op = match self.output_blr {
            Some(_) => Operation::Execute2,
            None => Operation::Execute,
        };
        let mut buf = WriteBuffer::with_capacity(
            32 + self.params.blr().len() + self.params.data().len(),
        );
        buf.write_u32(op as u32);
        buf.write_u32(self.statement);
        buf.write_u32(self.transaction);
        buf.write_opaque(self.params.blr())?;
        buf.write_u32(0); // message number
        if self.params.is_empty() {
            buf.write_u32(0);
        } else {
            buf.write_u32(1);
            buf.write_fixed_opaque(self.params.data());
        }
        if let Some(blr) = self.output_blr {
            buf.write_opaque(blr)?;
            buf.write_u32(0); // output message number
        }
        Ok(buf.freeze())
    }
}

/// `op_fetch`
#[derive(Debug)]
pub(crate) struct FetchMessage<'a> {
    statement: u32,
    blr: &'a [u8],
    count: u32,
}

impl<'a> FetchMessage<'a> {
    pub(crate) fn new(statement: u32, blr: &'a [u8], count: u32) -> Self {
        Self {
            statement,
            blr,
            count,
        }
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(20 + self.blr.len());
        buf.write_u32(Operation::Fetch as u32);
        buf.write_u32(self.statement);
        buf.write_opaque(self.blr)?;
        buf.write_u32(0); // message number
        buf.write_u32(self.count);
        Ok(buf.freeze())
    }
}

/// `op_free_statement` with `DSQL_close` or `DSQL_drop`
#[derive(Debug)]
pub(crate) struct FreeStatementMessage {
    statement: u32,
    option: u32,
}

impl FreeStatementMessage {
    pub(crate) fn new(statement: u32, option: u32) -> Self {
        Self { statement, option }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(12);
        buf.write_u32(Operation::FreeStatement as u32);
        buf.write_u32(self.statement);
        buf.write_u32(self.option);
        buf.freeze()
    }
}

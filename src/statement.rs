//! SQL statement handling
//!
//! A [`Statement`] is a prepared server-side statement handle together with
//! the description the server returned for it. Its cursor moves through
//!
//! ```text
//! prepared --execute--> open --fetch*--> exhausted
//!     ^                   |                  |
//!     +------close--------+------------------+
//! ```
//!
//! and [`Statement::drop_statement`] releases the handle for good. Cursor
//! state lives in the connection's handle registry, so every clone of a
//! statement sees the same state and a transaction end can reset it.

use std::sync::Arc;

use crate::connection::Connection;
use crate::constants::{dsql, info, sql_type, stmt_type};
use crate::error::{Error, Result};
use crate::handles::{CursorState, Handle};
use crate::messages::{
    describe_items, output_blr, AllocateStatementMessage, DescribeInfo, ExecuteMessage,
    FetchMessage, FreeStatementMessage, InfoSqlMessage, ParamMessage, PrepareMessage,
    RecordCounts, Reply, Request,
};
use crate::row::{convert_row, shape_row, Row, Value, WireValue};
use crate::transaction::Transaction;

/// Rounds of `op_info_sql` allowed to complete one statement description
const MAX_DESCRIBE_ROUNDS: usize = 64;

/// Statement type reported by the server at prepare time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// SELECT
    Select,
    /// SELECT ... FOR UPDATE
    SelectForUpdate,
    /// INSERT
    Insert,
    /// UPDATE
    Update,
    /// DELETE
    Delete,
    /// DDL: CREATE, ALTER, DROP, etc.
    Ddl,
    /// EXECUTE PROCEDURE
    ExecProcedure,
    /// SET GENERATOR
    SetGenerator,
    /// SAVEPOINT
    Savepoint,
    /// Transaction control statement (START, COMMIT, ROLLBACK)
    TransactionControl,
    /// Any other code
    #[default]
    Unknown,
}

impl StatementType {
    /// Map an `isc_info_sql_stmt_type` code
    pub fn from_code(code: u32) -> Self {
        match code {
            stmt_type::SELECT => StatementType::Select,
            stmt_type::SELECT_FOR_UPDATE => StatementType::SelectForUpdate,
            stmt_type::INSERT => StatementType::Insert,
            stmt_type::UPDATE => StatementType::Update,
            stmt_type::DELETE => StatementType::Delete,
            stmt_type::DDL => StatementType::Ddl,
            stmt_type::EXEC_PROCEDURE => StatementType::ExecProcedure,
            stmt_type::SET_GENERATOR => StatementType::SetGenerator,
            stmt_type::SAVEPOINT => StatementType::Savepoint,
            stmt_type::START_TRANS | stmt_type::COMMIT | stmt_type::ROLLBACK => {
                StatementType::TransactionControl
            }
            _ => StatementType::Unknown,
        }
    }

    /// Check if executing this statement opens a cursor
    pub fn is_select(&self) -> bool {
        matches!(self, StatementType::Select | StatementType::SelectForUpdate)
    }

    /// Check if this is INSERT, UPDATE or DELETE
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            StatementType::Insert | StatementType::Update | StatementType::Delete
        )
    }

    /// Check if this is DDL
    pub fn is_ddl(&self) -> bool {
        *self == StatementType::Ddl
    }
}

/// Description of an output column or input parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnInfo {
    /// Column alias (the name rows are keyed by)
    pub alias: String,
    /// Source field name
    pub field: String,
    /// Source relation (table or view)
    pub relation: String,
    /// Owner of the relation
    pub owner: String,
    /// SQL type code, without the nullable bit
    pub sql_type: u16,
    /// Subtype; for text the low byte is the character set id
    pub subtype: i16,
    /// Decimal scale (zero or negative)
    pub scale: i16,
    /// Length in bytes
    pub length: u16,
    /// Whether the column accepts NULL
    pub nullable: bool,
}

impl ColumnInfo {
    /// Create a column with the given alias and SQL type
    pub fn new(alias: impl Into<String>, sql_type: u16) -> Self {
        Self {
            alias: alias.into(),
            sql_type,
            ..Self::default()
        }
    }

    /// Character set of a text column
    pub fn charset_id(&self) -> u16 {
        (self.subtype as u16) & 0xFF
    }

    /// Check if this column holds a blob reference
    pub fn is_blob(&self) -> bool {
        self.sql_type == sql_type::BLOB
    }

    /// Check if this is a text blob (subtype 1)
    pub fn is_text_blob(&self) -> bool {
        self.is_blob() && self.subtype == 1
    }

    /// Check if this is a scaled numeric
    pub fn is_numeric(&self) -> bool {
        self.scale != 0
            && matches!(
                self.sql_type,
                sql_type::SHORT | sql_type::LONG | sql_type::INT64
            )
    }
}

/// Outcome of [`Statement::execute`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecuteResult {
    /// Rows inserted, updated or deleted; `None` for other statement types
    pub rows_affected: Option<u64>,
    /// A cursor was opened and must be fetched or closed
    pub is_select: bool,
    /// Output row of `EXECUTE PROCEDURE`
    pub output: Option<Row>,
}

/// Rows returned by one [`Statement::fetch`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// Rows of this batch; `None` once the cursor has nothing more to give
    pub rows: Option<Vec<Row>>,
    /// `false` once the server has reported the end of the cursor
    pub fetched: bool,
}

/// What prepare returned for a statement handle
///
/// Held by the statement cache without a reference back to the connection.
#[derive(Debug)]
pub(crate) struct StatementInfo {
    handle: Handle,
    sql: String,
    plan: Option<String>,
    statement_type: StatementType,
    columns: Arc<[ColumnInfo]>,
    inputs: Vec<ColumnInfo>,
    output_blr: Vec<u8>,
}

/// A prepared statement.
///
/// Cheap to clone; clones share the server handle.
#[derive(Debug, Clone)]
pub struct Statement {
    conn: Connection,
    info: Arc<StatementInfo>,
}

impl Statement {
    /// Allocate a handle and prepare `sql` in `tx`
    pub(crate) async fn prepare(tx: &Transaction, sql: &str, want_plan: bool) -> Result<Self> {
        let conn = tx.connection().clone();
        tx.check_live()?;

        let payload = AllocateStatementMessage::new(conn.database_handle()).build_request();
        let allocated = conn.request(Request::response(payload)).await?.into_response()?;
        let handle = conn.registry().register_statement(allocated.handle);
        tracing::trace!(handle = allocated.handle, "statement allocated");

        match Self::describe(&conn, tx.handle(), handle, sql, want_plan).await {
            Ok(describe) => {
                let output_blr = match output_blr(&describe.outputs) {
                    Ok(blr) => blr,
                    Err(e) => {
                        Self::discard(&conn, handle).await;
                        return Err(e);
                    }
                };
                let info = StatementInfo {
                    handle,
                    sql: sql.to_string(),
                    plan: describe.plan,
                    statement_type: StatementType::from_code(describe.statement_type),
                    columns: describe.outputs.into(),
                    inputs: describe.inputs,
                    output_blr,
                };
                Ok(Self {
                    conn,
                    info: Arc::new(info),
                })
            }
            Err(e) => {
                if !e.is_fatal() {
                    Self::discard(&conn, handle).await;
                }
                Err(e)
            }
        }
    }

    async fn describe(
        conn: &Connection,
        tx: Handle,
        handle: Handle,
        sql: &str,
        want_plan: bool,
    ) -> Result<DescribeInfo> {
        let items = describe_items(want_plan);
        let payload =
            PrepareMessage::new(tx.id(), handle.id(), conn.config().dialect, sql, &items)
                .build_request()?;
        let prepared = conn.request(Request::response(payload)).await?.into_response()?;

        let mut describe = DescribeInfo::default();
        let mut next = describe.parse(&prepared.data)?;
        let mut rounds = 0;
        while let Some(items) = next {
            rounds += 1;
            if rounds > MAX_DESCRIBE_ROUNDS {
                return Err(Error::Protocol(
                    "statement description did not complete".to_string(),
                ));
            }
            let payload = InfoSqlMessage::new(handle.id(), &items).build_request()?;
            let info = conn.request(Request::response(payload)).await?.into_response()?;
            next = describe.parse(&info.data)?;
        }
        Ok(describe)
    }

    /// Rebuild a statement from its cached description
    pub(crate) fn from_info(conn: Connection, info: Arc<StatementInfo>) -> Self {
        Self { conn, info }
    }

    pub(crate) fn info(&self) -> &Arc<StatementInfo> {
        &self.info
    }

    /// Drop a handle whose prepare failed; errors are only logged
    async fn discard(conn: &Connection, handle: Handle) {
        let payload = FreeStatementMessage::new(handle.id(), dsql::DROP).build_request();
        match conn.request(Request::response(payload)).await.and_then(|r| r.into_response()) {
            Ok(_) => {}
            Err(e) => tracing::debug!(handle = handle.id(), error = %e, "drop after failed prepare"),
        }
        let _ = conn.registry().release_statement(handle);
    }

    /// Get the SQL text
    pub fn sql(&self) -> &str {
        &self.info.sql
    }

    /// Execution plan, when requested at prepare time
    pub fn plan(&self) -> Option<&str> {
        self.info.plan.as_deref()
    }

    /// Get the statement type
    pub fn statement_type(&self) -> StatementType {
        self.info.statement_type
    }

    /// Output column descriptors
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.info.columns
    }

    /// Input parameter descriptors
    pub fn inputs(&self) -> &[ColumnInfo] {
        &self.info.inputs
    }

    /// Server handle
    pub fn handle(&self) -> Handle {
        self.info.handle
    }

    /// Whether the statement still holds its server handle
    pub fn is_valid(&self) -> bool {
        self.conn.registry().check_statement(self.info.handle).is_ok()
    }

    /// Whether a cursor is open (fetched to the end or not)
    pub fn is_cursor_open(&self) -> bool {
        !matches!(
            self.conn.registry().cursor(self.info.handle),
            Ok(CursorState::Idle) | Err(_)
        )
    }

    fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        if !tx.connection().same_connection(&self.conn) {
            return Err(Error::InvalidHandle {
                kind: crate::handles::HandleKind::Transaction,
                handle: tx.handle().id(),
            });
        }
        tx.check_live()
    }

    /// Execute the statement in `tx` with positional `params`
    ///
    /// A cursor left open by an earlier execute is closed first. Text or
    /// bytes bound to a blob parameter are written to a new blob in `tx`.
    pub async fn execute(&self, tx: &Transaction, params: &[Value]) -> Result<ExecuteResult> {
        self.conn.registry().check_statement(self.info.handle)?;
        self.check_transaction(tx)?;
        if params.len() != self.info.inputs.len() {
            return Err(Error::ParameterCount {
                expected: self.info.inputs.len(),
                actual: params.len(),
            });
        }

        let mut values = Vec::with_capacity(params.len());
        for (value, input) in params.iter().zip(self.info.inputs.iter()) {
            let value = match value {
                Value::String(s) if input.is_blob() => Value::Blob(tx.write_blob(s.as_bytes()).await?),
                Value::Bytes(b) if input.is_blob() => Value::Blob(tx.write_blob(b).await?),
                other => other.clone(),
            };
            values.push(value);
        }
        let message = ParamMessage::encode(&values, self.conn.charset_id())?;

        let returns_row = self.info.statement_type == StatementType::ExecProcedure
            && !self.info.columns.is_empty();
        let mut execute = ExecuteMessage::new(self.info.handle.id(), tx.handle().id(), &message);
        if returns_row {
            execute = execute.with_output(&self.info.output_blr);
        }
        let payload = execute.build_request()?;

        // Close and execute are queued back to back under the registry lock.
        // The cursor state follows the queue, not the replies, so an execute
        // issued before an earlier one is answered still closes its cursor.
        let (close, executed, generation) = {
            let mut registry = self.conn.registry();
            let close = if registry.close_cursor(self.info.handle)? {
                tracing::trace!(handle = self.info.handle.id(), "closing open cursor before execute");
                let close = FreeStatementMessage::new(self.info.handle.id(), dsql::CLOSE).build_request();
                Some(self.conn.request(Request::response(close)))
            } else {
                None
            };
            let executed = if returns_row {
                self.conn
                    .request(Request::sql_response(payload, self.info.columns.clone()))
            } else {
                self.conn.request(Request::response(payload))
            };
            let generation = if self.info.statement_type.is_select() {
                Some(registry.open_cursor(self.info.handle, tx.handle())?)
            } else {
                None
            };
            (close, executed, generation)
        };

        let closed = match close {
            Some(close) => close.await.and_then(|reply| reply.into_response()).map(|_| ()),
            None => Ok(()),
        };
        let result = match executed.await {
            Ok(reply) => self.finish_execute(reply, returns_row).await,
            Err(e) => Err(e),
        };
        if let (Err(_), Some(generation)) = (&result, generation) {
            self.conn.registry().abandon_cursor(self.info.handle, generation);
        }
        match closed {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::debug!(handle = self.info.handle.id(), error = %e, "cursor close failed");
                result
            }
            Ok(()) => result,
        }
    }

    async fn finish_execute(&self, reply: Reply, returns_row: bool) -> Result<ExecuteResult> {
        let mut result = ExecuteResult::default();
        if returns_row {
            if let Some(raw) = reply.into_sql()? {
                result.output = Some(self.shape(raw)?);
            }
        } else {
            reply.into_response()?;
        }

        if self.info.statement_type.is_select() {
            result.is_select = true;
        } else if self.info.statement_type.is_dml() {
            let counts = self.record_counts().await?;
            result.rows_affected = Some(match self.info.statement_type {
                StatementType::Insert => counts.inserted,
                StatementType::Update => counts.updated,
                _ => counts.deleted,
            });
        }
        Ok(result)
    }

    async fn record_counts(&self) -> Result<RecordCounts> {
        let items = [info::SQL_RECORDS, info::END];
        let payload = InfoSqlMessage::new(self.info.handle.id(), &items).build_request()?;
        let reply = self.conn.request(Request::response(payload)).await?.into_response()?;
        RecordCounts::parse(&reply.data)
    }

    fn shape(&self, raw: Vec<WireValue>) -> Result<Row> {
        let config = self.conn.config();
        let values = convert_row(raw, &self.info.columns)?;
        Ok(shape_row(
            values,
            &self.info.columns,
            config.row_shape,
            config.lowercase_keys,
        ))
    }

    /// Fetch up to `count` rows (default [`Config::fetch_size`](crate::Config::fetch_size))
    ///
    /// Once the server reports the end of the cursor, `fetched` is `false`
    /// and every further call returns no rows without a round trip.
    pub async fn fetch(&self, tx: &Transaction, count: Option<u32>) -> Result<FetchResult> {
        let generation = match self.conn.registry().cursor_generation(self.info.handle)? {
            (CursorState::Idle, _) => return Err(Error::CursorClosed),
            (CursorState::Exhausted { .. }, _) => {
                return Ok(FetchResult {
                    rows: None,
                    fetched: false,
                })
            }
            (CursorState::Open { .. }, generation) => generation,
        };
        self.check_transaction(tx)?;

        let count = count.unwrap_or(self.conn.config().fetch_size).max(1);
        let payload = FetchMessage::new(self.info.handle.id(), &self.info.output_blr, count).build_request()?;
        let batch = self
            .conn
            .request(Request::fetch(payload, self.info.columns.clone()))
            .await?
            .into_fetch()?;

        if batch.exhausted {
            self.conn.registry().exhaust_cursor(self.info.handle, generation);
        }
        let rows = batch
            .rows
            .into_iter()
            .map(|raw| self.shape(raw))
            .collect::<Result<Vec<_>>>()?;
        tracing::trace!(
            handle = self.info.handle.id(),
            rows = rows.len(),
            exhausted = batch.exhausted,
            "fetched"
        );

        Ok(FetchResult {
            rows: if rows.is_empty() && batch.exhausted {
                None
            } else {
                Some(rows)
            },
            fetched: !batch.exhausted,
        })
    }

    /// Fetch every remaining row
    pub async fn fetch_all(&self, tx: &Transaction) -> Result<Vec<Row>> {
        let mut all = Vec::new();
        loop {
            let batch = self.fetch(tx, None).await?;
            if let Some(rows) = batch.rows {
                all.extend(rows);
            }
            if !batch.fetched {
                return Ok(all);
            }
        }
    }

    /// Close the cursor, keeping the statement prepared
    ///
    /// Closing a statement without an open cursor does nothing.
    pub async fn close(&self) -> Result<()> {
        let closing = {
            let mut registry = self.conn.registry();
            if !registry.close_cursor(self.info.handle)? {
                return Ok(());
            }
            let payload = FreeStatementMessage::new(self.info.handle.id(), dsql::CLOSE).build_request();
            self.conn.request(Request::response(payload))
        };
        closing.await?.into_response()?;
        Ok(())
    }

    /// Release the server handle; the statement cannot be used afterwards
    pub async fn drop_statement(&self) -> Result<()> {
        self.conn.registry().check_statement(self.info.handle)?;
        let payload = FreeStatementMessage::new(self.info.handle.id(), dsql::DROP).build_request();
        let reply = self.conn.request(Request::response(payload)).await;
        // The handle is gone either way once the request was answered
        if !matches!(&reply, Err(e) if e.is_fatal()) {
            let _ = self.conn.registry().release_statement(self.info.handle);
        }
        reply?.into_response()?;
        tracing::trace!(handle = self.info.handle.id(), "statement dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::charset;

    #[test]
    fn test_statement_type_codes() {
        assert_eq!(StatementType::from_code(1), StatementType::Select);
        assert!(StatementType::from_code(12).is_select());
        assert!(StatementType::from_code(2).is_dml());
        assert!(StatementType::from_code(5).is_ddl());
        assert_eq!(StatementType::from_code(8), StatementType::ExecProcedure);
        assert_eq!(StatementType::from_code(10), StatementType::TransactionControl);
        assert_eq!(StatementType::from_code(99), StatementType::Unknown);
    }

    #[test]
    fn test_column_info() {
        let mut column = ColumnInfo::new("NAME", sql_type::VARYING);
        column.subtype = 0x0104;
        assert_eq!(column.charset_id(), charset::UTF8);
        assert!(!column.is_blob());

        let mut memo = ColumnInfo::new("MEMO", sql_type::BLOB);
        memo.subtype = 1;
        assert!(memo.is_text_blob());

        let mut price = ColumnInfo::new("PRICE", sql_type::INT64);
        price.scale = -2;
        assert!(price.is_numeric());
    }
}

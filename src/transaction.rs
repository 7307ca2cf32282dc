//! Transactions
//!
//! A [`Transaction`] is a server transaction handle plus the isolation it was
//! started with. A plain [`commit`](Transaction::commit) or
//! [`rollback`](Transaction::rollback) releases the handle: open cursors and
//! blobs under it become invalid and every later use of the transaction is
//! rejected locally. The retaining variants keep the handle, the cursors and
//! the blobs valid and only start a fresh snapshot.

use std::borrow::Cow;

use crate::blob::BlobHandle;
use crate::connection::Connection;
use crate::constants::tpb;
use crate::error::Result;
use crate::handles::Handle;
use crate::messages::{Request, TransactionEndMessage, TransactionMessage};
use crate::row::{Row, Value};
use crate::statement::{ExecuteResult, Statement};
use crate::types::BlobId;

/// Transaction isolation, as an ordered transaction parameter block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Isolation(Cow<'static, [u8]>);

impl Isolation {
    /// Read committed, seeing the latest committed record versions
    pub const READ_UNCOMMITTED: Isolation = Isolation(Cow::Borrowed(&[
        tpb::VERSION3,
        tpb::WRITE,
        tpb::WAIT,
        tpb::READ_COMMITTED,
        tpb::REC_VERSION,
    ]));

    /// Read committed, waiting for uncommitted record versions
    pub const READ_COMMITTED: Isolation = Isolation(Cow::Borrowed(&[
        tpb::VERSION3,
        tpb::WRITE,
        tpb::WAIT,
        tpb::READ_COMMITTED,
        tpb::NO_REC_VERSION,
    ]));

    /// Snapshot (concurrency)
    pub const REPEATABLE_READ: Isolation =
        Isolation(Cow::Borrowed(&[tpb::VERSION3, tpb::WRITE, tpb::WAIT, tpb::CONCURRENCY]));

    /// Snapshot table stability (consistency)
    pub const SERIALIZABLE: Isolation =
        Isolation(Cow::Borrowed(&[tpb::VERSION3, tpb::WRITE, tpb::WAIT, tpb::CONSISTENCY]));

    /// Read-only read committed
    pub const READ_COMMITTED_READ_ONLY: Isolation = Isolation(Cow::Borrowed(&[
        tpb::VERSION3,
        tpb::READ,
        tpb::WAIT,
        tpb::READ_COMMITTED,
        tpb::NO_REC_VERSION,
    ]));

    /// Isolation from raw TPB codes, sent to the server as given
    pub fn custom(codes: Vec<u8>) -> Self {
        Isolation(Cow::Owned(codes))
    }

    /// The TPB codes
    pub fn codes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for Isolation {
    fn default() -> Self {
        Isolation::READ_COMMITTED
    }
}

/// A statement leased for one convenience call
struct Lease {
    statement: Statement,
    cached: bool,
}

/// A started transaction.
///
/// Cheap to clone; clones share the server handle.
#[derive(Debug, Clone)]
pub struct Transaction {
    conn: Connection,
    handle: Handle,
    isolation: Isolation,
}

impl Transaction {
    pub(crate) async fn start(conn: &Connection, isolation: Isolation) -> Result<Self> {
        let payload =
            TransactionMessage::new(conn.database_handle(), isolation.codes()).build_request()?;
        let response = conn.request(Request::response(payload)).await?.into_response()?;
        let handle = conn.registry().register_transaction(response.handle);
        tracing::trace!(connection = conn.id(), handle = response.handle, "transaction started");
        Ok(Self {
            conn: conn.clone(),
            handle,
            isolation,
        })
    }

    /// Connection the transaction runs on
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Server handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Isolation the transaction was started with
    pub fn isolation(&self) -> &Isolation {
        &self.isolation
    }

    /// Whether the handle is still live
    pub fn is_active(&self) -> bool {
        self.check_live().is_ok()
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        self.conn.registry().check_transaction(self.handle)
    }

    /// Commit and release the transaction
    pub async fn commit(&self) -> Result<()> {
        self.end(TransactionEndMessage::commit(self.handle.id(), false), false)
            .await?;
        self.conn.events().emit_commit();
        Ok(())
    }

    /// Commit, keeping the handle and its cursors usable
    pub async fn commit_retaining(&self) -> Result<()> {
        self.end(TransactionEndMessage::commit(self.handle.id(), true), true)
            .await?;
        self.conn.events().emit_commit();
        Ok(())
    }

    /// Roll back and release the transaction
    pub async fn rollback(&self) -> Result<()> {
        self.end(TransactionEndMessage::rollback(self.handle.id(), false), false)
            .await?;
        self.conn.events().emit_rollback();
        Ok(())
    }

    /// Roll back, keeping the handle usable
    pub async fn rollback_retaining(&self) -> Result<()> {
        self.end(TransactionEndMessage::rollback(self.handle.id(), true), true)
            .await?;
        self.conn.events().emit_rollback();
        Ok(())
    }

    async fn end(&self, message: TransactionEndMessage, retaining: bool) -> Result<()> {
        self.check_live()?;
        self.conn
            .request(Request::response(message.build_request()))
            .await?
            .into_response()?;
        if !retaining {
            self.conn.registry().end_transaction(self.handle)?;
        }
        tracing::trace!(
            connection = self.conn.id(),
            handle = self.handle.id(),
            retaining = retaining,
            "transaction ended"
        );
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Prepare `sql` in this transaction
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        Statement::prepare(self, sql, false).await
    }

    /// Prepare `sql` and ask the server for its execution plan
    pub async fn prepare_with_plan(&self, sql: &str) -> Result<Statement> {
        Statement::prepare(self, sql, true).await
    }

    /// Run `sql` and fetch every row it returns
    ///
    /// Fires a `row` event per row and one `result` event on the owning
    /// database. Statements that return nothing yield an empty vector and
    /// a `result` event without rows.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let lease = self.lease(sql).await?;
        let result = self.run_query(&lease.statement, params).await;
        self.give_back(lease, sql).await;
        result
    }

    async fn run_query(&self, statement: &Statement, params: &[Value]) -> Result<Vec<Row>> {
        let executed = statement.execute(self, params).await?;
        let events = self.conn.events();
        let shape = self.conn.config().row_shape;

        if !executed.is_select {
            let rows = executed.output.map(|row| vec![row]);
            if let Some(rows) = &rows {
                for (index, row) in rows.iter().enumerate() {
                    events.emit_row(row, index, shape);
                }
            }
            events.emit_result(rows.as_deref());
            return Ok(rows.unwrap_or_default());
        }

        let mut rows = Vec::new();
        loop {
            let batch = statement.fetch(self, None).await?;
            for row in batch.rows.into_iter().flatten() {
                events.emit_row(&row, rows.len(), shape);
                rows.push(row);
            }
            if !batch.fetched {
                break;
            }
        }
        events.emit_result(Some(&rows));
        Ok(rows)
    }

    /// Run `sql` without fetching
    ///
    /// A cursor opened by a SELECT is closed straight away.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let lease = self.lease(sql).await?;
        let result: Result<ExecuteResult> = async {
            let result = lease.statement.execute(self, params).await?;
            if result.is_select {
                lease.statement.close().await?;
            }
            Ok(result)
        }
        .await;
        self.give_back(lease, sql).await;
        result
    }

    /// Run `sql` and hand each row to `on_row` as it is fetched
    ///
    /// Rows are not collected. An error from `on_row` stops the fetch, closes
    /// the cursor and is returned. Returns the number of rows seen.
    pub async fn sequentially<F>(&self, sql: &str, params: &[Value], mut on_row: F) -> Result<u64>
    where
        F: FnMut(Row, usize) -> Result<()> + Send,
    {
        let lease = self.lease(sql).await?;
        let result: Result<u64> = async {
            let executed = lease.statement.execute(self, params).await?;
            if !executed.is_select {
                return match executed.output {
                    Some(row) => on_row(row, 0).map(|_| 1),
                    None => Ok(0),
                };
            }
            let events = self.conn.events();
            let shape = self.conn.config().row_shape;
            let mut seen = 0usize;
            loop {
                let batch = lease.statement.fetch(self, None).await?;
                for row in batch.rows.into_iter().flatten() {
                    events.emit_row(&row, seen, shape);
                    if let Err(e) = on_row(row, seen) {
                        lease.statement.close().await?;
                        return Err(e);
                    }
                    seen += 1;
                }
                if !batch.fetched {
                    return Ok(seen as u64);
                }
            }
        }
        .await;
        self.give_back(lease, sql).await;
        result
    }

    async fn lease(&self, sql: &str) -> Result<Lease> {
        self.check_live()?;
        let hit = self.conn.statement_cache().get(sql);
        if let Some(info) = hit {
            let statement = Statement::from_info(self.conn.clone(), info);
            if statement.is_valid() {
                return Ok(Lease {
                    statement,
                    cached: true,
                });
            }
            self.conn.statement_cache().remove(sql);
        }
        let statement = Statement::prepare(self, sql, false).await?;
        Ok(Lease {
            statement,
            cached: false,
        })
    }

    async fn give_back(&self, lease: Lease, sql: &str) {
        let Lease { statement, cached } = lease;
        if cached {
            self.conn.statement_cache().return_statement(sql);
            return;
        }
        if !statement.is_valid() {
            return;
        }
        let surplus = if statement.statement_type().is_ddl() {
            Some(statement.info().clone())
        } else {
            self.conn
                .statement_cache()
                .put(sql.to_string(), statement.info().clone(), false)
        };
        if let Some(info) = surplus {
            let surplus = Statement::from_info(self.conn.clone(), info);
            if let Err(e) = surplus.drop_statement().await {
                tracing::debug!(error = %e, "failed to drop uncached statement");
            }
        }
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    /// Open an existing blob for reading
    pub async fn open_blob(&self, blob_id: BlobId) -> Result<BlobHandle> {
        BlobHandle::open(self, blob_id).await
    }

    /// Create a new blob for writing
    pub async fn create_blob(&self) -> Result<BlobHandle> {
        BlobHandle::create(self).await
    }

    /// Read a whole blob
    pub async fn read_blob(&self, blob_id: BlobId) -> Result<Vec<u8>> {
        let blob = self.open_blob(blob_id).await?;
        let data = blob.read_to_end().await;
        let closed = blob.close().await;
        let data = data?;
        closed?;
        Ok(data)
    }

    /// Write `data` to a new blob and return its id
    ///
    /// The id can be bound as a parameter of a blob column in this
    /// transaction.
    pub async fn write_blob(&self, data: &[u8]) -> Result<BlobId> {
        let blob = self.create_blob().await?;
        if let Err(e) = blob.put(data).await {
            if !e.is_fatal() {
                let _ = blob.cancel().await;
            }
            return Err(e);
        }
        blob.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_presets() {
        assert_eq!(Isolation::default(), Isolation::READ_COMMITTED);
        assert_eq!(Isolation::READ_COMMITTED.codes(), &[3, 9, 6, 15, 18]);
        assert_eq!(Isolation::READ_UNCOMMITTED.codes(), &[3, 9, 6, 15, 17]);
        assert_eq!(Isolation::REPEATABLE_READ.codes(), &[3, 9, 6, 2]);
        assert_eq!(Isolation::SERIALIZABLE.codes(), &[3, 9, 6, 1]);
        assert_eq!(Isolation::READ_COMMITTED_READ_ONLY.codes(), &[3, 8, 6, 15, 18]);
    }

    #[test]
    fn test_custom_isolation() {
        let iso = Isolation::custom(vec![tpb::VERSION3, tpb::READ, tpb::NOWAIT, tpb::CONCURRENCY]);
        assert_eq!(iso.codes(), &[3, 8, 7, 2]);
        assert_ne!(iso, Isolation::REPEATABLE_READ);
    }
}

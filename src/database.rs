//! Database handle
//!
//! [`Database`] is what applications hold: one [`Connection`] plus the event
//! hub that reports what happens on it. Convenience calls run in an implicit
//! read-committed transaction that is committed on success and rolled back
//! on error.
//!
//! # Example
//!
//! ```rust,no_run
//! use firebird_rs::{Config, Database, Value};
//!
//! # async fn example() -> firebird_rs::Result<()> {
//! let config: Config = "localhost:/data/app.fdb".parse()?;
//! let db = Database::attach(config).await?;
//!
//! db.on_error(|e| eprintln!("connection failed: {}", e));
//!
//! db.execute("INSERT INTO users (name) VALUES (?)", &[Value::from("Ada")]).await?;
//! for row in db.query("SELECT id, name FROM users", &[]).await? {
//!     println!("{}", row.to_json());
//! }
//! db.detach().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{RwLock, RwLockReadGuard};

use crate::config::Config;
use crate::connection::Connection;
use crate::constants::gds;
use crate::error::{Error, Result};
use crate::events::{Events, RowEvent};
use crate::row::{Row, Value};
use crate::statement::ExecuteResult;
use crate::transaction::{Isolation, Transaction};
use crate::transport::Transport;

/// An attached database and its event hub
#[derive(Debug)]
pub struct Database {
    conn: RwLock<Connection>,
    config: Config,
    events: Events,
}

impl Database {
    /// Attach to an existing database
    pub async fn attach(config: Config) -> Result<Self> {
        Self::open(config, Events::new(), false).await
    }

    /// Create a new database and attach to it
    pub async fn create(config: Config) -> Result<Self> {
        Self::open(config, Events::new(), true).await
    }

    /// Attach, creating the database first if the server cannot open it
    pub async fn attach_or_create(config: Config) -> Result<Self> {
        match Self::attach(config.clone()).await {
            Err(e) if is_missing_database(&e) => {
                tracing::debug!(database = %config.database, "database missing, creating");
                Self::create(config).await
            }
            result => result,
        }
    }

    /// Attach with listeners registered up front, so `attach` is observed
    pub async fn attach_with_events(config: Config, events: Events) -> Result<Self> {
        Self::open(config, events, false).await
    }

    /// Attach (or create) over an already connected transport
    pub async fn with_transport<T>(
        transport: T,
        config: Config,
        events: Events,
        create: bool,
    ) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let conn =
            Connection::open_with_transport(Box::new(transport), config.clone(), events.clone(), create)
                .await?;
        Ok(Self::from_connection(conn, config, events))
    }

    async fn open(config: Config, events: Events, create: bool) -> Result<Self> {
        let conn = Connection::open(config.clone(), events.clone(), create).await?;
        Ok(Self::from_connection(conn, config, events))
    }

    fn from_connection(conn: Connection, config: Config, events: Events) -> Self {
        events.emit_attach();
        Self {
            conn: RwLock::new(conn),
            config,
            events,
        }
    }

    fn current(&self) -> RwLockReadGuard<'_, Connection> {
        self.conn.read().unwrap_or_else(|e| e.into_inner())
    }

    /// The connection currently backing this database
    pub fn connection(&self) -> Connection {
        self.current().clone()
    }

    /// Configuration the database was attached with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The event hub
    pub fn events(&self) -> &Events {
        &self.events
    }

    /// Check if the underlying connection is closed
    pub fn is_closed(&self) -> bool {
        self.current().is_closed()
    }

    /// Render a value as a SQL literal
    pub fn escape(&self, value: &Value) -> Result<String> {
        crate::escape::escape(value)
    }

    /// Start an explicit transaction
    pub async fn transaction(&self, isolation: Isolation) -> Result<Transaction> {
        let tx = self.connection().start_transaction(isolation.clone()).await?;
        self.events.emit_transaction(Some(isolation));
        Ok(tx)
    }

    async fn implicit_transaction(&self) -> Result<Transaction> {
        let tx = self.connection().start_transaction(Isolation::default()).await?;
        self.events.emit_transaction(None);
        Ok(tx)
    }

    async fn finish_implicit<T>(&self, tx: Transaction, result: Result<T>) -> Result<T> {
        let error = match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(e) => e,
            },
            Err(e) => e,
        };
        if !error.is_fatal() && tx.is_active() {
            if let Err(rollback) = tx.rollback().await {
                tracing::debug!(error = %rollback, "implicit rollback failed");
            }
        }
        Err(error)
    }

    /// Run `sql` in an implicit transaction and return every row
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let tx = self.implicit_transaction().await?;
        let result = tx.query(sql, params).await;
        self.finish_implicit(tx, result).await
    }

    /// Run `sql` in an implicit transaction without fetching
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let tx = self.implicit_transaction().await?;
        let result = tx.execute(sql, params).await;
        self.finish_implicit(tx, result).await
    }

    /// Run `sql` in an implicit transaction, streaming rows to `on_row`
    pub async fn sequentially<F>(&self, sql: &str, params: &[Value], on_row: F) -> Result<u64>
    where
        F: FnMut(Row, usize) -> Result<()> + Send,
    {
        let tx = self.implicit_transaction().await?;
        let result = tx.sequentially(sql, params, on_row).await;
        self.finish_implicit(tx, result).await
    }

    /// Detach from the database
    pub async fn detach(&self) -> Result<()> {
        self.connection().detach().await?;
        self.events.emit_detach(false);
        Ok(())
    }

    /// Replace the connection with a freshly attached one
    ///
    /// Transactions, statements and blobs of the old connection stay invalid;
    /// nothing is re-sent.
    pub async fn reconnect(&self) -> Result<()> {
        let fresh = Connection::open(self.config.clone(), self.events.clone(), false).await?;
        let old = {
            let mut current = self.conn.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, fresh)
        };
        if let Err(e) = old.detach().await {
            tracing::debug!(connection = old.id(), error = %e, "detach of replaced connection failed");
        }
        tracing::debug!(database = %self.config.database, "reconnected");
        self.events.emit_attach();
        self.events.emit_reconnect();
        Ok(())
    }

    // =========================================================================
    // Event registration
    // =========================================================================

    /// Called for every row decoded by a query
    pub fn on_row<F>(&self, listener: F)
    where
        F: Fn(&RowEvent) + Send + Sync + 'static,
    {
        self.events.on_row(listener);
    }

    /// Called once per completed query
    pub fn on_result<F>(&self, listener: F)
    where
        F: Fn(Option<&[Row]>) + Send + Sync + 'static,
    {
        self.events.on_result(listener);
    }

    /// Called after attach and after a successful reconnect
    pub fn on_attach<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_attach(listener);
    }

    /// Called on detach; the flag is set for a release to a pool
    pub fn on_detach<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.events.on_detach(listener);
    }

    /// Called after [`Database::reconnect`]
    pub fn on_reconnect<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_reconnect(listener);
    }

    /// Called once when the connection fails
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.events.on_error(listener);
    }

    /// Called when a transaction starts; `None` for implicit transactions
    pub fn on_transaction<F>(&self, listener: F)
    where
        F: Fn(Option<&Isolation>) + Send + Sync + 'static,
    {
        self.events.on_transaction(listener);
    }

    /// Called after every commit
    pub fn on_commit<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_commit(listener);
    }

    /// Called after every rollback
    pub fn on_rollback<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_rollback(listener);
    }
}

/// The server could not open the database file
fn is_missing_database(error: &Error) -> bool {
    error
        .status()
        .map_or(false, |status| status.has_code(gds::IO_ERROR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StatusEntry, StatusVector};

    #[test]
    fn test_missing_database_detection() {
        let missing = Error::Server(StatusVector {
            entries: vec![
                StatusEntry {
                    code: gds::IO_ERROR,
                    args: vec!["open".into(), "/db/none.fdb".into()],
                },
                StatusEntry { code: 335544734, args: vec![] },
            ],
            ..Default::default()
        });
        assert!(is_missing_database(&missing));
        assert!(!is_missing_database(&Error::server(gds::LOGIN, vec![])));
        assert!(!is_missing_database(&Error::ConnectionClosed));
    }
}

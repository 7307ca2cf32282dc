#![warn(missing_docs)]

//! # firebird-rs
//!
//! A pure Rust client for Firebird databases, speaking the remote wire
//! protocol (versions 10 to 12) directly. No fbclient library required.
//!
//! ## Features
//!
//! - **Pure Rust** - No Firebird client library required
//! - **Async/await** - Built on Tokio for modern async applications
//! - **Ordered pipelining** - Requests from many tasks share one connection
//!   and are answered strictly in issue order
//! - **Statement Caching** - LRU cache for prepared statements
//! - **Blobs** - Segmented streaming reads and batched writes
//! - **Pooling** - Bounded pool with FIFO waiters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use firebird_rs::{Config, Value};
//!
//! #[tokio::main]
//! async fn main() -> firebird_rs::Result<()> {
//!     let config = Config::new("localhost", "/data/app.fdb", "SYSDBA", "masterkey");
//!     let db = firebird_rs::attach(config).await?;
//!
//!     let rows = db
//!         .query("SELECT id, name FROM users WHERE id > ?", &[Value::from(10)])
//!         .await?;
//!     for row in &rows {
//!         let id = row.get(0).and_then(|v| v.as_i64()).unwrap_or(0);
//!         let name = row.get(1).and_then(|v| v.as_str()).unwrap_or("");
//!         println!("User {}: {}", id, name);
//!     }
//!
//!     db.detach().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions and Cursors
//!
//! ```rust,no_run
//! use firebird_rs::{Database, Isolation, Value};
//!
//! # async fn example(db: Database) -> firebird_rs::Result<()> {
//! let tx = db.transaction(Isolation::REPEATABLE_READ).await?;
//! let stmt = tx.prepare("SELECT name FROM users ORDER BY id").await?;
//! stmt.execute(&tx, &[]).await?;
//! loop {
//!     let batch = stmt.fetch(&tx, Some(100)).await?;
//!     for row in batch.rows.unwrap_or_default() {
//!         println!("{}", row.to_json());
//!     }
//!     if !batch.fetched {
//!         break;
//!     }
//! }
//! stmt.drop_statement().await?;
//!
//! // Keep the handle, start a fresh snapshot
//! tx.commit_retaining().await?;
//! tx.execute("DELETE FROM audit WHERE ts < ?", &[Value::from("2020-01-01")]).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Data Types
//!
//! | Firebird Type | [`Value`] variant |
//! |---------------|-------------------|
//! | SMALLINT, INTEGER, BIGINT | `Integer(i64)` |
//! | NUMERIC, DECIMAL | `Numeric` (scaled `i64`) |
//! | FLOAT, DOUBLE PRECISION | `Float(f64)` |
//! | CHAR, VARCHAR | `String` |
//! | CHAR/VARCHAR CHARACTER SET OCTETS | `Bytes` |
//! | DATE, TIME, TIMESTAMP | `chrono::NaiveDate` / `NaiveTime` / `NaiveDateTime` |
//! | BOOLEAN | `Boolean` |
//! | BLOB, ARRAY | `Blob(BlobId)`, read with [`Transaction::read_blob`] |

pub mod blob;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod constants;
pub mod database;
pub mod error;
pub mod escape;
pub mod events;
pub mod handles;
pub mod messages;
pub mod pool;
pub mod row;
mod sequencer;
pub mod statement;
pub mod statement_cache;
pub mod transaction;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use blob::{BlobHandle, BlobSegment};
pub use config::Config;
pub use connection::Connection;
pub use database::Database;
pub use error::{Error, ErrorKind, Result, StatusEntry, StatusVector};
pub use escape::escape;
pub use events::{Events, RowEvent};
pub use handles::{BlobMode, Handle, HandleKind};
pub use messages::AcceptInfo;
pub use pool::{Connector, Pool, PoolStats};
pub use row::{Row, RowShape, Value};
pub use statement::{ColumnInfo, ExecuteResult, FetchResult, Statement, StatementType};
pub use statement_cache::StatementCache;
pub use transaction::{Isolation, Transaction};
pub use transport::{StreamTransport, TcpTransport, Transport};
pub use types::{BlobId, Numeric};

// Re-export serde_json for users rendering rows as JSON
pub use serde_json;

/// Attach to an existing database
pub async fn attach(config: Config) -> Result<Database> {
    Database::attach(config).await
}

/// Create a new database and attach to it
pub async fn create(config: Config) -> Result<Database> {
    Database::create(config).await
}

/// Attach to a database, creating it when it does not exist
pub async fn attach_or_create(config: Config) -> Result<Database> {
    Database::attach_or_create(config).await
}

/// Build a pool of at most `max` databases
pub fn pool(config: Config, max: usize) -> Pool {
    Pool::new(config, max)
}

//! Firebird database connection
//!
//! A [`Connection`] is one attachment over one socket. All of its traffic
//! goes through the connection's [`Sequencer`], so a `Connection` can be
//! cloned and used from several tasks at once: requests are answered in the
//! order they were issued.
//!
//! # Example
//!
//! ```rust,no_run
//! use firebird_rs::{Config, Connection, Isolation};
//!
//! # async fn example() -> firebird_rs::Result<()> {
//! let config = Config::new("localhost", "employee", "SYSDBA", "masterkey");
//! let conn = Connection::attach(config).await?;
//!
//! let tx = conn.start_transaction(Isolation::READ_COMMITTED).await?;
//! let rows = tx.query("SELECT 1 FROM RDB$DATABASE", &[]).await?;
//! assert_eq!(rows.len(), 1);
//! tx.commit().await?;
//!
//! conn.detach().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::error::Result;
use crate::events::Events;
use crate::handles::HandleRegistry;
use crate::messages::{
    AcceptInfo, AttachMessage, ConnectMessage, DetachMessage, DisconnectMessage, Reply, Request,
};
use crate::sequencer::Sequencer;
use crate::statement::{Statement, StatementInfo};
use crate::statement_cache::StatementCache;
use crate::transaction::{Isolation, Transaction};
use crate::transport::{TcpTransport, Transport};

// Connection ID counter
static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

struct ConnectionInner {
    id: u32,
    config: Config,
    charset_id: u16,
    protocol: AcceptInfo,
    /// Server handle of the attachment
    database: u32,
    sequencer: Sequencer,
    registry: Mutex<HandleRegistry>,
    cache: Mutex<StatementCache<Arc<StatementInfo>>>,
    events: Events,
    detached: AtomicBool,
}

/// An attachment to a Firebird database.
///
/// Cheap to clone; clones share the socket and its request queue.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Attach to an existing database
    pub async fn attach(config: Config) -> Result<Self> {
        Self::open(config, Events::new(), false).await
    }

    /// Create a new database and attach to it
    pub async fn create(config: Config) -> Result<Self> {
        Self::open(config, Events::new(), true).await
    }

    /// Attach (or create) over an already connected transport
    ///
    /// Mostly useful for tests and for tunnelling the protocol over
    /// something other than plain TCP.
    pub async fn with_transport<T>(transport: T, config: Config, create: bool) -> Result<Self>
    where
        T: Transport + 'static,
    {
        Self::open_with_transport(Box::new(transport), config, Events::new(), create).await
    }

    pub(crate) async fn open(config: Config, events: Events, create: bool) -> Result<Self> {
        let transport = TcpTransport::connect(&config.socket_addr(), config.connect_timeout).await?;
        Self::open_with_transport(Box::new(transport), config, events, create).await
    }

    pub(crate) async fn open_with_transport(
        transport: Box<dyn Transport>,
        config: Config,
        events: Events,
        create: bool,
    ) -> Result<Self> {
        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let charset_id = config.charset_id()?;
        let sequencer = Sequencer::spawn(transport, events.clone(), config.request_timeout, id);

        let host = local_host_name();
        let connect = ConnectMessage::new(&config.database, &config.user, &host).build_request()?;
        let protocol = sequencer.enqueue(Request::accept(connect)).await?.into_accept()?;
        tracing::debug!(
            connection = id,
            version = protocol.version & 0xFF,
            "protocol negotiated"
        );

        let attach = if create {
            AttachMessage::create(&config)
        } else {
            AttachMessage::attach(&config)
        };
        let attached = match attach.build_request() {
            Ok(payload) => sequencer
                .enqueue(Request::response(payload))
                .await
                .and_then(Reply::into_response),
            Err(e) => Err(e),
        };
        let database = match attached {
            Ok(response) => response.handle,
            Err(e) => {
                if !sequencer.is_closed() {
                    let _ = sequencer
                        .enqueue(Request::no_reply(DisconnectMessage.build_request()))
                        .await;
                }
                return Err(e);
            }
        };

        tracing::debug!(
            connection = id,
            database = %config.database,
            created = create,
            "attached"
        );

        let cache = StatementCache::new(config.statement_cache_size);
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id,
                config,
                charset_id,
                protocol,
                database,
                sequencer,
                registry: Mutex::new(HandleRegistry::new()),
                cache: Mutex::new(cache),
                events,
                detached: AtomicBool::new(false),
            }),
        })
    }

    /// Get the connection ID
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Configuration the connection was opened with
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Protocol parameters negotiated with the server
    pub fn protocol(&self) -> AcceptInfo {
        self.inner.protocol
    }

    /// Connection character set id
    pub fn charset_id(&self) -> u16 {
        self.inner.charset_id
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        self.inner.detached.load(Ordering::Acquire) || self.inner.sequencer.is_closed()
    }

    /// Number of live (transaction, statement, blob) handles
    pub fn live_handles(&self) -> (usize, usize, usize) {
        self.registry().counts()
    }

    pub(crate) fn database_handle(&self) -> u32 {
        self.inner.database
    }

    pub(crate) fn events(&self) -> &Events {
        &self.inner.events
    }

    pub(crate) fn same_connection(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue a request; its place in the queue is fixed before this returns
    pub(crate) fn request(&self, request: Request) -> impl Future<Output = Result<Reply>> + Send {
        self.inner.sequencer.enqueue(request)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, HandleRegistry> {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn statement_cache(&self) -> MutexGuard<'_, StatementCache<Arc<StatementInfo>>> {
        self.inner.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a transaction with the given isolation
    pub async fn start_transaction(&self, isolation: Isolation) -> Result<Transaction> {
        Transaction::start(self, isolation).await
    }

    /// Prepare `sql` in `tx`, optionally asking the server for the plan
    pub async fn prepare(&self, tx: &Transaction, sql: &str, want_plan: bool) -> Result<Statement> {
        Statement::prepare(tx, sql, want_plan).await
    }

    /// Detach from the database and close the socket
    ///
    /// Every handle issued on this connection becomes invalid. Detaching
    /// twice is a no-op.
    pub async fn detach(&self) -> Result<()> {
        if self.inner.detached.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Detaching frees every server statement with it
        self.statement_cache().clear();

        if self.inner.sequencer.is_closed() {
            self.registry().clear();
            return Ok(());
        }

        // Detach and disconnect go out back to back
        let detach = self.request(Request::response(
            DetachMessage::new(self.inner.database).build_request(),
        ));
        let disconnect = self.request(Request::no_reply(DisconnectMessage.build_request()));
        let detached = detach.await.and_then(Reply::into_response);
        if let Err(e) = disconnect.await {
            tracing::debug!(connection = self.id(), error = %e, "disconnect failed");
        }
        self.registry().clear();
        tracing::debug!(connection = self.id(), "detached");
        detached.map(|_| ())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("database", &self.inner.config.database)
            .field("protocol", &self.inner.protocol)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn local_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

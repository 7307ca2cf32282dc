//! Database pool
//!
//! Keeps at most `max` databases attached. [`Pool::acquire`] hands out an
//! idle database, attaches a new one while below the limit, and otherwise
//! queues the caller. Queued callers are served in FIFO order by
//! [`Pool::release`] and by slots freed through failed attaches.
//!
//! All bookkeeping sits behind one mutex that is never held across an await.
//!
//! # Example
//!
//! ```rust,no_run
//! use firebird_rs::{Config, Pool};
//!
//! # async fn example() -> firebird_rs::Result<()> {
//! let config = Config::new("localhost", "employee", "SYSDBA", "masterkey");
//! let pool = Pool::new(config, 4);
//!
//! let db = pool.acquire().await?;
//! let rows = db.query("SELECT 1 FROM RDB$DATABASE", &[]).await?;
//! pool.release(db);
//!
//! pool.destroy().await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::database::Database;
use crate::error::{Error, Result};

/// Opens the databases a [`Pool`] manages
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Attach one new database
    async fn connect(&self) -> Result<Database>;
}

#[async_trait]
impl Connector for Config {
    async fn connect(&self) -> Result<Database> {
        Database::attach(self.clone()).await
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Databases attached, idle or in use
    pub open: usize,
    /// Databases waiting in the pool
    pub idle: usize,
    /// Callers queued in `acquire`
    pub waiting: usize,
    /// Maximum databases configured
    pub max_size: usize,
    /// Databases attached over the pool's lifetime
    pub total_created: usize,
}

/// What a queued caller is woken with
enum Grant {
    /// A released database
    Database(Handoff),
    /// A free slot; the caller attaches a database into it
    Slot(SlotGuard),
}

type Waiter = oneshot::Sender<Result<Grant>>;

/// A database in transit to a queued caller
///
/// If the caller gave up before taking it, the database goes back to the pool.
struct Handoff {
    db: Option<Database>,
    pool: Arc<PoolInner>,
}

impl Handoff {
    fn take(mut self) -> Option<Database> {
        self.db.take()
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            hand_off(&self.pool, db);
        }
    }
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Database>,
    /// Attached plus being attached
    open: usize,
    waiters: VecDeque<Waiter>,
    closed: bool,
    total_created: usize,
}

struct PoolInner {
    connector: Box<dyn Connector>,
    max: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Give `db` to the oldest live waiter, else park it as idle
fn hand_off(inner: &Arc<PoolInner>, mut db: Database) {
    loop {
        let mut state = inner.lock();
        if state.closed {
            state.open = state.open.saturating_sub(1);
            drop(state);
            spawn_detach(db);
            return;
        }
        let waiter = match state.waiters.pop_front() {
            Some(waiter) => waiter,
            None => {
                state.idle.push_back(db);
                return;
            }
        };
        drop(state);

        let handoff = Handoff {
            db: Some(db),
            pool: inner.clone(),
        };
        match waiter.send(Ok(Grant::Database(handoff))) {
            Ok(()) => return,
            // Waiter gone; try the next one
            Err(Ok(Grant::Database(handoff))) => match handoff.take() {
                Some(back) => db = back,
                None => return,
            },
            Err(_) => return,
        }
    }
}

/// Release one slot and offer it to the oldest live waiter
///
/// The waiter attaches on its own task. A slot that is never claimed
/// frees itself again through its guard.
fn free_slot(inner: &Arc<PoolInner>) {
    let waiter = {
        let mut state = inner.lock();
        state.open = state.open.saturating_sub(1);
        if state.closed {
            return;
        }
        let mut next = None;
        while let Some(waiter) = state.waiters.pop_front() {
            if !waiter.is_closed() {
                next = Some(waiter);
                break;
            }
        }
        if next.is_some() {
            state.open += 1;
        }
        next
    };
    if let Some(waiter) = waiter {
        let guard = SlotGuard {
            inner: Some(inner.clone()),
        };
        // On failure the returned grant drops here and its guard frees the slot
        let _ = waiter.send(Ok(Grant::Slot(guard)));
    }
}

/// Detach `db` in the background
///
/// Outside a tokio runtime the database is dropped instead, which closes
/// its socket without a detach.
fn spawn_detach(db: Database) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(e) = db.connection().detach().await {
                    tracing::debug!(error = %e, "detach of pooled database failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!("no tokio runtime to detach pooled database, dropping it");
            drop(db);
        }
    }
}

/// Frees a reserved slot unless disarmed, so a dropped `acquire` leaks nothing
struct SlotGuard {
    inner: Option<Arc<PoolInner>>,
}

impl SlotGuard {
    fn disarm(mut self) {
        self.inner = None;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            free_slot(&inner);
        }
    }
}

/// Bounded pool of attached databases
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Pool of at most `max` databases attached with `config`
    pub fn new(config: Config, max: usize) -> Self {
        Self::with_connector(config, max)
    }

    /// Pool whose databases are opened by `connector`
    pub fn with_connector<C: Connector>(connector: C, max: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector: Box::new(connector),
                max: max.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Get a database, waiting in line when the pool is at its limit
    pub async fn acquire(&self) -> Result<Database> {
        enum Next {
            Ready(Database),
            Open,
            Wait(oneshot::Receiver<Result<Grant>>),
        }

        let next = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(Error::PoolClosed);
            }
            let mut ready = None;
            while let Some(db) = state.idle.pop_front() {
                if db.is_closed() {
                    state.open = state.open.saturating_sub(1);
                    continue;
                }
                ready = Some(db);
                break;
            }
            match ready {
                Some(db) => Next::Ready(db),
                None if state.open < self.inner.max => {
                    state.open += 1;
                    Next::Open
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    tracing::trace!(waiting = state.waiters.len(), "pool exhausted, queued");
                    Next::Wait(rx)
                }
            }
        };

        match next {
            Next::Ready(db) => Ok(db),
            Next::Open => {
                let guard = SlotGuard {
                    inner: Some(self.inner.clone()),
                };
                self.attach(guard).await
            }
            Next::Wait(rx) => match rx.await {
                Ok(Ok(Grant::Database(handoff))) => handoff.take().ok_or(Error::PoolClosed),
                Ok(Ok(Grant::Slot(guard))) => self.attach(guard).await,
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::PoolClosed),
            },
        }
    }

    /// Attach a database into the slot held by `guard`
    ///
    /// A failed attach drops the guard, which offers the slot to the next
    /// waiter.
    async fn attach(&self, guard: SlotGuard) -> Result<Database> {
        let db = match self.inner.connector.connect().await {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(error = %e, "pool attach failed");
                return Err(e);
            }
        };
        guard.disarm();
        let total = {
            let mut state = self.inner.lock();
            state.total_created += 1;
            state.open
        };
        tracing::debug!(open = total, "pool attached database");
        Ok(db)
    }

    /// Return a database to the pool
    ///
    /// Fires `detach` with the pooled flag set. A database whose connection
    /// has died gives its slot back instead.
    ///
    /// Does not need a tokio runtime, except that a database released into
    /// a destroyed pool is only detached cleanly when called inside one.
    pub fn release(&self, db: Database) {
        db.events().emit_detach(true);
        if db.is_closed() {
            tracing::debug!("released database is closed, freeing slot");
            drop(db);
            free_slot(&self.inner);
            return;
        }
        hand_off(&self.inner, db);
    }

    /// Close the pool
    ///
    /// Queued callers fail with [`Error::PoolClosed`] and idle databases are
    /// detached. Databases still in use are detached when released.
    pub async fn destroy(&self) {
        let (idle, waiters) = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<Database> = state.idle.drain(..).collect();
            state.open = state.open.saturating_sub(idle.len());
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
            (idle, waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(Err(Error::PoolClosed));
        }
        tracing::debug!(idle = idle.len(), "pool destroyed");
        for db in idle {
            if let Err(e) = db.detach().await {
                tracing::debug!(error = %e, "detach of idle database failed");
            }
        }
    }

    /// Get comprehensive pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            max_size: self.inner.max,
            total_created: state.total_created,
        }
    }

    /// Check if the pool is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

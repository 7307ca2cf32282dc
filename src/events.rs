//! Database notifications
//!
//! Each [`Database`](crate::Database) owns one [`Events`] hub. Listeners are
//! registered per event kind and called synchronously, in registration
//! order, on the task that produced the event. Listeners must not block.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Error;
use crate::row::{Row, RowShape};
use crate::transaction::Isolation;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One decoded row delivered to `row` listeners
#[derive(Debug, Clone)]
pub struct RowEvent {
    /// The row
    pub row: Row,
    /// Position of the row in its result, starting at 0
    pub index: usize,
    /// Shape the row was decoded with
    pub shape: RowShape,
}

struct Listeners<T> {
    list: Mutex<Vec<Listener<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            list: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Listeners<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<Listener<T>>> {
        self.list.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, listener: Listener<T>) {
        self.lock().push(listener);
    }

    fn emit(&self, value: &T) {
        // Snapshot so a listener may register further listeners
        let listeners: Vec<_> = self.lock().clone();
        for listener in listeners {
            listener(value);
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[derive(Default)]
struct EventsInner {
    row: Listeners<RowEvent>,
    result: Listeners<Option<Vec<Row>>>,
    attach: Listeners<()>,
    detach: Listeners<bool>,
    reconnect: Listeners<()>,
    error: Listeners<Error>,
    transaction: Listeners<Option<Isolation>>,
    commit: Listeners<()>,
    rollback: Listeners<()>,
}

/// Typed publish/subscribe hub for one database
#[derive(Clone, Default)]
pub struct Events {
    inner: Arc<EventsInner>,
}

impl Events {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// A row was decoded by a query
    pub fn on_row<F>(&self, listener: F)
    where
        F: Fn(&RowEvent) + Send + Sync + 'static,
    {
        self.inner.row.add(Arc::new(listener));
    }

    /// A query completed; `None` when the statement returns no rows
    pub fn on_result<F>(&self, listener: F)
    where
        F: Fn(Option<&[Row]>) + Send + Sync + 'static,
    {
        self.inner
            .result
            .add(Arc::new(move |rows: &Option<Vec<Row>>| listener(rows.as_deref())));
    }

    /// The database was attached (or created)
    pub fn on_attach<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.attach.add(Arc::new(move |_: &()| listener()));
    }

    /// The database was detached; the flag is set for a release to a pool
    pub fn on_detach<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.detach.add(Arc::new(move |pooled: &bool| listener(*pooled)));
    }

    /// The database was re-attached on a fresh connection
    pub fn on_reconnect<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.reconnect.add(Arc::new(move |_: &()| listener()));
    }

    /// The connection failed outside of any single call's control
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.error.add(Arc::new(listener));
    }

    /// A transaction was started; `None` for the implicit default
    pub fn on_transaction<F>(&self, listener: F)
    where
        F: Fn(Option<&Isolation>) + Send + Sync + 'static,
    {
        self.inner
            .transaction
            .add(Arc::new(move |iso: &Option<Isolation>| listener(iso.as_ref())));
    }

    /// A transaction was committed
    pub fn on_commit<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.commit.add(Arc::new(move |_: &()| listener()));
    }

    /// A transaction was rolled back
    pub fn on_rollback<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.rollback.add(Arc::new(move |_: &()| listener()));
    }

    pub(crate) fn has_row_listeners(&self) -> bool {
        self.inner.row.len() > 0
    }

    pub(crate) fn emit_row(&self, row: &Row, index: usize, shape: RowShape) {
        if self.has_row_listeners() {
            self.inner.row.emit(&RowEvent {
                row: row.clone(),
                index,
                shape,
            });
        }
    }

    pub(crate) fn emit_result(&self, rows: Option<&[Row]>) {
        if self.inner.result.len() > 0 {
            self.inner.result.emit(&rows.map(<[Row]>::to_vec));
        }
    }

    pub(crate) fn emit_attach(&self) {
        self.inner.attach.emit(&());
    }

    pub(crate) fn emit_detach(&self, pooled: bool) {
        self.inner.detach.emit(&pooled);
    }

    pub(crate) fn emit_reconnect(&self) {
        self.inner.reconnect.emit(&());
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        self.inner.error.emit(error);
    }

    pub(crate) fn emit_transaction(&self, isolation: Option<Isolation>) {
        self.inner.transaction.emit(&isolation);
    }

    pub(crate) fn emit_commit(&self) {
        self.inner.commit.emit(&());
    }

    pub(crate) fn emit_rollback(&self) {
        self.inner.rollback.emit(&());
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("row", &self.inner.row.len())
            .field("result", &self.inner.result.len())
            .field("error", &self.inner.error.len())
            .finish_non_exhaustive()
    }
}

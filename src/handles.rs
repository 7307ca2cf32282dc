//! Connection-scoped registry of server handles
//!
//! The server identifies transactions, statements and blobs by small integers
//! and recycles them as soon as they are released. Every live handle is
//! therefore registered together with a connection-local serial number; the
//! public objects keep the [`Handle`] they were given and every operation is
//! checked against the registry before a request is sent.
//!
//! Scope rules kept here:
//! - a non-retaining transaction end releases the transaction, every blob
//!   opened under it, and resets cursors opened under it
//! - a statement handle survives a cursor close but not a drop
//! - a blob handle dies on close/cancel or with its transaction

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Kind of server object a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Transaction handle
    Transaction,
    /// Statement handle
    Statement,
    /// Blob handle
    Blob,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Transaction => write!(f, "transaction"),
            HandleKind::Statement => write!(f, "statement"),
            HandleKind::Blob => write!(f, "blob"),
        }
    }
}

/// A server handle plus the serial it was registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u32,
    serial: u64,
}

impl Handle {
    /// Server-side handle number
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Cursor state of a prepared statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorState {
    /// No cursor open; the statement can be executed
    Idle,
    /// Cursor open under the given transaction and not yet exhausted
    Open { transaction: Handle },
    /// Server reported end of cursor; further fetches return nothing
    Exhausted { transaction: Handle },
}

/// Direction a blob handle was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    /// Opened with `op_open_blob`
    Read,
    /// Created with `op_create_blob2`
    Write,
}

#[derive(Debug)]
struct StatementEntry {
    serial: u64,
    cursor: CursorState,
    /// Bumped whenever a cursor is opened or closed
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BlobEntry {
    serial: u64,
    pub(crate) transaction: Handle,
    pub(crate) mode: BlobMode,
}

/// Arena of live handles for one connection
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    next_serial: u64,
    transactions: HashMap<u32, u64>,
    statements: HashMap<u32, StatementEntry>,
    blobs: HashMap<u32, BlobEntry>,
}

impl HandleRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, id: u32) -> Handle {
        self.next_serial += 1;
        Handle {
            id,
            serial: self.next_serial,
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub(crate) fn register_transaction(&mut self, id: u32) -> Handle {
        let handle = self.next(id);
        if self.transactions.insert(id, handle.serial).is_some() {
            tracing::warn!(handle = id, "server reused a live transaction handle");
        }
        handle
    }

    pub(crate) fn check_transaction(&self, handle: Handle) -> Result<()> {
        match self.transactions.get(&handle.id) {
            Some(&serial) if serial == handle.serial => Ok(()),
            _ => Err(invalid(HandleKind::Transaction, handle)),
        }
    }

    /// Release a transaction after a non-retaining commit or rollback
    pub(crate) fn end_transaction(&mut self, handle: Handle) -> Result<()> {
        self.check_transaction(handle)?;
        self.transactions.remove(&handle.id);
        self.blobs.retain(|_, blob| blob.transaction != handle);
        for entry in self.statements.values_mut() {
            match entry.cursor {
                CursorState::Open { transaction } | CursorState::Exhausted { transaction }
                    if transaction == handle =>
                {
                    entry.cursor = CursorState::Idle;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    pub(crate) fn register_statement(&mut self, id: u32) -> Handle {
        let handle = self.next(id);
        self.statements.insert(
            id,
            StatementEntry {
                serial: handle.serial,
                cursor: CursorState::Idle,
                generation: 0,
            },
        );
        handle
    }

    fn statement(&self, handle: Handle) -> Result<&StatementEntry> {
        match self.statements.get(&handle.id) {
            Some(entry) if entry.serial == handle.serial => Ok(entry),
            _ => Err(Error::StatementDropped),
        }
    }

    pub(crate) fn check_statement(&self, handle: Handle) -> Result<()> {
        self.statement(handle).map(|_| ())
    }

    pub(crate) fn cursor(&self, handle: Handle) -> Result<CursorState> {
        self.statement(handle).map(|entry| entry.cursor)
    }

    #[cfg(test)]
    pub(crate) fn set_cursor(&mut self, handle: Handle, state: CursorState) -> Result<()> {
        self.statement_mut(handle)?.cursor = state;
        Ok(())
    }

    fn statement_mut(&mut self, handle: Handle) -> Result<&mut StatementEntry> {
        match self.statements.get_mut(&handle.id) {
            Some(entry) if entry.serial == handle.serial => Ok(entry),
            _ => Err(Error::StatementDropped),
        }
    }

    /// Cursor state plus the generation it belongs to
    pub(crate) fn cursor_generation(&self, handle: Handle) -> Result<(CursorState, u64)> {
        self.statement(handle).map(|entry| (entry.cursor, entry.generation))
    }

    /// Mark the cursor open as soon as its execute is queued
    ///
    /// Returns the generation of the new cursor.
    pub(crate) fn open_cursor(&mut self, handle: Handle, transaction: Handle) -> Result<u64> {
        let entry = self.statement_mut(handle)?;
        entry.generation += 1;
        entry.cursor = CursorState::Open { transaction };
        Ok(entry.generation)
    }

    /// Mark the cursor closed as soon as its close is queued
    ///
    /// Returns whether a cursor was open.
    pub(crate) fn close_cursor(&mut self, handle: Handle) -> Result<bool> {
        let entry = self.statement_mut(handle)?;
        if entry.cursor == CursorState::Idle {
            return Ok(false);
        }
        entry.generation += 1;
        entry.cursor = CursorState::Idle;
        Ok(true)
    }

    /// Reset a cursor whose execute failed, unless a later open or close
    /// already replaced it
    pub(crate) fn abandon_cursor(&mut self, handle: Handle, generation: u64) {
        if let Ok(entry) = self.statement_mut(handle) {
            if entry.generation == generation {
                entry.cursor = CursorState::Idle;
            }
        }
    }

    /// Record end of data for the cursor of `generation`
    pub(crate) fn exhaust_cursor(&mut self, handle: Handle, generation: u64) {
        if let Ok(entry) = self.statement_mut(handle) {
            if let (true, CursorState::Open { transaction }) =
                (entry.generation == generation, entry.cursor)
            {
                entry.cursor = CursorState::Exhausted { transaction };
            }
        }
    }

    pub(crate) fn release_statement(&mut self, handle: Handle) -> Result<()> {
        self.statement(handle)?;
        self.statements.remove(&handle.id);
        Ok(())
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    pub(crate) fn register_blob(&mut self, id: u32, transaction: Handle, mode: BlobMode) -> Handle {
        let handle = self.next(id);
        self.blobs.insert(
            id,
            BlobEntry {
                serial: handle.serial,
                transaction,
                mode,
            },
        );
        handle
    }

    pub(crate) fn blob(&self, handle: Handle) -> Result<BlobEntry> {
        match self.blobs.get(&handle.id) {
            Some(entry) if entry.serial == handle.serial => Ok(*entry),
            _ => Err(invalid(HandleKind::Blob, handle)),
        }
    }

    pub(crate) fn release_blob(&mut self, handle: Handle) -> Result<BlobEntry> {
        let entry = self.blob(handle)?;
        self.blobs.remove(&handle.id);
        Ok(entry)
    }

    /// Drop every handle, after the connection is gone
    pub(crate) fn clear(&mut self) {
        self.transactions.clear();
        self.statements.clear();
        self.blobs.clear();
    }

    /// Number of live (transaction, statement, blob) handles
    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        (self.transactions.len(), self.statements.len(), self.blobs.len())
    }
}

fn invalid(kind: HandleKind, handle: Handle) -> Error {
    Error::InvalidHandle {
        kind,
        handle: handle.id,
    }
}

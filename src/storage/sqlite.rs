//! SQLite storage handle.
//!
//! One long-lived connection shared by every store. Each mutation runs as a
//! single IMMEDIATE transaction under the connection lock, so concurrent
//! requests touching the same key or mapping row cannot interleave.

use crate::error::Result;
use crate::storage::schema::apply_schema;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Shared SQLite backend. Cloning is cheap and yields the same connection.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        // Default 5 second timeout
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5_000)))?;
        apply_schema(&conn)?;

        debug!(path = %path.display(), "Opened sync database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a read-only closure against the connection.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the closure.
    pub fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a mutation as one atomic unit.
    ///
    /// Begins an IMMEDIATE transaction, runs the closure and commits. The
    /// transaction is rolled back if the closure fails.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = f(&tx)?;
        tx.commit()?;

        trace!(op, "Committed mutation");
        Ok(result)
    }
}

/// Current time in Unix milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

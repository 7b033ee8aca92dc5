//! Raw snapshots of pulled tables.
//!
//! Every successful pull keeps the remote response as returned, tagged with
//! the run that fetched it. A table with no snapshot has never been pulled
//! (or was reset), so the next pull asks the remote for everything.

use crate::error::Result;
use crate::storage::sqlite::{SqliteStorage, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One stored pull response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub id: i64,
    pub table_name: String,
    pub run_id: String,
    pub payload: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    storage: SqliteStorage,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Store one pull response.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn store(&self, table: &str, run_id: &str, payload: &Value) -> Result<i64> {
        let now = now_ms();
        let id = self.storage.mutate("store_snapshot", |tx| {
            tx.execute(
                "INSERT INTO raw_snapshots (table_name, run_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![table, run_id, payload, now],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        debug!(table, run_id, id, "Snapshot stored");
        Ok(id)
    }

    /// Whether the table has any stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn has_snapshot(&self, table: &str) -> Result<bool> {
        self.storage.read(|conn| {
            Ok(conn
                .prepare("SELECT 1 FROM raw_snapshots WHERE table_name = ?1 LIMIT 1")?
                .exists([table])?)
        })
    }

    /// Most recent snapshot of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest(&self, table: &str) -> Result<Option<RawSnapshot>> {
        use rusqlite::OptionalExtension;

        self.storage.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, table_name, run_id, payload, created_at FROM raw_snapshots
                     WHERE table_name = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
                    [table],
                    |row| {
                        Ok(RawSnapshot {
                            id: row.get(0)?,
                            table_name: row.get(1)?,
                            run_id: row.get(2)?,
                            payload: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Delete every snapshot of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear(&self, table: &str) -> Result<usize> {
        self.storage.mutate("clear_snapshots", |tx| {
            Ok(tx.execute("DELETE FROM raw_snapshots WHERE table_name = ?1", [table])?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_latest_and_clear() {
        let store = SnapshotStore::new(SqliteStorage::open_memory().unwrap());
        assert!(!store.has_snapshot("SA1").unwrap());

        store.store("SA1", "run_1", &json!([{"A1_COD": "1"}])).unwrap();
        store.store("SA1", "run_2", &json!([{"A1_COD": "2"}])).unwrap();
        store.store("SB1", "run_3", &json!([])).unwrap();

        assert!(store.has_snapshot("SA1").unwrap());
        let latest = store.latest("SA1").unwrap().unwrap();
        assert_eq!(latest.run_id, "run_2");
        assert_eq!(latest.payload[0]["A1_COD"], "2");

        assert_eq!(store.clear("SA1").unwrap(), 2);
        assert!(!store.has_snapshot("SA1").unwrap());
        assert!(store.has_snapshot("SB1").unwrap());
    }
}

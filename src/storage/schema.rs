//! Database schema definitions.
//!
//! The engine owns its tables outright; nothing else writes to them.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the psync database.
///
/// Note: Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Mapping Store
-- ====================

-- Local key -> remote id, one row per (entity_type, local_key)
CREATE TABLE IF NOT EXISTS sync_mappings (
    entity_type TEXT NOT NULL,
    local_key TEXT NOT NULL,
    remote_id TEXT,
    snapshot_hash TEXT NOT NULL,
    extra TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (entity_type, local_key),
    CHECK (entity_type IN ('customer', 'sales_order'))
);

CREATE INDEX IF NOT EXISTS idx_sync_mappings_remote ON sync_mappings(entity_type, remote_id);

-- ====================
-- Idempotency Cache
-- ====================

-- owner is the token of the current reservation; complete and release match on it

CREATE TABLE IF NOT EXISTS idempotency_keys (
    key TEXT PRIMARY KEY,
    operation_kind TEXT NOT NULL,
    request_fingerprint TEXT NOT NULL,
    scope TEXT,
    state TEXT NOT NULL DEFAULT 'pending',
    owner TEXT NOT NULL,
    result TEXT,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    CHECK (state IN ('pending', 'completed')),
    CHECK (state = 'pending' OR result IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_idempotency_expires ON idempotency_keys(expires_at);
CREATE INDEX IF NOT EXISTS idx_idempotency_scope ON idempotency_keys(scope);

-- ====================
-- Run Ledger
-- ====================

-- status stays 'running' between begin and finish; only finished rows are listed
CREATE TABLE IF NOT EXISTS sync_runs (
    run_id TEXT PRIMARY KEY,
    operation_kind TEXT NOT NULL,
    target TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    items_total INTEGER NOT NULL DEFAULT 0,
    items_succeeded INTEGER NOT NULL DEFAULT 0,
    items_failed INTEGER NOT NULL DEFAULT 0,
    error_summary TEXT,
    item_errors TEXT NOT NULL DEFAULT '[]',
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    CHECK (status IN ('running', 'success', 'partial_failure', 'failed')),
    CHECK (items_succeeded + items_failed = items_total)
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at DESC);
CREATE INDEX IF NOT EXISTS idx_sync_runs_kind ON sync_runs(operation_kind, started_at DESC);

-- ====================
-- Raw Snapshots
-- ====================

-- Pulled payloads as returned by the remote, per table
CREATE TABLE IF NOT EXISTS raw_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_snapshots_table ON raw_snapshots(table_name, created_at DESC);
"#;

/// Apply the schema to the database.
///
/// It is idempotent because all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Set pragmas before schema creation
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("Failed to apply schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"sync_mappings".to_string()));
        assert!(tables.contains(&"idempotency_keys".to_string()));
        assert!(tables.contains(&"sync_runs".to_string()));
        assert!(tables.contains(&"raw_snapshots".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        apply_schema(&conn).expect("First apply failed");
        apply_schema(&conn).expect("Second apply failed");

        let versions: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_run_counts_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO sync_runs (run_id, operation_kind, items_total, items_succeeded, items_failed, started_at)
             VALUES ('r1', 'pull', 3, 1, 1, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_completed_key_requires_result() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO idempotency_keys
                (key, operation_kind, request_fingerprint, state, owner, created_at)
             VALUES ('k', 'pull', 'fp', 'completed', 'o', 0)",
            [],
        );
        assert!(result.is_err());
    }
}

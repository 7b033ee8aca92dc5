//! Append-only run ledger.
//!
//! `begin` inserts a `running` row; `finish` moves it to a terminal status
//! exactly once. Listing only ever returns finished rows.

use crate::error::{Error, Result};
use crate::model::{ItemError, OperationKind, RunCounts, RunFilter, RunStatus, SyncRunRecord};
use crate::storage::sqlite::{SqliteStorage, now_ms};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "run_id, operation_kind, target, started_at, finished_at, status, \
     items_total, items_succeeded, items_failed, error_summary, item_errors";

/// History of sync attempts.
#[derive(Debug, Clone)]
pub struct RunLedger {
    storage: SqliteStorage,
}

impl RunLedger {
    #[must_use]
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Open a run and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn begin(&self, kind: OperationKind, target: Option<&str>) -> Result<String> {
        let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
        let now = now_ms();

        self.storage.mutate("begin_run", |tx| {
            tx.execute(
                "INSERT INTO sync_runs (run_id, operation_kind, target, status, started_at)
                 VALUES (?1, ?2, ?3, 'running', ?4)",
                rusqlite::params![run_id, kind.as_str(), target, now],
            )?;
            Ok(())
        })?;

        debug!(%run_id, %kind, target, "Run started");
        Ok(run_id)
    }

    /// Close a run with its terminal status and counts.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` if the run does not exist or was already
    /// finished, or a storage error.
    pub fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        counts: RunCounts,
        error_summary: Option<&str>,
        item_errors: &[ItemError],
    ) -> Result<()> {
        let now = now_ms();
        let item_errors_json = serde_json::to_string(item_errors)?;

        let updated = self.storage.mutate("finish_run", |tx| {
            Ok(tx.execute(
                "UPDATE sync_runs
                 SET status = ?2, items_total = ?3, items_succeeded = ?4, items_failed = ?5,
                     error_summary = ?6, item_errors = ?7, finished_at = ?8
                 WHERE run_id = ?1 AND finished_at IS NULL",
                rusqlite::params![
                    run_id,
                    status.as_str(),
                    counts.total,
                    counts.succeeded,
                    counts.failed,
                    error_summary,
                    item_errors_json,
                    now
                ],
            )?)
        })?;

        if updated == 0 {
            return Err(Error::RunNotFound {
                id: run_id.to_string(),
            });
        }

        info!(
            run_id,
            %status,
            total = counts.total,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "Run finished"
        );
        Ok(())
    }

    /// Get one finished run.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, run_id: &str) -> Result<Option<SyncRunRecord>> {
        self.storage.read(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM sync_runs
                         WHERE run_id = ?1 AND finished_at IS NOT NULL"
                    ),
                    [run_id],
                    map_run,
                )
                .optional()?)
        })
    }

    /// List finished runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, filter: &RunFilter) -> Result<Vec<SyncRunRecord>> {
        let mut conditions = vec!["finished_at IS NOT NULL".to_string()];
        let mut params: Vec<String> = Vec::new();

        if let Some(kind) = filter.operation_kind {
            params.push(kind.as_str().to_string());
            conditions.push(format!("operation_kind = ?{}", params.len()));
        }
        if let Some(status) = filter.status {
            params.push(status.as_str().to_string());
            conditions.push(format!("status = ?{}", params.len()));
        }

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_runs
             WHERE {}
             ORDER BY started_at DESC, rowid DESC
             LIMIT {} OFFSET {}",
            conditions.join(" AND "),
            filter.limit,
            filter.offset
        );

        self.storage.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map_run)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<SyncRunRecord> {
    let kind: String = row.get(1)?;
    let status: String = row.get(5)?;
    let item_errors: String = row.get(10)?;

    Ok(SyncRunRecord {
        run_id: row.get(0)?,
        operation_kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into())
        })?,
        target: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into())
        })?,
        items_total: row.get(6)?,
        items_succeeded: row.get(7)?,
        items_failed: row.get(8)?,
        error_summary: row.get(9)?,
        item_errors: serde_json::from_str(&item_errors)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RunLedger {
        RunLedger::new(SqliteStorage::open_memory().unwrap())
    }

    fn counts(total: u32, succeeded: u32, failed: u32) -> RunCounts {
        RunCounts {
            total,
            succeeded,
            failed,
        }
    }

    #[test]
    fn test_begin_and_finish() {
        let ledger = ledger();
        let run_id = ledger.begin(OperationKind::Pull, Some("SA1")).unwrap();
        assert!(run_id.starts_with("run_"));

        // Running rows are never exposed
        assert!(ledger.get(&run_id).unwrap().is_none());
        assert!(ledger.list(&RunFilter::default()).unwrap().is_empty());

        ledger
            .finish(&run_id, RunStatus::Success, counts(1, 1, 0), None, &[])
            .unwrap();

        let run = ledger.get(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.target.as_deref(), Some("SA1"));
        assert_eq!(run.items_total, run.items_succeeded + run.items_failed);
        assert!(run.finished_at >= run.started_at);
    }

    #[test]
    fn test_finish_is_final() {
        let ledger = ledger();
        let run_id = ledger.begin(OperationKind::Pull, None).unwrap();
        ledger
            .finish(&run_id, RunStatus::Failed, counts(1, 0, 1), Some("down"), &[])
            .unwrap();

        let err = ledger
            .finish(&run_id, RunStatus::Success, counts(1, 1, 0), None, &[])
            .unwrap_err();
        assert!(matches!(err, Error::RunNotFound { .. }));
        assert_eq!(ledger.get(&run_id).unwrap().unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_item_errors_round_trip() {
        let ledger = ledger();
        let run_id = ledger.begin(OperationKind::CreateSalesOrder, Some("sales_order")).unwrap();
        let errors = vec![ItemError {
            index: 1,
            local_key: Some("PED-2".into()),
            code: "REMOTE_REJECTED".into(),
            message: "produto bloqueado".into(),
            retryable: false,
        }];

        ledger
            .finish(
                &run_id,
                RunStatus::PartialFailure,
                counts(3, 2, 1),
                Some("item 1 (PED-2): REMOTE_REJECTED: produto bloqueado"),
                &errors,
            )
            .unwrap();

        let run = ledger.get(&run_id).unwrap().unwrap();
        assert_eq!(run.item_errors, errors);
    }

    #[test]
    fn test_list_filters_and_pages_newest_first() {
        let ledger = ledger();
        let mut ids = Vec::new();
        for kind in [OperationKind::Pull, OperationKind::ResetTable, OperationKind::Pull] {
            let id = ledger.begin(kind, Some("SA1")).unwrap();
            ledger
                .finish(&id, RunStatus::Success, counts(1, 1, 0), None, &[])
                .unwrap();
            ids.push(id);
        }

        let all = ledger.list(&RunFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].run_id, ids[2]);
        assert_eq!(all[2].run_id, ids[0]);

        let pulls = ledger
            .list(&RunFilter {
                operation_kind: Some(OperationKind::Pull),
                ..RunFilter::default()
            })
            .unwrap();
        assert_eq!(pulls.len(), 2);

        let page = ledger
            .list(&RunFilter {
                limit: 1,
                offset: 1,
                ..RunFilter::default()
            })
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].run_id, ids[1]);

        let failed = ledger
            .list(&RunFilter {
                status: Some(RunStatus::Failed),
                ..RunFilter::default()
            })
            .unwrap();
        assert!(failed.is_empty());
    }
}

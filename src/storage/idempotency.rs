//! Idempotency cache.
//!
//! A key moves through `pending` (reserved, work in flight) to `completed`
//! (result stored, replayable until `expires_at`). The reservation is the
//! serialization point: only one caller ever gets `Fresh` for a live key.
//!
//! A pending row older than the staleness threshold is treated as abandoned
//! by a crashed process and handed out again, so a crash between reserve and
//! complete never wedges a key permanently.
//!
//! Every reservation carries an owner token. Only the holder of the current
//! token can complete or release the row, so a slow caller whose reservation
//! was reclaimed cannot touch its successor's.

use crate::error::Result;
use crate::model::{OperationKind, SyncOutcome};
use crate::storage::sqlite::{SqliteStorage, now_ms};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time a completed result stays replayable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default age after which a pending reservation counts as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Expiry and reclaim thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    pub ttl: Duration,
    pub stale_after: Duration,
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Lifecycle state of a cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Completed,
}

impl RecordState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// One row of the idempotency cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation_kind: OperationKind,
    pub request_fingerprint: String,
    pub scope: Option<String>,
    pub state: RecordState,
    pub result: Option<SyncOutcome>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl IdempotencyRecord {
    fn is_expired(&self, now: i64) -> bool {
        self.state == RecordState::Completed && self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_stale(&self, now: i64, stale_after: Duration) -> bool {
        self.state == RecordState::Pending && now - self.created_at >= duration_ms(stale_after)
    }
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The caller owns the key and must perform the work, then `complete`
    /// or `release` it with this owner token.
    Fresh(String),
    /// The key already holds a result for the same request.
    Replay(SyncOutcome),
    /// The key was used for a different request.
    Conflict,
    /// Another caller holds a live reservation; try later.
    InProgress,
}

/// Persistent idempotency cache.
#[derive(Debug, Clone)]
pub struct IdempotencyCache {
    storage: SqliteStorage,
    policy: IdempotencyPolicy,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(storage: SqliteStorage, policy: IdempotencyPolicy) -> Self {
        Self { storage, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> IdempotencyPolicy {
        self.policy
    }

    /// Look up a key. Expired rows are deleted and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn lookup(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.lookup_at(key, now_ms())
    }

    /// [`lookup`](Self::lookup) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn lookup_at(&self, key: &str, now: i64) -> Result<Option<IdempotencyRecord>> {
        self.storage.mutate("idempotency_lookup", |tx| {
            match select_record(tx, key)? {
                Some(record) if record.is_expired(now) => {
                    tx.execute("DELETE FROM idempotency_keys WHERE key = ?1", [key])?;
                    debug!(key, "Expired idempotency record removed");
                    Ok(None)
                }
                other => Ok(other),
            }
        })
    }

    /// Atomically reserve a key for one execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn reserve(
        &self,
        key: &str,
        kind: OperationKind,
        fingerprint: &str,
        scope: Option<&str>,
    ) -> Result<Reservation> {
        self.reserve_at(key, kind, fingerprint, scope, now_ms())
    }

    /// [`reserve`](Self::reserve) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn reserve_at(
        &self,
        key: &str,
        kind: OperationKind,
        fingerprint: &str,
        scope: Option<&str>,
        now: i64,
    ) -> Result<Reservation> {
        let stale_after = self.policy.stale_after;

        self.storage.mutate("idempotency_reserve", |tx| {
            let existing = select_record(tx, key)?;

            let reclaim = match &existing {
                None => false,
                Some(record) if record.is_expired(now) => true,
                Some(record) if record.is_stale(now, stale_after) => {
                    warn!(
                        key,
                        reserved_at = record.created_at,
                        "Reclaiming abandoned reservation"
                    );
                    true
                }
                Some(record)
                    if record.request_fingerprint != fingerprint
                        || record.operation_kind != kind =>
                {
                    return Ok(Reservation::Conflict);
                }
                Some(record) => {
                    return Ok(match (record.state, &record.result) {
                        (RecordState::Completed, Some(result)) => {
                            Reservation::Replay(result.clone())
                        }
                        _ => Reservation::InProgress,
                    });
                }
            };

            if reclaim {
                tx.execute("DELETE FROM idempotency_keys WHERE key = ?1", [key])?;
            }

            let owner = uuid::Uuid::new_v4().simple().to_string();
            tx.execute(
                "INSERT INTO idempotency_keys
                    (key, operation_kind, request_fingerprint, scope, state, owner, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
                rusqlite::params![key, kind.as_str(), fingerprint, scope, owner, now],
            )?;
            debug!(key, %kind, "Idempotency key reserved");
            Ok(Reservation::Fresh(owner))
        })
    }

    /// Store the result for a reserved key and start its TTL.
    ///
    /// Returns `false` if `owner` no longer holds a pending reservation (it
    /// was released, or reclaimed as stale by another caller).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the update fails.
    pub fn complete(&self, key: &str, owner: &str, outcome: &SyncOutcome) -> Result<bool> {
        self.complete_at(key, owner, outcome, now_ms())
    }

    /// [`complete`](Self::complete) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the update fails.
    pub fn complete_at(
        &self,
        key: &str,
        owner: &str,
        outcome: &SyncOutcome,
        now: i64,
    ) -> Result<bool> {
        let result = serde_json::to_string(outcome)?;
        let expires_at = now + duration_ms(self.policy.ttl);

        let updated = self.storage.mutate("idempotency_complete", |tx| {
            Ok(tx.execute(
                "UPDATE idempotency_keys
                 SET state = ?3, result = ?4, expires_at = ?5
                 WHERE key = ?1 AND owner = ?2 AND state = 'pending'",
                rusqlite::params![
                    key,
                    owner,
                    RecordState::Completed.as_str(),
                    result,
                    expires_at
                ],
            )?)
        })?;

        if updated == 0 {
            warn!(key, "Reservation no longer held, outcome not stored");
        }
        Ok(updated > 0)
    }

    /// Drop a pending reservation so the request can be executed again.
    ///
    /// Only the current owner's reservation is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn release(&self, key: &str, owner: &str) -> Result<bool> {
        let removed = self.storage.mutate("idempotency_release", |tx| {
            Ok(tx.execute(
                "DELETE FROM idempotency_keys WHERE key = ?1 AND owner = ?2 AND state = 'pending'",
                [key, owner],
            )?)
        })?;
        debug!(key, removed, "Idempotency reservation released");
        Ok(removed > 0)
    }

    /// Remove every expired completed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(now_ms())
    }

    /// [`sweep_expired`](Self::sweep_expired) with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn sweep_expired_at(&self, now: i64) -> Result<usize> {
        let removed = self.storage.mutate("idempotency_sweep", |tx| {
            Ok(tx.execute(
                "DELETE FROM idempotency_keys WHERE state = 'completed' AND expires_at <= ?1",
                [now],
            )?)
        })?;
        if removed > 0 {
            info!(removed, "Swept expired idempotency records");
        }
        Ok(removed)
    }

    /// Remove completed records tagged with `scope` (cached pull results of a table).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_scope(&self, scope: &str) -> Result<usize> {
        self.storage.mutate("idempotency_purge_scope", |tx| {
            Ok(tx.execute(
                "DELETE FROM idempotency_keys WHERE scope = ?1 AND state = 'completed'",
                [scope],
            )?)
        })
    }
}

fn select_record(conn: &Connection, key: &str) -> Result<Option<IdempotencyRecord>> {
    let raw = conn
        .query_row(
            "SELECT key, operation_kind, request_fingerprint, scope, state, result, created_at, expires_at
             FROM idempotency_keys WHERE key = ?1",
            [key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                ))
            },
        )
        .optional()?;

    let Some((key, kind, fingerprint, scope, state, result, created_at, expires_at)) = raw else {
        return Ok(None);
    };

    let operation_kind = kind
        .parse::<OperationKind>()
        .map_err(crate::Error::Other)?;
    let state = if state == "completed" {
        RecordState::Completed
    } else {
        RecordState::Pending
    };
    let result = result
        .map(|text| serde_json::from_str::<SyncOutcome>(&text))
        .transpose()?;

    Ok(Some(IdempotencyRecord {
        key,
        operation_kind,
        request_fingerprint: fingerprint,
        scope,
        state,
        result,
        created_at,
        expires_at,
    }))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn duration_ms(d: Duration) -> i64 {
    d.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KIND: OperationKind = OperationKind::CreateOrUpdateCustomer;

    fn cache() -> IdempotencyCache {
        IdempotencyCache::new(SqliteStorage::open_memory().unwrap(), IdempotencyPolicy::default())
    }

    fn outcome(run_id: &str) -> SyncOutcome {
        SyncOutcome {
            run_id: run_id.to_string(),
            status: RunStatus::Success,
            data: serde_json::json!([{"local_key": "TESTE-001"}]),
            errors: Vec::new(),
        }
    }

    fn fresh(reservation: Reservation) -> String {
        match reservation {
            Reservation::Fresh(owner) => owner,
            other => panic!("expected fresh reservation, got {other:?}"),
        }
    }

    #[test]
    fn test_fresh_then_replay() {
        let cache = cache();
        let owner = fresh(cache.reserve("k1", KIND, "fp-x", None).unwrap());
        assert!(cache.complete("k1", &owner, &outcome("run_1")).unwrap());

        match cache.reserve("k1", KIND, "fp-x", None).unwrap() {
            Reservation::Replay(result) => assert_eq!(result, outcome("run_1")),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        let cache = cache();
        let first = fresh(cache.reserve("k1", KIND, "fp", None).unwrap());
        let second = fresh(cache.reserve("k2", KIND, "fp", None).unwrap());
        assert_ne!(first, second);
    }

    #[test]
    fn test_different_fingerprint_conflicts() {
        let cache = cache();
        let owner = fresh(cache.reserve("k1", KIND, "fp-x", None).unwrap());
        cache.complete("k1", &owner, &outcome("run_1")).unwrap();

        assert_eq!(cache.reserve("k1", KIND, "fp-y", None).unwrap(), Reservation::Conflict);

        // The original record is untouched
        let record = cache.lookup("k1").unwrap().unwrap();
        assert_eq!(record.request_fingerprint, "fp-x");
    }

    #[test]
    fn test_pending_conflict_with_other_payload() {
        let cache = cache();
        fresh(cache.reserve("k1", KIND, "fp-x", None).unwrap());
        assert_eq!(cache.reserve("k1", KIND, "fp-y", None).unwrap(), Reservation::Conflict);
    }

    #[test]
    fn test_same_key_other_operation_conflicts() {
        let cache = cache();
        fresh(cache.reserve("k1", KIND, "fp-x", None).unwrap());
        assert_eq!(
            cache
                .reserve("k1", OperationKind::CreateSalesOrder, "fp-x", None)
                .unwrap(),
            Reservation::Conflict
        );
    }

    #[test]
    fn test_live_pending_is_in_progress() {
        let cache = cache();
        fresh(cache.reserve_at("k1", KIND, "fp", None, 1_000).unwrap());
        assert_eq!(
            cache.reserve_at("k1", KIND, "fp", None, 2_000).unwrap(),
            Reservation::InProgress
        );
    }

    #[test]
    fn test_stale_pending_is_reclaimed() {
        let cache = cache();
        let stale_ms = duration_ms(DEFAULT_STALE_AFTER);

        fresh(cache.reserve_at("k1", KIND, "fp-x", None, 0).unwrap());
        // Even a different payload may take over an abandoned key
        fresh(cache.reserve_at("k1", KIND, "fp-y", None, stale_ms).unwrap());

        let record = cache.lookup_at("k1", stale_ms).unwrap().unwrap();
        assert_eq!(record.request_fingerprint, "fp-y");
        assert_eq!(record.created_at, stale_ms);
        assert_eq!(record.state, RecordState::Pending);
    }

    #[test]
    fn test_reclaimed_owner_cannot_complete() {
        let cache = cache();
        let stale_ms = duration_ms(DEFAULT_STALE_AFTER);

        let slow = fresh(cache.reserve_at("k1", KIND, "fp-x", None, 0).unwrap());
        let current = fresh(cache.reserve_at("k1", KIND, "fp-y", None, stale_ms).unwrap());

        assert!(!cache.complete_at("k1", &slow, &outcome("run_a"), stale_ms + 1).unwrap());
        assert!(cache.complete_at("k1", &current, &outcome("run_b"), stale_ms + 2).unwrap());

        match cache.reserve_at("k1", KIND, "fp-y", None, stale_ms + 3).unwrap() {
            Reservation::Replay(result) => assert_eq!(result.run_id, "run_b"),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn test_reclaimed_owner_cannot_release() {
        let cache = cache();
        let stale_ms = duration_ms(DEFAULT_STALE_AFTER);

        let slow = fresh(cache.reserve_at("k1", KIND, "fp-x", None, 0).unwrap());
        let current = fresh(cache.reserve_at("k1", KIND, "fp-x", None, stale_ms).unwrap());

        assert!(!cache.release("k1", &slow).unwrap());
        // The live reservation still blocks a third caller
        assert_eq!(
            cache.reserve_at("k1", KIND, "fp-x", None, stale_ms + 1).unwrap(),
            Reservation::InProgress
        );
        assert!(cache.release("k1", &current).unwrap());
    }

    #[test]
    fn test_expired_key_can_be_reused() {
        let cache = cache();
        let ttl_ms = duration_ms(DEFAULT_TTL);

        let owner = fresh(cache.reserve_at("k1", KIND, "fp-x", None, 0).unwrap());
        cache.complete_at("k1", &owner, &outcome("run_1"), 0).unwrap();

        assert!(cache.lookup_at("k1", ttl_ms - 1).unwrap().is_some());
        fresh(cache.reserve_at("k1", KIND, "fp-y", None, ttl_ms).unwrap());
    }

    #[test]
    fn test_lookup_removes_expired() {
        let cache = cache();
        let owner = fresh(cache.reserve_at("k1", KIND, "fp", None, 0).unwrap());
        cache.complete_at("k1", &owner, &outcome("run_1"), 0).unwrap();

        assert!(cache.lookup_at("k1", duration_ms(DEFAULT_TTL)).unwrap().is_none());
        // Gone for good, not just hidden
        assert!(cache.lookup_at("k1", 0).unwrap().is_none());
    }

    #[test]
    fn test_release_allows_retry() {
        let cache = cache();
        let owner = fresh(cache.reserve("k1", KIND, "fp", None).unwrap());
        assert!(cache.release("k1", &owner).unwrap());
        fresh(cache.reserve("k1", KIND, "fp", None).unwrap());
    }

    #[test]
    fn test_release_never_drops_completed() {
        let cache = cache();
        let owner = fresh(cache.reserve("k1", KIND, "fp", None).unwrap());
        cache.complete("k1", &owner, &outcome("run_1")).unwrap();
        assert!(!cache.release("k1", &owner).unwrap());
        assert!(cache.lookup("k1").unwrap().is_some());
    }

    #[test]
    fn test_complete_without_reservation() {
        let cache = cache();
        assert!(!cache.complete("missing", "nobody", &outcome("run_1")).unwrap());
    }

    #[test]
    fn test_sweep_and_purge_scope() {
        let cache = cache();
        let ttl_ms = duration_ms(DEFAULT_TTL);

        let owner = fresh(cache.reserve_at("old", KIND, "fp", None, 0).unwrap());
        cache.complete_at("old", &owner, &outcome("run_1"), 0).unwrap();
        for (key, table, run) in [("pull-sa1", "SA1", "run_2"), ("pull-sb1", "SB1", "run_3")] {
            let owner = fresh(
                cache
                    .reserve_at(key, OperationKind::Pull, "fp", Some(table), ttl_ms)
                    .unwrap(),
            );
            cache.complete_at(key, &owner, &outcome(run), ttl_ms).unwrap();
        }

        assert_eq!(cache.sweep_expired_at(ttl_ms).unwrap(), 1);
        assert_eq!(cache.purge_scope("SA1").unwrap(), 1);
        assert!(cache.lookup_at("pull-sa1", ttl_ms).unwrap().is_none());
        assert!(cache.lookup_at("pull-sb1", ttl_ms).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_reserve_yields_one_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psync.db");

        // Separate connections to one file, like separate worker processes
        let caches: Vec<IdempotencyCache> = (0..8)
            .map(|_| {
                IdempotencyCache::new(
                    SqliteStorage::open(&path).unwrap(),
                    IdempotencyPolicy::default(),
                )
            })
            .collect();

        let fresh = Arc::new(AtomicUsize::new(0));
        let in_progress = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = caches
            .into_iter()
            .map(|cache| {
                let fresh = Arc::clone(&fresh);
                let in_progress = Arc::clone(&in_progress);
                std::thread::spawn(move || {
                    match cache.reserve("shared", KIND, "fp", None).unwrap() {
                        Reservation::Fresh(_) => fresh.fetch_add(1, Ordering::SeqCst),
                        Reservation::InProgress => in_progress.fetch_add(1, Ordering::SeqCst),
                        other => panic!("unexpected reservation {other:?}"),
                    };
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fresh.load(Ordering::SeqCst), 1);
        assert_eq!(in_progress.load(Ordering::SeqCst), 7);
    }
}

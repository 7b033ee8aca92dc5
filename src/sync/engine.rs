//! Sync orchestrator.
//!
//! Each operation follows the same path:
//!
//! 1. validate the request ([`prepare`])
//! 2. reserve the idempotency key (replay, conflict and in-progress end here)
//! 3. open a run, do the remote work item by item, close the run
//! 4. store the outcome under the key, or release the key when resubmitting
//!    could still succeed
//!
//! No store lock is held across a remote call.

use crate::error::{Error, Result};
use crate::model::{
    EntityType, ItemError, MappingEntry, OperationKind, RunCounts, RunFilter, RunStatus,
    SyncOutcome, SyncResponse, SyncRunRecord,
};
use crate::remote::{RemoteClient, TableQuery};
use crate::storage::{
    IdempotencyCache, IdempotencyPolicy, MappingStore, Reservation, RunLedger, SnapshotStore,
    SqliteStorage,
};
use crate::sync::hash::{content_hash, derive_key, has_changed, request_fingerprint};
use crate::sync::request::{
    FilterRequest, Operation, PeriodRequest, Prepared, PullRequest, ResetRequest, Work,
    customer_key, order_key, prepare,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coordinates the stores and the remote client.
///
/// Cloning is cheap; clones share the database connection and the client.
pub struct SyncEngine<R> {
    remote: Arc<R>,
    mappings: MappingStore,
    cache: IdempotencyCache,
    ledger: RunLedger,
    snapshots: SnapshotStore,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            mappings: self.mappings.clone(),
            cache: self.cache.clone(),
            ledger: self.ledger.clone(),
            snapshots: self.snapshots.clone(),
        }
    }
}

/// Item results of one executed run.
#[derive(Debug, Default)]
struct Executed {
    counts: RunCounts,
    data: Value,
    errors: Vec<ItemError>,
    /// Set when a non-item failure stopped the run early.
    aborted: Option<String>,
}

impl Executed {
    fn item_ok(&mut self, items: &mut Vec<Value>, result: Value) {
        self.counts.record_success();
        items.push(result);
    }

    /// Count the items a stopped run never reached as failed, under the
    /// code of the error that stopped it.
    fn not_attempted(
        &mut self,
        records: &[Value],
        from: usize,
        key_of: fn(&Value) -> Option<String>,
    ) {
        let Some(cause) = self.errors.last().cloned() else {
            return;
        };
        for (index, record) in records.iter().enumerate().skip(from) {
            self.counts.record_failure();
            self.errors.push(ItemError {
                index,
                local_key: key_of(record),
                code: cause.code.clone(),
                message: format!("not attempted, run aborted at item {}", cause.index),
                retryable: cause.retryable,
            });
        }
    }

    /// Record a failed item. Returns `false` when the run must stop.
    fn item_failed(&mut self, index: usize, local_key: Option<&str>, err: &Error) -> bool {
        warn!(index, local_key, error = %err, "Item failed");
        self.counts.record_failure();
        self.errors.push(ItemError::from_error(index, local_key, err));
        if err.is_item_scoped() {
            true
        } else {
            self.aborted = Some(err.to_string());
            false
        }
    }
}

impl<R: RemoteClient + 'static> SyncEngine<R> {
    #[must_use]
    pub fn new(storage: SqliteStorage, remote: R, policy: IdempotencyPolicy) -> Self {
        Self {
            remote: Arc::new(remote),
            mappings: MappingStore::new(storage.clone()),
            cache: IdempotencyCache::new(storage.clone(), policy),
            ledger: RunLedger::new(storage.clone()),
            snapshots: SnapshotStore::new(storage),
        }
    }

    // ── Operations ────────────────────────────────────────────

    /// Fetch a whole table.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `IdempotencyConflict` or `InProgress` before any
    /// run starts, or a storage error.
    pub async fn pull(&self, req: PullRequest, key: Option<String>) -> Result<SyncResponse> {
        self.execute(Operation::Pull(req), key).await
    }

    /// Fetch the rows of a table matching a field value.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn pull_filtered(
        &self,
        req: FilterRequest,
        key: Option<String>,
    ) -> Result<SyncResponse> {
        self.execute(Operation::PullFiltered(req), key).await
    }

    /// Fetch sales orders (`SC5`) within a period.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn pull_orders(
        &self,
        req: PeriodRequest,
        key: Option<String>,
    ) -> Result<SyncResponse> {
        self.execute(Operation::PullOrders(req), key).await
    }

    /// Fetch invoices (`SF2`) within a period.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn pull_invoices(
        &self,
        req: PeriodRequest,
        key: Option<String>,
    ) -> Result<SyncResponse> {
        self.execute(Operation::PullInvoices(req), key).await
    }

    /// Drop a table's raw snapshots and cached pull results.
    ///
    /// Without an explicit key a reset is never deduplicated.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn reset_table(
        &self,
        req: ResetRequest,
        key: Option<String>,
    ) -> Result<SyncResponse> {
        self.execute(Operation::ResetTable(req), key).await
    }

    /// Create unseen customers, update changed ones, skip unchanged ones.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn create_or_update_customers(
        &self,
        body: Value,
        key: Option<String>,
    ) -> Result<SyncResponse> {
        self.execute(Operation::Customers(body), key).await
    }

    /// Create sales orders that are not mapped yet.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn create_sales_orders(
        &self,
        body: Value,
        key: Option<String>,
    ) -> Result<SyncResponse> {
        self.execute(Operation::SalesOrders(body), key).await
    }

    /// Run an operation on the runtime, detached from the caller.
    ///
    /// Dropping the handle does not cancel the work; the run and the cache
    /// entry are still committed.
    pub fn execute_detached(
        &self,
        op: Operation,
        key: Option<String>,
    ) -> JoinHandle<Result<SyncResponse>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.execute(op, key).await })
    }

    /// Run one operation end to end.
    ///
    /// # Errors
    ///
    /// See [`pull`](Self::pull).
    pub async fn execute(&self, op: Operation, key: Option<String>) -> Result<SyncResponse> {
        let prepared = prepare(op)?;
        let kind = prepared.kind;
        let fingerprint = request_fingerprint(kind, &prepared.payload);

        let explicit = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        let dedupe = explicit.is_some() || kind != OperationKind::ResetTable;
        let key = explicit.unwrap_or_else(|| derive_key(kind, &prepared.payload));

        let mut owner = None;
        if dedupe {
            match self
                .cache
                .reserve(&key, kind, &fingerprint, prepared.scope.as_deref())?
            {
                Reservation::Fresh(token) => owner = Some(token),
                Reservation::Replay(outcome) => {
                    info!(%key, %kind, run_id = %outcome.run_id, "Replaying stored outcome");
                    return Ok(SyncResponse {
                        outcome,
                        idempotency_key: key,
                        replayed: true,
                    });
                }
                Reservation::Conflict => return Err(Error::IdempotencyConflict { key }),
                Reservation::InProgress => return Err(Error::InProgress { key }),
            }
        }

        let outcome = match self.run(prepared).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(owner) = &owner {
                    self.release(&key, owner);
                }
                return Err(err);
            }
        };

        if let Some(owner) = &owner {
            if outcome.has_retryable_errors() {
                debug!(%key, "Retryable failure, releasing key");
                self.release(&key, owner);
            } else if let Err(err) = self.cache.complete(&key, owner, &outcome) {
                // The run is recorded and the mappings are committed, so a
                // retry after a lost result is safe
                warn!(%key, error = %err, "Failed to store outcome");
            }
        }

        Ok(SyncResponse {
            outcome,
            idempotency_key: key,
            replayed: false,
        })
    }

    fn release(&self, key: &str, owner: &str) {
        if let Err(err) = self.cache.release(key, owner) {
            warn!(key, error = %err, "Failed to release idempotency key");
        }
    }

    async fn run(&self, prepared: Prepared) -> Result<SyncOutcome> {
        let Prepared {
            kind, target, work, ..
        } = prepared;

        let run_id = self.ledger.begin(kind, Some(&target))?;
        info!(%run_id, %kind, %target, "Run started");

        let executed = match work {
            Work::Fetch(query) => self.fetch(&run_id, kind, query).await,
            Work::Reset(table) => self.reset(&table),
            Work::Customers(records) => self.sync_customers(&records).await,
            Work::SalesOrders(records) => self.sync_sales_orders(&records).await,
        };

        let status = if executed.aborted.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::from_counts(&executed.counts)
        };
        let summary = executed.aborted.clone().or_else(|| {
            (!executed.errors.is_empty()).then(|| {
                executed
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
        });

        self.ledger.finish(
            &run_id,
            status,
            executed.counts,
            summary.as_deref(),
            &executed.errors,
        )?;

        Ok(SyncOutcome {
            run_id,
            status,
            data: executed.data,
            errors: executed.errors,
        })
    }

    // ── Work ──────────────────────────────────────────────────

    async fn fetch(&self, run_id: &str, kind: OperationKind, mut query: TableQuery) -> Executed {
        let mut executed = Executed::default();
        let table = query.table.clone();

        // A table with no local copy is fetched from zero
        if kind == OperationKind::Pull && !query.reset {
            match self.snapshots.has_snapshot(&table) {
                Ok(has) => query.reset = !has,
                Err(err) => {
                    executed.item_failed(0, Some(&table), &err);
                    return executed;
                }
            }
        }

        debug!(%table, reset = query.reset, "Fetching table");
        let rows = match self.remote.fetch_table(&query).await {
            Ok(rows) => rows,
            Err(err) => {
                executed.item_failed(0, Some(&table), &err.into());
                executed.data = json!({
                    "table": table,
                    "reset": query.reset,
                    "count": 0,
                    "rows": [],
                });
                return executed;
            }
        };

        let rows = Value::Array(rows);
        if let Err(err) = self.snapshots.store(&table, run_id, &rows) {
            executed.item_failed(0, Some(&table), &err);
            return executed;
        }

        executed.counts.record_success();
        let count = rows.as_array().map_or(0, Vec::len);
        executed.data = json!({
            "table": table,
            "reset": query.reset,
            "count": count,
            "rows": rows,
        });
        executed
    }

    fn reset(&self, table: &str) -> Executed {
        let mut executed = Executed::default();

        let cleared = self
            .snapshots
            .clear(table)
            .and_then(|snapshots| Ok((snapshots, self.cache.purge_scope(table)?)));

        match cleared {
            Ok((snapshots, cached)) => {
                info!(table, snapshots, cached, "Table reset");
                executed.counts.record_success();
                executed.data = json!({
                    "table": table,
                    "snapshots_cleared": snapshots,
                    "cached_results_purged": cached,
                });
            }
            Err(err) => {
                executed.item_failed(0, Some(table), &err);
            }
        }
        executed
    }

    async fn sync_customers(&self, records: &[Value]) -> Executed {
        let mut executed = Executed::default();
        let mut items = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let local_key = customer_key(record);
            match self.sync_customer(record, local_key.as_deref()).await {
                Ok(result) => executed.item_ok(&mut items, result),
                Err(err) => {
                    if !executed.item_failed(index, local_key.as_deref(), &err) {
                        executed.not_attempted(records, index + 1, customer_key);
                        break;
                    }
                }
            }
        }

        executed.data = json!({ "entity": EntityType::Customer, "items": items });
        executed
    }

    async fn sync_customer(&self, record: &Value, local_key: Option<&str>) -> Result<Value> {
        let entity = EntityType::Customer;
        if !record.is_object() {
            return Err(Error::Validation("customer record is not a JSON object".into()));
        }
        let local_key = local_key
            .ok_or_else(|| Error::Validation("customer has no A1_CPEDX or A1_CGC".into()))?;
        let hash = content_hash(record);

        let existing = self
            .mappings
            .get(entity, local_key)?
            .filter(MappingEntry::is_created);

        let Some(entry) = existing else {
            let created = self.remote.create_customer(record).await?;
            let entry = self.mappings.upsert_after_create(
                entity,
                local_key,
                &created.remote_id,
                &hash,
                &created.extra,
            )?;
            return Ok(item_result(&entry, "created"));
        };

        if !has_changed(&hash, Some(&entry.snapshot_hash)) {
            debug!(local_key, "Customer unchanged, skipping remote call");
            return Ok(item_result(&entry, "unchanged"));
        }

        let remote_id = entry.remote_id.as_deref().unwrap_or_default();
        let extra = self.remote.update_customer(remote_id, record).await?;
        let entry = self
            .mappings
            .upsert_after_update(entity, local_key, &hash, &extra)?;
        Ok(item_result(&entry, "updated"))
    }

    async fn sync_sales_orders(&self, records: &[Value]) -> Executed {
        let mut executed = Executed::default();
        let mut items = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let local_key = order_key(record);
            match self.sync_sales_order(record, local_key.as_deref()).await {
                Ok(result) => executed.item_ok(&mut items, result),
                Err(err) => {
                    if !executed.item_failed(index, local_key.as_deref(), &err) {
                        executed.not_attempted(records, index + 1, order_key);
                        break;
                    }
                }
            }
        }

        executed.data = json!({ "entity": EntityType::SalesOrder, "items": items });
        executed
    }

    async fn sync_sales_order(&self, record: &Value, local_key: Option<&str>) -> Result<Value> {
        let entity = EntityType::SalesOrder;
        if !record.is_object() {
            return Err(Error::Validation("sales order record is not a JSON object".into()));
        }
        let local_key = local_key.ok_or_else(|| {
            Error::Validation("sales order has no C5_NUMEXT, C5_BIEPRE or C5_CPEDX".into())
        })?;

        // Orders are create-only on the remote side
        if let Some(entry) = self
            .mappings
            .get(entity, local_key)?
            .filter(MappingEntry::is_created)
        {
            debug!(local_key, "Sales order already created, skipping");
            return Ok(item_result(&entry, "already_exists"));
        }

        let hash = content_hash(record);
        let created = self.remote.create_sales_order(record).await?;
        let entry = self.mappings.upsert_after_create(
            entity,
            local_key,
            &created.remote_id,
            &hash,
            &created.extra,
        )?;
        Ok(item_result(&entry, "created"))
    }

    // ── Read side ─────────────────────────────────────────────

    /// List finished runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn runs(&self, filter: &RunFilter) -> Result<Vec<SyncRunRecord>> {
        self.ledger.list(filter)
    }

    /// Get one finished run.
    ///
    /// # Errors
    ///
    /// Returns `RunNotFound` if no finished run has this id.
    pub fn run_record(&self, run_id: &str) -> Result<SyncRunRecord> {
        self.ledger.get(run_id)?.ok_or_else(|| Error::RunNotFound {
            id: run_id.to_string(),
        })
    }

    #[must_use]
    pub const fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    #[must_use]
    pub const fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    #[must_use]
    pub const fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }
}

fn item_result(entry: &MappingEntry, action: &str) -> Value {
    json!({
        "local_key": entry.local_key,
        "remote_id": entry.remote_id,
        "action": action,
        "extra": entry.extra,
    })
}

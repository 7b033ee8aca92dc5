//! Run history command implementations.

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{OperationKind, RunFilter, RunStatus, SyncRunRecord};
use crate::storage::{RunLedger, SqliteStorage};
use chrono::{TimeZone, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// Output for runs list.
#[derive(Serialize)]
struct RunListOutput<'a> {
    runs: &'a [SyncRunRecord],
    count: usize,
}

fn open_ledger(db_path: Option<&PathBuf>) -> Result<RunLedger> {
    let config = SyncConfig::from_env(db_path.map(PathBuf::as_path))?;
    Ok(RunLedger::new(SqliteStorage::open(&config.db_path)?))
}

/// List runs.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or queried.
pub fn list(
    kind: Option<OperationKind>,
    status: Option<RunStatus>,
    limit: u32,
    offset: u32,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let ledger = open_ledger(db_path)?;
    let runs = ledger.list(&RunFilter {
        operation_kind: kind,
        status,
        limit,
        offset,
    })?;

    if json {
        let output = RunListOutput {
            runs: &runs,
            count: runs.len(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{}  {:<26} {:<10} {:<16} {}/{} ok  {}",
            run.run_id.dimmed(),
            run.operation_kind.as_str(),
            run.target.as_deref().unwrap_or("-"),
            colored_status(run.status),
            run.items_succeeded,
            run.items_total,
            format_ms(run.started_at).dimmed()
        );
    }
    Ok(())
}

/// Show one run with its item errors.
///
/// # Errors
///
/// Returns `RunNotFound` if no finished run has this id.
pub fn show(id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let ledger = open_ledger(db_path)?;
    let run = ledger
        .get(id)?
        .ok_or_else(|| Error::RunNotFound { id: id.to_string() })?;

    if json {
        println!("{}", serde_json::to_string(&run)?);
        return Ok(());
    }

    println!("{} {}", "Run".bold(), run.run_id);
    println!("  kind:     {}", run.operation_kind);
    println!("  target:   {}", run.target.as_deref().unwrap_or("-"));
    println!("  status:   {}", colored_status(run.status));
    println!(
        "  items:    {} total, {} succeeded, {} failed",
        run.items_total, run.items_succeeded, run.items_failed
    );
    println!("  started:  {}", format_ms(run.started_at));
    println!("  finished: {}", format_ms(run.finished_at));
    for error in &run.item_errors {
        println!("  {} {error}", "✗".red());
    }
    Ok(())
}

fn colored_status(status: RunStatus) -> colored::ColoredString {
    match status {
        RunStatus::Success => status.as_str().green(),
        RunStatus::PartialFailure => status.as_str().yellow(),
        RunStatus::Failed => status.as_str().red(),
    }
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

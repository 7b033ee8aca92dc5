//! Sync command implementations (pull, reset, customers, sales orders).

use crate::cli::Commands;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{RunStatus, SyncResponse};
use crate::remote::ProtheusClient;
use crate::storage::SqliteStorage;
use crate::sync::{FilterRequest, Operation, PeriodRequest, PullRequest, ResetRequest, SyncEngine};
use colored::Colorize;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Execute a sync command.
///
/// # Errors
///
/// Returns an error if configuration, validation or storage fails, or if
/// the run did not fully succeed.
pub fn execute(
    command: &Commands,
    db_path: Option<&PathBuf>,
    key: Option<&str>,
    json: bool,
) -> Result<()> {
    let op = operation(command)?;
    // A malformed request fails the same way with or without a remote
    op.validate()?;

    let config = SyncConfig::from_env(db_path.map(PathBuf::as_path))?;
    let client = ProtheusClient::new(config.require_remote()?.clone())?;
    let storage = SqliteStorage::open(&config.db_path)?;
    let engine = SyncEngine::new(storage, client, config.policy);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    let response = rt.block_on(async {
        engine
            .execute_detached(op, key.map(ToString::to_string))
            .await
            .map_err(|e| Error::Other(format!("Sync task failed: {e}")))?
    })?;

    print_response(&response, json)?;

    match response.outcome.status {
        RunStatus::Success => Ok(()),
        status => Err(Error::Other(format!(
            "Run {} finished with status {status}",
            response.outcome.run_id
        ))),
    }
}

fn operation(command: &Commands) -> Result<Operation> {
    Ok(match command {
        Commands::Pull { table, reset } => Operation::Pull(PullRequest {
            table: table.clone(),
            reset: *reset,
        }),
        Commands::PullFilter {
            table,
            field,
            value,
        } => Operation::PullFiltered(FilterRequest {
            table: table.clone(),
            field: field.clone(),
            value: value.clone(),
        }),
        Commands::Orders { from, to } => Operation::PullOrders(PeriodRequest {
            from: from.clone(),
            to: to.clone(),
        }),
        Commands::Invoices { from, to } => Operation::PullInvoices(PeriodRequest {
            from: from.clone(),
            to: to.clone(),
        }),
        Commands::Reset { table } => Operation::ResetTable(ResetRequest {
            table: table.clone(),
        }),
        Commands::Customers { file } => Operation::Customers(read_json(file)?),
        Commands::Salesorders { file } => Operation::SalesOrders(read_json(file)?),
        other => return Err(Error::Other(format!("not a sync command: {other:?}"))),
    })
}

/// Read a JSON document from a file, or stdin for `-`.
fn read_json(path: &Path) -> Result<Value> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    serde_json::from_str(&text)
        .map_err(|e| Error::Validation(format!("{} is not valid JSON: {e}", path.display())))
}

fn print_response(response: &SyncResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(response)?);
        return Ok(());
    }

    let outcome = &response.outcome;
    let status = match outcome.status {
        RunStatus::Success => outcome.status.as_str().green(),
        RunStatus::PartialFailure => outcome.status.as_str().yellow(),
        RunStatus::Failed => outcome.status.as_str().red(),
    };
    let replayed = if response.replayed {
        format!(" {}", "(replayed)".dimmed())
    } else {
        String::new()
    };
    println!("Run {} {status}{replayed}", outcome.run_id.bold());
    println!("  {} {}", "key:".dimmed(), response.idempotency_key);

    if let Some(count) = outcome.data.get("count") {
        let table = outcome.data.get("table").and_then(Value::as_str).unwrap_or("?");
        println!("  {table}: {count} rows");
    }
    if let Some(cleared) = outcome.data.get("snapshots_cleared") {
        println!("  snapshots cleared: {cleared}");
    }
    if let Some(items) = outcome.data.get("items").and_then(Value::as_array) {
        for item in items {
            println!(
                "  {} {} → {}",
                item["action"].as_str().unwrap_or("?").cyan(),
                item["local_key"].as_str().unwrap_or("?"),
                item["remote_id"].as_str().unwrap_or("-")
            );
        }
    }
    for error in &outcome.errors {
        println!("  {} {error}", "✗".red());
    }
    Ok(())
}

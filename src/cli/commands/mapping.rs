//! Mapping and maintenance command implementations.

use crate::cli::MappingCommands;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{EntityType, MappingEntry};
use crate::storage::idempotency::IdempotencyCache;
use crate::storage::{MappingStore, SqliteStorage};
use crate::validate::ALLOWED_TABLES;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// Output for mapping list.
#[derive(Serialize)]
struct MappingListOutput<'a> {
    entity: EntityType,
    mappings: &'a [MappingEntry],
    count: usize,
}

fn open(db_path: Option<&PathBuf>) -> Result<(SyncConfig, SqliteStorage)> {
    let config = SyncConfig::from_env(db_path.map(PathBuf::as_path))?;
    let storage = SqliteStorage::open(&config.db_path)?;
    Ok((config, storage))
}

/// Execute mapping commands.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or queried.
pub fn execute(command: &MappingCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let (_, storage) = open(db_path)?;
    let store = MappingStore::new(storage);

    match command {
        MappingCommands::Get { entity, local_key } => {
            let entry = store.get(*entity, local_key)?.ok_or_else(|| Error::NotFound {
                entity: *entity,
                local_key: local_key.clone(),
            })?;
            if json {
                println!("{}", serde_json::to_string(&entry)?);
            } else {
                print_entry(&entry);
            }
        }
        MappingCommands::List { entity, limit } => {
            let entries = store.list(*entity, Some(*limit))?;
            if json {
                let output = MappingListOutput {
                    entity: *entity,
                    mappings: &entries,
                    count: entries.len(),
                };
                println!("{}", serde_json::to_string(&output)?);
            } else if entries.is_empty() {
                println!("No {entity} mappings.");
            } else {
                entries.iter().for_each(print_entry);
            }
        }
        MappingCommands::Reset { entity, yes } => {
            if !yes {
                return Err(Error::Validation(format!(
                    "resetting {entity} mappings forgets every remote id; pass --yes to confirm"
                )));
            }
            let removed = store.reset(*entity)?;
            if json {
                println!("{}", serde_json::json!({ "entity": entity, "removed": removed }));
            } else {
                println!("Removed {removed} {entity} mappings");
            }
        }
    }
    Ok(())
}

fn print_entry(entry: &MappingEntry) {
    println!(
        "{} {} → {}  {}",
        entry.entity_type.as_str().dimmed(),
        entry.local_key.bold(),
        entry.remote_id.as_deref().unwrap_or("-"),
        entry.snapshot_hash.get(..12).unwrap_or(&entry.snapshot_hash).dimmed()
    );
}

/// Remove expired idempotency records.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the delete fails.
pub fn sweep(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let (config, storage) = open(db_path)?;
    let removed = IdempotencyCache::new(storage, config.policy).sweep_expired()?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Swept {removed} expired idempotency records");
    }
    Ok(())
}

/// List the tables available for pull.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn tables(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&serde_json::json!({ "tables": ALLOWED_TABLES }))?);
    } else {
        for table in ALLOWED_TABLES {
            println!("{table}");
        }
    }
    Ok(())
}

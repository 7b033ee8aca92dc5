//! Mapping store: `(entity_type, local_key) → (remote_id, snapshot_hash)`.
//!
//! Writes are idempotent under retry: repeating an upsert with the same
//! arguments leaves the row untouched and returns it.

use crate::error::{Error, Result};
use crate::model::{EntityType, MappingEntry};
use crate::storage::sqlite::{SqliteStorage, now_ms};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info, warn};

const SELECT_COLUMNS: &str =
    "entity_type, local_key, remote_id, snapshot_hash, extra, created_at, updated_at";

/// Persistent local-to-remote identifier mapping.
#[derive(Debug, Clone)]
pub struct MappingStore {
    storage: SqliteStorage,
}

impl MappingStore {
    #[must_use]
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Get the mapping for a local key, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, entity: EntityType, local_key: &str) -> Result<Option<MappingEntry>> {
        self.storage.read(|conn| select_entry(conn, entity, local_key))
    }

    /// List mappings of one entity type, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, entity: EntityType, limit: Option<u32>) -> Result<Vec<MappingEntry>> {
        let limit = limit.unwrap_or(100);
        self.storage.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM sync_mappings
                 WHERE entity_type = ?1
                 ORDER BY updated_at DESC, local_key ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(rusqlite::params![entity.as_str(), limit], map_entry)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Record the outcome of a successful remote create.
    ///
    /// Inserts the row on first sight. If the row already carries the same
    /// remote id, only the snapshot hash and extra data move forward. A
    /// different remote id is never written over an existing one.
    ///
    /// # Errors
    ///
    /// Returns `RemoteIdConflict` if the key is mapped to another remote id,
    /// or a storage error.
    pub fn upsert_after_create(
        &self,
        entity: EntityType,
        local_key: &str,
        remote_id: &str,
        snapshot_hash: &str,
        extra: &Value,
    ) -> Result<MappingEntry> {
        let now = now_ms();

        self.storage.mutate("upsert_after_create", |tx| {
            match select_entry(tx, entity, local_key)? {
                None => {
                    tx.execute(
                        "INSERT INTO sync_mappings
                            (entity_type, local_key, remote_id, snapshot_hash, extra, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        rusqlite::params![
                            entity.as_str(),
                            local_key,
                            remote_id,
                            snapshot_hash,
                            normalize_extra(extra),
                            now
                        ],
                    )?;
                    info!(%entity, local_key, remote_id, "Mapping created");
                }
                Some(existing) => {
                    if let Some(current) = existing.remote_id.as_deref() {
                        if current != remote_id {
                            warn!(
                                %entity,
                                local_key,
                                current,
                                attempted = remote_id,
                                "Refusing to remap"
                            );
                            return Err(Error::RemoteIdConflict {
                                entity,
                                local_key: local_key.to_string(),
                                existing: current.to_string(),
                                attempted: remote_id.to_string(),
                            });
                        }
                        if existing.snapshot_hash == snapshot_hash {
                            debug!(%entity, local_key, "Create replayed, mapping unchanged");
                            return Ok(existing);
                        }
                    }

                    tx.execute(
                        "UPDATE sync_mappings
                         SET remote_id = ?3, snapshot_hash = ?4, extra = ?5, updated_at = ?6
                         WHERE entity_type = ?1 AND local_key = ?2",
                        rusqlite::params![
                            entity.as_str(),
                            local_key,
                            remote_id,
                            snapshot_hash,
                            merge_extra(&existing.extra, extra),
                            now
                        ],
                    )?;
                }
            }

            select_entry(tx, entity, local_key)?
                .ok_or_else(|| Error::Other(format!("mapping {entity}/{local_key} vanished")))
        })
    }

    /// Record the outcome of a successful remote update.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key has no prior remote id (updates require
    /// a prior create), or a storage error.
    pub fn upsert_after_update(
        &self,
        entity: EntityType,
        local_key: &str,
        snapshot_hash: &str,
        extra: &Value,
    ) -> Result<MappingEntry> {
        let now = now_ms();

        self.storage.mutate("upsert_after_update", |tx| {
            let existing = select_entry(tx, entity, local_key)?
                .filter(MappingEntry::is_created)
                .ok_or_else(|| Error::NotFound {
                    entity,
                    local_key: local_key.to_string(),
                })?;

            if existing.snapshot_hash == snapshot_hash {
                return Ok(existing);
            }

            tx.execute(
                "UPDATE sync_mappings
                 SET snapshot_hash = ?3, extra = ?4, updated_at = ?5
                 WHERE entity_type = ?1 AND local_key = ?2",
                rusqlite::params![
                    entity.as_str(),
                    local_key,
                    snapshot_hash,
                    merge_extra(&existing.extra, extra),
                    now
                ],
            )?;
            debug!(%entity, local_key, "Mapping snapshot advanced");

            select_entry(tx, entity, local_key)?
                .ok_or_else(|| Error::Other(format!("mapping {entity}/{local_key} vanished")))
        })
    }

    /// Remove every mapping of one entity type. Administrative only.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn reset(&self, entity: EntityType) -> Result<usize> {
        let removed = self.storage.mutate("reset_mappings", |tx| {
            Ok(tx.execute(
                "DELETE FROM sync_mappings WHERE entity_type = ?1",
                [entity.as_str()],
            )?)
        })?;
        warn!(%entity, removed, "Mappings reset");
        Ok(removed)
    }
}

fn select_entry(
    conn: &Connection,
    entity: EntityType,
    local_key: &str,
) -> Result<Option<MappingEntry>> {
    let entry = conn
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM sync_mappings
                 WHERE entity_type = ?1 AND local_key = ?2"
            ),
            rusqlite::params![entity.as_str(), local_key],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<MappingEntry> {
    let entity: String = row.get(0)?;
    let entity_type = entity.parse::<EntityType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
    })?;

    Ok(MappingEntry {
        entity_type,
        local_key: row.get(1)?,
        remote_id: row.get(2)?,
        snapshot_hash: row.get(3)?,
        extra: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn normalize_extra(extra: &Value) -> Value {
    if extra.is_object() {
        extra.clone()
    } else {
        Value::Object(serde_json::Map::new())
    }
}

/// Shallow-merge `incoming` over `current`; keys in `incoming` win.
fn merge_extra(current: &Value, incoming: &Value) -> Value {
    let mut merged = normalize_extra(current);
    if let (Some(target), Some(source)) = (merged.as_object_mut(), incoming.as_object()) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
    merged
}

//! Mapping between locally known entities and their remote identifiers.

use serde::{Deserialize, Serialize};

use super::EntityType;

/// A durable `(entity_type, local_key) → remote_id` correspondence.
///
/// `remote_id` is assigned by the first successful create and never
/// replaced afterwards; later syncs only move `snapshot_hash` forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub entity_type: EntityType,
    pub local_key: String,
    pub remote_id: Option<String>,
    /// SHA256 of the normalized payload last synced.
    pub snapshot_hash: String,
    /// Remote-supplied side data (store code, tax id, remote message).
    pub extra: serde_json::Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl MappingEntry {
    /// Whether the entity already exists on the remote side.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.remote_id.is_some()
    }
}

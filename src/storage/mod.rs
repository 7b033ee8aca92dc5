//! SQLite storage layer for psync.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - One IMMEDIATE transaction per mutation
//! - Tables owned exclusively by the sync engine
//!
//! # Submodules
//!
//! - [`idempotency`] - Idempotency cache (reserve / complete / replay)
//! - [`ledger`] - Append-only sync run history
//! - [`mappings`] - Local key to remote id mapping store
//! - [`schema`] - Database schema definitions
//! - [`snapshots`] - Raw pulled table payloads
//! - [`sqlite`] - Shared connection handle

pub mod idempotency;
pub mod ledger;
pub mod mappings;
pub mod schema;
pub mod snapshots;
pub mod sqlite;

pub use idempotency::{IdempotencyCache, IdempotencyPolicy, IdempotencyRecord, Reservation};
pub use ledger::RunLedger;
pub use mappings::MappingStore;
pub use snapshots::{RawSnapshot, SnapshotStore};
pub use sqlite::SqliteStorage;

//! Data models for psync.
//!
//! This module contains the domain models:
//! - OperationKind / EntityType discriminators
//! - MappingEntry
//! - SyncRunRecord and the SyncOutcome envelope

pub mod mapping;
pub mod operation;
pub mod run;

pub use mapping::MappingEntry;
pub use operation::{EntityType, OperationKind};
pub use run::{
    ItemError, RunCounts, RunFilter, RunStatus, SyncOutcome, SyncResponse, SyncRunRecord,
};

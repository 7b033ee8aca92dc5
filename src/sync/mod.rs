//! Sync orchestration.
//!
//! - **Requests**: validated operation payloads ([`Operation`])
//! - **Hashing**: SHA256 over normalized JSON for change detection and key derivation
//! - **Engine**: [`SyncEngine`], which drives the idempotency cache, run
//!   ledger, mapping store and remote client for every operation
//!
//! # Example
//!
//! ```ignore
//! use psync::sync::{PullRequest, SyncEngine};
//!
//! let engine = SyncEngine::new(storage, client, policy);
//! let response = engine
//!     .pull(PullRequest { table: "SA1".into(), reset: false }, None)
//!     .await?;
//! println!("{} rows", response.outcome.data["count"]);
//! ```

mod engine;
mod hash;
mod request;

pub use engine::SyncEngine;
pub use hash::{content_hash, derive_key, has_changed, normalize, request_fingerprint};
pub use request::{
    apply_order_defaults, customer_key, order_key, parse_batch, FilterRequest, Operation,
    PeriodRequest, PullRequest, ResetRequest,
};

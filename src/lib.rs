//! psync - Idempotent synchronization with a Protheus ERP
//!
//! This crate provides the sync engine behind the `psync` CLI.
//!
//! # Architecture
//!
//! - [`sync`] - Sync orchestrator (pull, reset, customers, sales orders)
//! - [`storage`] - SQLite-backed mapping store, idempotency cache, run ledger
//! - [`remote`] - Remote client trait and the Protheus REST client
//! - [`model`] - Data types (MappingEntry, SyncRunRecord, SyncOutcome)
//! - [`config`] - Configuration from the environment
//! - [`validate`] - Table and date validation
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};

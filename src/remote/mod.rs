//! Remote ERP capability interface.
//!
//! The orchestrator only ever talks to the remote system through
//! [`RemoteClient`], so it can be driven by the HTTP-backed
//! [`ProtheusClient`] in production and by an in-process fake in tests.
//!
//! Failures are classified into three kinds. `Unreachable` and `Timeout`
//! are retryable by the caller; nothing in this crate retries on its own.

pub mod protheus;

pub use protheus::{ProtheusClient, RemoteConfig};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Structured remote failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, gateway down.
    #[error("{0}")]
    Unreachable(String),

    /// No response within the configured timeout.
    #[error("{0}")]
    Timeout(String),

    /// The remote answered and refused the request.
    #[error("{message}")]
    Rejected {
        status: Option<u16>,
        message: String,
    },
}

impl RemoteError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Exact-match filter forwarded to a table fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: String,
}

/// Inclusive `yyyymmdd` date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub from: String,
    pub to: String,
}

/// One table fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableQuery {
    pub table: String,
    /// Ask the remote for a full fetch instead of an incremental one.
    pub reset: bool,
    pub filter: Option<FieldFilter>,
    pub period: Option<Period>,
}

impl TableQuery {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Identifier and side data returned by a successful create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedRecord {
    pub remote_id: String,
    /// Object of extra fields worth keeping on the mapping.
    pub extra: Value,
}

/// The four remote operations the sync engine needs.
///
/// Implementations apply their own timeout to every call.
pub trait RemoteClient: Send + Sync {
    /// Fetch the rows of a table.
    fn fetch_table(
        &self,
        query: &TableQuery,
    ) -> impl Future<Output = RemoteResult<Vec<Value>>> + Send;

    /// Create a customer and return its remote id.
    fn create_customer(
        &self,
        record: &Value,
    ) -> impl Future<Output = RemoteResult<CreatedRecord>> + Send;

    /// Update an existing customer. Returns any extra data the remote echoed.
    fn update_customer(
        &self,
        remote_id: &str,
        record: &Value,
    ) -> impl Future<Output = RemoteResult<Value>> + Send;

    /// Create a sales order and return its remote number.
    fn create_sales_order(
        &self,
        record: &Value,
    ) -> impl Future<Output = RemoteResult<CreatedRecord>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_retryable() {
        assert!(RemoteError::Unreachable("refused".into()).is_retryable());
        assert!(RemoteError::Timeout("30s".into()).is_retryable());
        assert!(!RemoteError::Rejected { status: Some(400), message: "bad".into() }.is_retryable());
    }

    #[test]
    fn table_query_defaults_to_incremental() {
        let query = TableQuery::new("SA1");
        assert_eq!(query.table, "SA1");
        assert!(!query.reset);
        assert!(query.filter.is_none());
        assert!(query.period.is_none());
    }
}

//! Sync run records and the result envelope returned to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::OperationKind;

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        }
    }

    /// Derive the run status from item counts.
    ///
    /// No failures is a success, no successes is a failure, anything in
    /// between is partial.
    #[must_use]
    pub const fn from_counts(counts: &RunCounts) -> Self {
        if counts.failed == 0 {
            Self::Success
        } else if counts.succeeded == 0 {
            Self::Failed
        } else {
            Self::PartialFailure
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial_failure" | "partial" => Ok(Self::PartialFailure),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Per-run item counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl RunCounts {
    pub fn record_success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.total += 1;
        self.failed += 1;
    }
}

/// A failure confined to one item of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Zero-based position of the item in the submitted batch.
    pub index: usize,
    pub local_key: Option<String>,
    /// `ErrorCode` string, e.g. `REMOTE_REJECTED`.
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ItemError {
    #[must_use]
    pub fn from_error(index: usize, local_key: Option<&str>, err: &crate::Error) -> Self {
        let code = err.error_code();
        Self {
            index,
            local_key: local_key.map(str::to_string),
            code: code.as_str().to_string(),
            message: err.to_string(),
            retryable: code.is_retryable(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local_key {
            Some(key) => write!(f, "item {} ({key}): {}: {}", self.index, self.code, self.message),
            None => write!(f, "item {}: {}: {}", self.index, self.code, self.message),
        }
    }
}

/// One row of the run ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub run_id: String,
    pub operation_kind: OperationKind,
    /// Table name for pulls and resets, entity type for pushes.
    pub target: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
    pub status: RunStatus,
    pub items_total: u32,
    pub items_succeeded: u32,
    pub items_failed: u32,
    pub error_summary: Option<String>,
    pub item_errors: Vec<ItemError>,
}

/// Filter for listing runs.
#[derive(Debug, Clone, Copy)]
pub struct RunFilter {
    pub operation_kind: Option<OperationKind>,
    pub status: Option<RunStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            operation_kind: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// The result envelope of one orchestrated operation.
///
/// This is exactly what the idempotency cache stores and replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

impl SyncOutcome {
    /// Whether any failed item could succeed on resubmission.
    #[must_use]
    pub fn has_retryable_errors(&self) -> bool {
        self.errors.iter().any(|e| e.retryable)
    }
}

/// What the orchestrator hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    pub idempotency_key: String,
    /// True when the outcome came from the idempotency cache.
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_counts() {
        let mut counts = RunCounts::default();
        counts.record_success();
        assert_eq!(RunStatus::from_counts(&counts), RunStatus::Success);

        counts.record_failure();
        assert_eq!(RunStatus::from_counts(&counts), RunStatus::PartialFailure);

        let mut all_failed = RunCounts::default();
        all_failed.record_failure();
        assert_eq!(RunStatus::from_counts(&all_failed), RunStatus::Failed);
        assert_eq!(all_failed.total, all_failed.succeeded + all_failed.failed);
    }

    #[test]
    fn item_error_display_includes_key() {
        let err = ItemError {
            index: 1,
            local_key: Some("ORD-2".into()),
            code: "REMOTE_REJECTED".into(),
            message: "produto bloqueado".into(),
            retryable: false,
        };
        assert_eq!(err.to_string(), "item 1 (ORD-2): REMOTE_REJECTED: produto bloqueado");
    }
}

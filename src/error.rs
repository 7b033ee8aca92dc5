//! Error types for the psync engine.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, etc.)
//! - Retryability flags so callers know whether resubmitting can help
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use crate::model::EntityType;
use crate::remote::RemoteError;
use thiserror::Error;

/// Result type alias for psync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Callers match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    StorageError,

    // Not Found (exit 3)
    MappingNotFound,
    RunNotFound,

    // Validation (exit 4)
    ValidationError,

    // Idempotency (exit 5)
    IdempotencyConflict,
    InProgress,

    // Remote (exit 6)
    RemoteUnreachable,
    RemoteTimeout,
    RemoteRejected,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    RemoteIdConflict,
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StorageError => "STORAGE_ERROR",
            Self::MappingNotFound => "MAPPING_NOT_FOUND",
            Self::RunNotFound => "RUN_NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::InProgress => "IN_PROGRESS",
            Self::RemoteUnreachable => "REMOTE_UNREACHABLE",
            Self::RemoteTimeout => "REMOTE_TIMEOUT",
            Self::RemoteRejected => "REMOTE_REJECTED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::RemoteIdConflict => "REMOTE_ID_CONFLICT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::RemoteIdConflict | Self::InternalError => 1,
            Self::StorageError => 2,
            Self::MappingNotFound | Self::RunNotFound => 3,
            Self::ValidationError => 4,
            Self::IdempotencyConflict | Self::InProgress => 5,
            Self::RemoteUnreachable | Self::RemoteTimeout | Self::RemoteRejected => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether resubmitting the same request later can succeed.
    ///
    /// True for connection-level remote failures and for a key whose first
    /// execution is still pending. A remote rejection is terminal for the
    /// item; resubmitting the same payload yields the same rejection.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnreachable | Self::RemoteTimeout | Self::InProgress | Self::StorageError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in psync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Idempotency key '{key}' was already used for a different request")]
    IdempotencyConflict { key: String },

    #[error("Request with idempotency key '{key}' is still being processed")]
    InProgress { key: String },

    #[error("Remote unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Remote timed out: {0}")]
    RemoteTimeout(String),

    #[error("Remote rejected the request: {message}")]
    RemoteRejected {
        status: Option<u16>,
        message: String,
    },

    #[error("No {entity} mapping with a remote id for '{local_key}'")]
    NotFound {
        entity: EntityType,
        local_key: String,
    },

    #[error("Run not found: {id}")]
    RunNotFound { id: String },

    #[error(
        "{entity} '{local_key}' is already mapped to remote id '{existing}', refusing to remap to '{attempted}'"
    )]
    RemoteIdConflict {
        entity: EntityType,
        local_key: String,
        existing: String,
        attempted: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unreachable(msg) => Self::RemoteUnreachable(msg),
            RemoteError::Timeout(msg) => Self::RemoteTimeout(msg),
            RemoteError::Rejected { status, message } => Self::RemoteRejected { status, message },
        }
    }
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::IdempotencyConflict { .. } => ErrorCode::IdempotencyConflict,
            Self::InProgress { .. } => ErrorCode::InProgress,
            Self::RemoteUnreachable(_) => ErrorCode::RemoteUnreachable,
            Self::RemoteTimeout(_) => ErrorCode::RemoteTimeout,
            Self::RemoteRejected { .. } => ErrorCode::RemoteRejected,
            Self::NotFound { .. } => ErrorCode::MappingNotFound,
            Self::RunNotFound { .. } => ErrorCode::RunNotFound,
            Self::RemoteIdConflict { .. } => ErrorCode::RemoteIdConflict,
            Self::Database(_) => ErrorCode::StorageError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether this error is confined to a single batch item.
    ///
    /// Item-scoped errors are recorded against the item and the batch moves
    /// on. Anything else (storage, serialization) aborts the whole run.
    #[must_use]
    pub const fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnreachable(_)
                | Self::RemoteTimeout(_)
                | Self::RemoteRejected { .. }
                | Self::NotFound { .. }
                | Self::RemoteIdConflict { .. }
                | Self::Validation(_)
        )
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::IdempotencyConflict { .. } => Some(
                "Use a new idempotency key for a different payload, or resubmit the original payload."
                    .to_string(),
            ),
            Self::InProgress { .. } => Some(
                "Another request with this key is running. Retry after it finishes.".to_string(),
            ),
            Self::RemoteUnreachable(_) | Self::RemoteTimeout(_) => Some(
                "Check PROTHEUS_BASE_URL and network access, then resubmit with the same key."
                    .to_string(),
            ),
            Self::NotFound { entity, .. } => Some(format!(
                "Create the {entity} first; updates require a prior successful create."
            )),
            Self::RunNotFound { .. } => {
                Some("Use `psync runs` to list recorded runs.".to_string())
            }
            Self::Config(_) => Some(
                "Set PROTHEUS_BASE_URL, PROTHEUS_USERNAME and PROTHEUS_PASSWORD (a .env file works)."
                    .to_string(),
            ),
            Self::Validation(msg) => {
                if msg.contains("table") {
                    Some(format!(
                        "Valid tables: {}",
                        crate::validate::ALLOWED_TABLES.join(", ")
                    ))
                } else if msg.contains("yyyymmdd") {
                    Some("Dates look like 20260120.".to_string())
                } else {
                    None
                }
            }
            Self::RemoteRejected { .. }
            | Self::RemoteIdConflict { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_map_to_distinct_codes() {
        let unreachable: Error = RemoteError::Unreachable("refused".into()).into();
        let timeout: Error = RemoteError::Timeout("30s".into()).into();
        let rejected: Error = RemoteError::Rejected {
            status: Some(400),
            message: "CGC invalido".into(),
        }
        .into();

        assert_eq!(unreachable.error_code(), ErrorCode::RemoteUnreachable);
        assert_eq!(timeout.error_code(), ErrorCode::RemoteTimeout);
        assert_eq!(rejected.error_code(), ErrorCode::RemoteRejected);
        assert!(unreachable.error_code().is_retryable());
        assert!(timeout.error_code().is_retryable());
        assert!(!rejected.error_code().is_retryable());
    }

    #[test]
    fn storage_errors_are_not_item_scoped() {
        let err = Error::Database(rusqlite::Error::InvalidQuery);
        assert!(!err.is_item_scoped());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn structured_json_includes_hint() {
        let err = Error::IdempotencyConflict { key: "k1".into() };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "IDEMPOTENCY_CONFLICT");
        assert_eq!(json["error"]["exit_code"], 5);
        assert!(json["error"]["hint"].is_string());
    }
}

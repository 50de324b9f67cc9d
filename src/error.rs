//! Error types for the medtel-warehouse pipeline.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the application.

use thiserror::Error;

/// Errors that can occur in the warehouse pipeline.
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV parsing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A record violating the load contract (null natural key, bad range)
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Invalid date format
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage ran before one of its dependencies succeeded
    #[error("Stage ordering violation: {stage} requires {dependency}")]
    StageOrdering { stage: String, dependency: String },

    /// Another run already holds the pipeline lock
    #[error("Run already in progress for pipeline: {0}")]
    RunInProgress(String),

    /// A stage exceeded its bounded timeout
    #[error("Stage timed out: {0}")]
    StageTimeout(String),

    /// The run was cancelled at a stage boundary
    #[error("Run cancelled")]
    Cancelled,

    /// A stage exhausted its retry budget
    #[error("Stage {stage} failed after {attempts} attempts: {source}")]
    StageFailed {
        stage: String,
        attempts: u32,
        #[source]
        source: Box<WarehouseError>,
    },

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl WarehouseError {
    /// Whether the scheduler should retry this error with backoff.
    ///
    /// Connectivity, lock contention and timeouts are transient; contract
    /// violations, ordering violations and run conflicts are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Pool(_) | Self::Io(_) | Self::StageTimeout(_) => true,
            Self::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            Self::StageFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Convenience type alias for Result with WarehouseError
pub type Result<T> = std::result::Result<T, WarehouseError>;

impl From<anyhow::Error> for WarehouseError {
    fn from(err: anyhow::Error) -> Self {
        WarehouseError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        assert!(WarehouseError::StageTimeout("load_raw".to_string()).is_transient());
    }

    #[test]
    fn test_run_conflict_is_not_transient() {
        assert!(!WarehouseError::RunInProgress("medtel".to_string()).is_transient());
    }

    #[test]
    fn test_stage_failure_inherits_classification() {
        let err = WarehouseError::StageFailed {
            stage: "build_facts".to_string(),
            attempts: 3,
            source: Box::new(WarehouseError::StageTimeout("build_facts".to_string())),
        };
        assert!(err.is_transient());
    }
}

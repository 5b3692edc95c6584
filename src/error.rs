use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::types::{LogIndex, Term};

/// Errors surfaced by the log manager.
#[derive(Debug, Error)]
pub enum LogError {
    #[error(
        "Chain violation: log {index} links to ({prev_index}, {prev_term}) but tail is ({last_index}, {last_term})"
    )]
    ChainViolation {
        index: LogIndex,
        prev_index: LogIndex,
        prev_term: Term,
        last_index: LogIndex,
        last_term: Term,
    },

    #[error("Durability failure: {0}")]
    Durability(#[from] StorageError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Snapshot ending at ({index}, {term}) conflicts with local log term {local_term}")]
    SnapshotConflict {
        index: LogIndex,
        term: Term,
        local_term: Term,
    },

    #[error("Log manager is closed")]
    Closed,

    #[error("Log manager is unusable: {0}")]
    Poisoned(String),
}

/// Errors from a stable entry store.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(Arc<anyhow::Error>),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Store is closed")]
    Closed,
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(Arc::new(e.into()))
    }
}

/// Errors reported by a log applier.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Log {0} rejected by state machine: {1}")]
    Rejected(LogIndex, String),

    #[error("State machine error: {0}")]
    Internal(String),
}

/// Errors reported by a snapshot provider.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot creation in progress")]
    InProgress,

    #[error("Snapshot creation failed: {0}")]
    CreationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The node can no longer trust its durable state.
    Fatal,
    /// The operation failed but may be retried as is.
    Recoverable,
    /// Expected during normal operation, only worth a log line.
    Ignorable,
}

pub trait ErrorHandler {
    fn severity(&self) -> ErrorSeverity;
    fn context(&self) -> String;
}

impl ErrorHandler for StorageError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            StorageError::Io(_) => ErrorSeverity::Recoverable,
            StorageError::Corrupted(_) => ErrorSeverity::Fatal,
            StorageError::Closed => ErrorSeverity::Ignorable,
        }
    }

    fn context(&self) -> String {
        match self {
            StorageError::Io(e) => format!("IO error: {}", e),
            StorageError::Corrupted(msg) => format!("Corrupted data: {}", msg),
            StorageError::Closed => "Store is closed".to_string(),
        }
    }
}

impl ErrorHandler for LogError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            // the caller decides whether to discard or resync
            LogError::ChainViolation { .. } => ErrorSeverity::Ignorable,
            LogError::Durability(e) => e.severity(),
            LogError::Apply(_) => ErrorSeverity::Recoverable,
            LogError::Snapshot(SnapshotError::InProgress) => ErrorSeverity::Ignorable,
            LogError::Snapshot(_) => ErrorSeverity::Recoverable,
            LogError::SnapshotConflict { .. } => ErrorSeverity::Recoverable,
            LogError::Closed => ErrorSeverity::Ignorable,
            LogError::Poisoned(_) => ErrorSeverity::Fatal,
        }
    }

    fn context(&self) -> String {
        match self {
            LogError::Durability(e) => e.context(),
            other => other.to_string(),
        }
    }
}

/// Logs a failed operation at the level its severity calls for.
pub(crate) fn report_failure<E: ErrorHandler>(node: &str, operation: &str, err: &E) {
    match err.severity() {
        ErrorSeverity::Fatal => error!("[FATAL] {} on {} failed: {}", operation, node, err.context()),
        ErrorSeverity::Recoverable => {
            warn!("[RECOVERABLE] {} on {} failed: {}", operation, node, err.context())
        }
        ErrorSeverity::Ignorable => {
            info!("[IGNORABLE] {} on {} failed: {}", operation, node, err.context())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durability_severity_follows_storage_error() {
        let io = StorageError::from(std::io::Error::other("disk gone"));
        assert_eq!(LogError::from(io).severity(), ErrorSeverity::Recoverable);

        let corrupted = StorageError::Corrupted("bad meta crc".to_string());
        assert_eq!(LogError::from(corrupted).severity(), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_chain_violation_message() {
        let err = LogError::ChainViolation {
            index: 5,
            prev_index: 3,
            prev_term: 3,
            last_index: 4,
            last_term: 4,
        };
        assert_eq!(err.severity(), ErrorSeverity::Ignorable);
        assert!(err.context().contains("tail is (4, 4)"));
    }

    #[test]
    fn test_poisoned_is_fatal() {
        let err = LogError::Poisoned("records after 4 left in store".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Fatal);
        assert!(err.context().contains("unusable"));
    }
}

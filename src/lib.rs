//! Replicated log core of a cluster's consensus layer.
//!
//! The crate keeps the ordered sequence of [`LogRecord`]s a raft group agrees
//! on. Records are chained through `(prev_index, prev_term)`, persisted by a
//! [`StableEntryStore`] and handed to a [`LogApplier`] once committed.
//! Leader election, replication and membership live elsewhere and drive this
//! crate through [`LogSequenceManager`].

pub mod error;
pub mod manager;
pub mod message;
pub mod record;
pub mod storage;
pub mod traits;
pub mod types;

pub use error::{ApplyError, ErrorHandler, ErrorSeverity, LogError, SnapshotError, StorageError};
pub use manager::LogSequenceManager;
pub use message::{LogManagerMeta, Snapshot};
pub use record::{ChainTail, LogKind, LogPayload, LogRecord};
pub use storage::{FileEntryStore, FileEntryStoreOptions, MemoryEntryStore};
pub use traits::{
    ApplyResult, LogApplier, LogResult, SnapshotProvider, SnapshotResult, StableEntryStore,
    StorageResult,
};
pub use types::{LogIndex, NO_INDEX, NO_TERM, Node, Term};

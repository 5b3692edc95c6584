use async_trait::async_trait;

use crate::error::{ApplyError, LogError, SnapshotError, StorageError};
use crate::message::{LogManagerMeta, Snapshot};
use crate::record::LogRecord;
use crate::types::LogIndex;

pub type LogResult<T> = Result<T, LogError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type ApplyResult<T> = Result<T, ApplyError>;
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Applies committed records to the state machine.
///
/// A crash between `apply` and the commit index flush replays the same
/// record on restart, so implementations must tolerate re-application.
#[async_trait]
pub trait LogApplier: Send + Sync {
    async fn apply(&self, record: &LogRecord) -> ApplyResult<()>;
}

/// State machine specific snapshot hooks.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Latest snapshot, if one has been taken.
    async fn get_snapshot(&self) -> SnapshotResult<Option<Snapshot>>;

    /// Capture the state machine as of the last applied record.
    async fn take_snapshot(&self) -> SnapshotResult<()>;
}

/// Durable storage of log records and the log manager's hard state.
///
/// Every method is blocking. A method returning `Ok` means the change is on
/// stable storage (subject to the store's sync settings for entry appends;
/// `set_hard_state_and_flush` always syncs).
///
/// Removal methods only trim the logical view: physical space may be
/// reclaimed later, but recovery never returns removed records.
pub trait StableEntryStore: Send {
    /// Append records to the durable tail, in order.
    fn append(&mut self, records: &[LogRecord]) -> StorageResult<()>;

    /// Overwrite the hard state and force it to stable storage.
    fn set_hard_state_and_flush(&mut self, meta: &LogManagerMeta) -> StorageResult<()>;

    /// Last flushed hard state, or the zero value if none was ever written.
    fn hard_state(&self) -> LogManagerMeta;

    /// Remove every retained record with index lower than `index`.
    fn remove_compacted_entries(&mut self, index: LogIndex) -> StorageResult<()>;

    /// Remove the `n` oldest retained records.
    fn remove_first(&mut self, n: usize) -> StorageResult<()>;

    /// Drop every retained record with index greater than `index`.
    fn truncate_suffix(&mut self, index: LogIndex) -> StorageResult<()>;

    /// Discard everything covered by `snapshot` and move the hard state to
    /// its boundary if the snapshot reaches past the retained log.
    fn applying_snapshot(&mut self, snapshot: &Snapshot) -> StorageResult<()>;

    /// All retained records in ascending index order.
    fn get_all_entries(&self) -> StorageResult<Vec<LogRecord>>;

    /// Hard state as last flushed to stable storage.
    fn recover_meta(&mut self) -> StorageResult<LogManagerMeta>;

    /// Retained records as last written to stable storage.
    fn recover_log(&mut self) -> StorageResult<Vec<LogRecord>>;

    fn close(&mut self) -> StorageResult<()>;
}

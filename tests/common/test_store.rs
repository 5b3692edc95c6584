use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cluster_log::{
    LogIndex, LogManagerMeta, LogRecord, MemoryEntryStore, Snapshot, StableEntryStore,
    StorageError, StorageResult,
};

/// Memory store whose hard state flush and suffix truncation can be made
/// to fail while entry appends keep working.
#[derive(Clone, Default)]
pub struct FlakyMetaStore {
    pub inner: MemoryEntryStore,
    fail_meta: Arc<AtomicBool>,
    fail_truncate: Arc<AtomicBool>,
}

impl FlakyMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_meta(&self, fail: bool) {
        self.fail_meta.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_truncate(&self, fail: bool) {
        self.fail_truncate.store(fail, Ordering::SeqCst);
    }
}

impl StableEntryStore for FlakyMetaStore {
    fn append(&mut self, records: &[LogRecord]) -> StorageResult<()> {
        self.inner.append(records)
    }

    fn set_hard_state_and_flush(&mut self, meta: &LogManagerMeta) -> StorageResult<()> {
        if self.fail_meta.load(Ordering::SeqCst) {
            return Err(StorageError::from(std::io::Error::other("meta flush failed")));
        }
        self.inner.set_hard_state_and_flush(meta)
    }

    fn hard_state(&self) -> LogManagerMeta {
        self.inner.hard_state()
    }

    fn remove_compacted_entries(&mut self, index: LogIndex) -> StorageResult<()> {
        self.inner.remove_compacted_entries(index)
    }

    fn remove_first(&mut self, n: usize) -> StorageResult<()> {
        self.inner.remove_first(n)
    }

    fn truncate_suffix(&mut self, index: LogIndex) -> StorageResult<()> {
        if self.fail_truncate.load(Ordering::SeqCst) {
            return Err(StorageError::from(std::io::Error::other("truncate failed")));
        }
        self.inner.truncate_suffix(index)
    }

    fn applying_snapshot(&mut self, snapshot: &Snapshot) -> StorageResult<()> {
        self.inner.applying_snapshot(snapshot)
    }

    fn get_all_entries(&self) -> StorageResult<Vec<LogRecord>> {
        self.inner.get_all_entries()
    }

    fn recover_meta(&mut self) -> StorageResult<LogManagerMeta> {
        self.inner.recover_meta()
    }

    fn recover_log(&mut self) -> StorageResult<Vec<LogRecord>> {
        self.inner.recover_log()
    }

    fn close(&mut self) -> StorageResult<()> {
        self.inner.close()
    }
}

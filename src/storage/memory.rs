use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::message::{LogManagerMeta, Snapshot};
use crate::record::LogRecord;
use crate::traits::{StableEntryStore, StorageResult};
use crate::types::LogIndex;

#[derive(Default)]
struct MemoryInner {
    log: VecDeque<LogRecord>,
    meta: LogManagerMeta,
    fail_writes: bool,
    closed: bool,
}

/// Volatile store for tests and single-node setups.
///
/// Clones share the same state, so a test can keep a handle to inspect the
/// "durable" contents or inject write failures after handing a clone to a
/// log manager. Building a new manager over a clone behaves like a restart.
#[derive(Clone, Default)]
pub struct MemoryEntryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reopen after `close`, as a restarted process would.
    pub fn reopen(&self) -> Self {
        self.inner.lock().closed = false;
        self.clone()
    }

    fn writable(inner: &MemoryInner) -> StorageResult<()> {
        if inner.closed {
            return Err(StorageError::Closed);
        }
        if inner.fail_writes {
            return Err(std::io::Error::other("injected write failure").into());
        }
        Ok(())
    }
}

impl StableEntryStore for MemoryEntryStore {
    fn append(&mut self, records: &[LogRecord]) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::writable(&inner)?;
        inner.log.extend(records.iter().cloned());
        Ok(())
    }

    fn set_hard_state_and_flush(&mut self, meta: &LogManagerMeta) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::writable(&inner)?;
        inner.meta = *meta;
        Ok(())
    }

    fn hard_state(&self) -> LogManagerMeta {
        self.inner.lock().meta
    }

    fn remove_compacted_entries(&mut self, index: LogIndex) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::writable(&inner)?;
        while inner.log.front().is_some_and(|r| r.index() < index) {
            inner.log.pop_front();
        }
        Ok(())
    }

    fn remove_first(&mut self, n: usize) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::writable(&inner)?;
        let n = n.min(inner.log.len());
        inner.log.drain(..n);
        Ok(())
    }

    fn truncate_suffix(&mut self, index: LogIndex) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::writable(&inner)?;
        while inner.log.back().is_some_and(|r| r.index() > index) {
            inner.log.pop_back();
        }
        Ok(())
    }

    fn applying_snapshot(&mut self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::writable(&inner)?;

        let conflict = inner
            .log
            .iter()
            .any(|r| r.index() == snapshot.last_index && r.term() != snapshot.last_term);
        let beyond = inner
            .log
            .back()
            .is_none_or(|last| snapshot.last_index > last.index());
        if conflict || beyond {
            inner.log.clear();
        } else {
            while inner
                .log
                .front()
                .is_some_and(|r| r.index() <= snapshot.last_index)
            {
                inner.log.pop_front();
            }
        }

        let mut meta = inner.meta;
        if conflict || snapshot.last_index > meta.last_log_index {
            meta.last_log_index = snapshot.last_index;
            meta.last_log_term = snapshot.last_term;
        }
        meta.commit_log_index = meta.commit_log_index.max(snapshot.last_index);
        inner.meta = meta;
        Ok(())
    }

    fn get_all_entries(&self) -> StorageResult<Vec<LogRecord>> {
        Ok(self.inner.lock().log.iter().cloned().collect())
    }

    fn recover_meta(&mut self) -> StorageResult<LogManagerMeta> {
        Ok(self.inner.lock().meta)
    }

    fn recover_log(&mut self) -> StorageResult<Vec<LogRecord>> {
        self.get_all_entries()
    }

    fn close(&mut self) -> StorageResult<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use cluster_log::{
    ApplyError, ApplyResult, LogApplier, LogIndex, LogRecord, Snapshot, SnapshotError,
    SnapshotProvider, SnapshotResult,
};
use parking_lot::Mutex;
use tracing::debug;

/// Records every applied log, optionally rejecting one index.
#[derive(Default)]
pub struct TestApplier {
    applied: Mutex<Vec<LogRecord>>,
    reject: Mutex<Option<LogIndex>>,
}

impl TestApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_at(&self, index: Option<LogIndex>) {
        *self.reject.lock() = index;
    }

    pub fn applied(&self) -> Vec<LogRecord> {
        self.applied.lock().clone()
    }

    pub fn applied_indexes(&self) -> Vec<LogIndex> {
        self.applied.lock().iter().map(|r| r.index()).collect()
    }

    pub fn last_applied(&self) -> Option<LogRecord> {
        self.applied.lock().last().cloned()
    }
}

#[async_trait]
impl LogApplier for TestApplier {
    async fn apply(&self, record: &LogRecord) -> ApplyResult<()> {
        if *self.reject.lock() == Some(record.index()) {
            return Err(ApplyError::Rejected(record.index(), "injected".to_string()));
        }
        // yield so concurrent committers get a chance to interleave
        tokio::task::yield_now().await;
        debug!("applied log {}", record.index());
        self.applied.lock().push(record.clone());
        Ok(())
    }
}

/// Snapshots the applier's progress: the boundary is the last applied log.
pub struct TestSnapshotProvider {
    applier: Arc<TestApplier>,
    snapshot: Mutex<Option<Snapshot>>,
    fail: Mutex<bool>,
}

impl TestSnapshotProvider {
    pub fn new(applier: Arc<TestApplier>) -> Self {
        Self {
            applier,
            snapshot: Mutex::new(None),
            fail: Mutex::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl SnapshotProvider for TestSnapshotProvider {
    async fn get_snapshot(&self) -> SnapshotResult<Option<Snapshot>> {
        Ok(self.snapshot.lock().clone())
    }

    async fn take_snapshot(&self) -> SnapshotResult<()> {
        if *self.fail.lock() {
            return Err(SnapshotError::CreationFailed("injected".to_string()));
        }
        if let Some(last) = self.applier.last_applied() {
            let mut snapshot = Snapshot::new(last.index(), last.term());
            snapshot.data = format!("applied up to {}", last.index()).into_bytes();
            *self.snapshot.lock() = Some(snapshot);
        }
        Ok(())
    }
}

#![allow(dead_code)]

pub mod test_applier;
pub mod test_store;

use std::sync::Arc;

use cluster_log::{LogPayload, LogRecord, LogSequenceManager, Node, StableEntryStore};

use test_applier::{TestApplier, TestSnapshotProvider};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// `n` chained membership records starting at `start`; record `i` has term
/// `i` and links to `(i - 1, i - 1)`.
pub fn prepare_node_logs(start: i64, n: i64) -> Vec<LogRecord> {
    (start..start + n)
        .map(|i| {
            let node = Node::new("localhost", 30000 + i as i32, i as i32, 40000 + i as i32);
            LogRecord::new(i, i, i - 1, i - 1, LogPayload::AddNode { node })
        })
        .collect()
}

pub struct TestLog {
    pub manager: Arc<LogSequenceManager>,
    pub applier: Arc<TestApplier>,
    pub snapshots: Arc<TestSnapshotProvider>,
}

pub fn create_test_log<S: StableEntryStore + 'static>(store: S) -> TestLog {
    let applier = Arc::new(TestApplier::new());
    let snapshots = Arc::new(TestSnapshotProvider::new(applier.clone()));
    let manager = LogSequenceManager::new(Box::new(store), applier.clone(), snapshots.clone())
        .unwrap()
        .named("test_log");
    TestLog {
        manager: Arc::new(manager),
        applier,
        snapshots,
    }
}

pub async fn append_all(manager: &LogSequenceManager, records: &[LogRecord]) {
    for record in records {
        manager.append_log(record.clone()).await.unwrap();
    }
}

//! Ordered, durable log with a commit/apply pipeline.
//!
//! `LogSequenceManager` keeps every retained record in memory, validates the
//! chain on append, persists records and hard state through a
//! [`StableEntryStore`] and feeds committed records to a [`LogApplier`].
//!
//! Writers (append, commit, compaction, snapshot install, close) take the
//! store mutex, so they run one at a time and a commit that is in flight
//! finishes before the next one looks at the watermark. Readers only take
//! the state lock, which is held for in-memory swaps and never across I/O, so
//! they see a record and its metadata together or not at all.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LogError, report_failure};
use crate::message::{LogManagerMeta, Snapshot};
use crate::record::{ChainTail, LogRecord};
use crate::traits::{LogApplier, LogResult, SnapshotProvider, StableEntryStore};
use crate::types::{LogIndex, NO_INDEX, Term};

struct LogState {
    buffer: VecDeque<LogRecord>,
    meta: LogManagerMeta,
    closed: bool,
    /// Set when the store may hold records the in-memory log does not.
    poisoned: Option<String>,
}

impl LogState {
    fn tail(&self) -> ChainTail {
        match self.buffer.back() {
            Some(last) => ChainTail::At(last.index(), last.term()),
            None if self.meta.last_log_index == NO_INDEX => ChainTail::Empty,
            None => ChainTail::At(self.meta.last_log_index, self.meta.last_log_term),
        }
    }

    fn ensure_open(&self) -> LogResult<()> {
        if self.closed {
            return Err(LogError::Closed);
        }
        if let Some(reason) = &self.poisoned {
            return Err(LogError::Poisoned(reason.clone()));
        }
        Ok(())
    }
}

pub struct LogSequenceManager {
    name: String,
    state: RwLock<LogState>,
    store: Mutex<Box<dyn StableEntryStore>>,
    applier: Arc<dyn LogApplier>,
    snapshots: Arc<dyn SnapshotProvider>,
}

impl LogSequenceManager {
    /// Build a manager over `store`, recovering whatever it holds.
    pub fn new(
        mut store: Box<dyn StableEntryStore>,
        applier: Arc<dyn LogApplier>,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> LogResult<Self> {
        let mut meta = store.recover_meta()?;
        let records = store.recover_log()?;

        if let Some(last) = records.last() {
            if last.index() != meta.last_log_index {
                warn!(
                    "Recovered log ends at {} but hard state recorded {}, trusting the log",
                    last.index(),
                    meta.last_log_index
                );
            }
            meta.last_log_index = last.index();
            meta.last_log_term = last.term();
        }
        meta.commit_log_index = meta.commit_log_index.min(meta.last_log_index);

        info!(
            "Recovered {} log records, last {} (term {}), committed {}",
            records.len(),
            meta.last_log_index,
            meta.last_log_term,
            meta.commit_log_index
        );

        Ok(Self {
            name: "log".to_string(),
            state: RwLock::new(LogState {
                buffer: records.into(),
                meta,
                closed: false,
                poisoned: None,
            }),
            store: Mutex::new(store),
            applier,
            snapshots,
        })
    }

    /// Name used in log lines, e.g. the raft group this log belongs to.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn applier(&self) -> &Arc<dyn LogApplier> {
        &self.applier
    }

    pub fn last_log_index(&self) -> LogIndex {
        self.state.read().meta.last_log_index
    }

    pub fn last_log_term(&self) -> Term {
        self.state.read().meta.last_log_term
    }

    pub fn commit_log_index(&self) -> LogIndex {
        self.state.read().meta.commit_log_index
    }

    pub fn meta(&self) -> LogManagerMeta {
        self.state.read().meta
    }

    /// Index of the oldest retained record.
    pub fn first_log_index(&self) -> Option<LogIndex> {
        self.state.read().buffer.front().map(|r| r.index())
    }

    /// Seed the last index during initialization. Not validated or persisted.
    pub fn set_last_log_id(&self, index: LogIndex) {
        self.state.write().meta.last_log_index = index;
    }

    /// Seed the last term during initialization. Not validated or persisted.
    pub fn set_last_log_term(&self, term: Term) {
        self.state.write().meta.last_log_term = term;
    }

    /// Whether `index` is within the retained range.
    pub fn log_valid(&self, index: LogIndex) -> bool {
        let state = self.state.read();
        match state.buffer.front() {
            Some(first) => first.index() <= index && index <= state.meta.last_log_index,
            None => false,
        }
    }

    /// Retained records with index in `[start, end)`.
    pub fn get_logs(&self, start: LogIndex, end: LogIndex) -> Vec<LogRecord> {
        if start >= end {
            return Vec::new();
        }
        let state = self.state.read();
        let from = state.buffer.partition_point(|r| r.index() < start);
        let to = state.buffer.partition_point(|r| r.index() < end);
        state.buffer.range(from..to).cloned().collect()
    }

    pub async fn append_log(&self, record: LogRecord) -> LogResult<()> {
        self.append_logs(vec![record]).await
    }

    /// Append a chain of records; either all of them become durable and
    /// visible or none does.
    pub async fn append_logs(&self, records: Vec<LogRecord>) -> LogResult<()> {
        let Some(last) = records.last() else {
            return Ok(());
        };
        let mut store = self.store.lock().await;

        let prev_meta = {
            let state = self.state.read();
            state.ensure_open()?;

            let mut tail = state.tail();
            for record in &records {
                if !record.links_to(tail) {
                    let (last_index, last_term) = match tail {
                        ChainTail::Empty => (NO_INDEX, state.meta.last_log_term),
                        ChainTail::At(index, term) => (index, term),
                    };
                    let err = LogError::ChainViolation {
                        index: record.index(),
                        prev_index: record.prev_index(),
                        prev_term: record.prev_term(),
                        last_index,
                        last_term,
                    };
                    report_failure(&self.name, "append_log", &err);
                    return Err(err);
                }
                tail = ChainTail::At(record.index(), record.term());
            }
            state.meta
        };

        let meta = LogManagerMeta {
            last_log_index: last.index(),
            last_log_term: last.term(),
            ..prev_meta
        };

        if let Err(e) = store.append(&records) {
            let err = LogError::from(e);
            report_failure(&self.name, "append_log", &err);
            return Err(err);
        }
        if let Err(e) = store.set_hard_state_and_flush(&meta) {
            // drop the records the durable hard state does not describe
            if let Err(rollback) = store.truncate_suffix(prev_meta.last_log_index) {
                // the store keeps records the hard state does not describe; no retries
                let reason = format!(
                    "records after {} left in store ({}), hard state flush failed: {}",
                    prev_meta.last_log_index, rollback, e
                );
                self.state.write().poisoned = Some(reason.clone());
                let err = LogError::Poisoned(reason);
                report_failure(&self.name, "append_log", &err);
                return Err(err);
            }
            let err = LogError::from(e);
            report_failure(&self.name, "append_log", &err);
            return Err(err);
        }

        let mut state = self.state.write();
        debug!(
            "{} appended {} records, last {} (term {})",
            self.name,
            records.len(),
            meta.last_log_index,
            meta.last_log_term
        );
        state.buffer.extend(records);
        state.meta = meta;
        Ok(())
    }

    /// Apply every record up to `target` that has not been applied yet.
    ///
    /// The commit index never moves backward and never passes the last
    /// appended record; a target beyond it commits what exists.
    pub async fn commit_log(&self, target: LogIndex) -> LogResult<()> {
        let mut store = self.store.lock().await;

        let (pending, prev_commit, goal) = {
            let state = self.state.read();
            state.ensure_open()?;

            let commit = state.meta.commit_log_index;
            let goal = target.min(state.meta.last_log_index);
            if goal <= commit {
                return Ok(());
            }
            let from = state.buffer.partition_point(|r| r.index() <= commit);
            let to = state.buffer.partition_point(|r| r.index() <= goal);
            let pending: Vec<LogRecord> = state.buffer.range(from..to).cloned().collect();
            (pending, commit, goal)
        };

        let mut applied = prev_commit;
        let mut failure = None;
        for record in &pending {
            match self.applier.apply(record).await {
                Ok(()) => applied = record.index(),
                Err(e) => {
                    failure = Some(LogError::from(e));
                    break;
                }
            }
        }
        let commit = if failure.is_some() { applied } else { goal };

        if commit > prev_commit {
            let meta = LogManagerMeta {
                commit_log_index: commit,
                ..self.state.read().meta
            };
            if let Err(e) = store.set_hard_state_and_flush(&meta) {
                let err = LogError::from(e);
                report_failure(&self.name, "commit_log", &err);
                return Err(err);
            }
            self.state.write().meta.commit_log_index = commit;
            debug!(
                "{} committed {} -> {} ({} records applied)",
                self.name,
                prev_commit,
                commit,
                pending.len()
            );
        }

        match failure {
            Some(err) => {
                report_failure(&self.name, "commit_log", &err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Drop retained records up to `index`, never past the commit index.
    /// Returns how many records were removed.
    pub async fn compact(&self, index: LogIndex) -> LogResult<usize> {
        let mut store = self.store.lock().await;

        let boundary = {
            let state = self.state.read();
            state.ensure_open()?;
            index.min(state.meta.commit_log_index)
        };
        if self.first_log_index().is_none_or(|first| first > boundary) {
            return Ok(0);
        }

        if let Err(e) = store.remove_compacted_entries(boundary + 1) {
            let err = LogError::from(e);
            report_failure(&self.name, "compact", &err);
            return Err(err);
        }

        let mut state = self.state.write();
        let before = state.buffer.len();
        while state.buffer.front().is_some_and(|r| r.index() <= boundary) {
            state.buffer.pop_front();
        }
        let removed = before - state.buffer.len();
        debug!("{} compacted {} records up to {}", self.name, removed, boundary);
        Ok(removed)
    }

    pub async fn get_snapshot(&self) -> LogResult<Option<Snapshot>> {
        self.state.read().ensure_open()?;
        Ok(self.snapshots.get_snapshot().await?)
    }

    /// Ask the provider for a snapshot and compact the log prefix it covers.
    pub async fn take_snapshot(&self) -> LogResult<Option<Snapshot>> {
        self.state.read().ensure_open()?;
        if let Err(e) = self.snapshots.take_snapshot().await {
            let err = LogError::from(e);
            report_failure(&self.name, "take_snapshot", &err);
            return Err(err);
        }
        let Some(snapshot) = self.snapshots.get_snapshot().await? else {
            return Ok(None);
        };
        self.compact(snapshot.last_index).await?;
        Ok(Some(snapshot))
    }

    /// Install a snapshot produced elsewhere: records it covers are dropped
    /// and the last/commit indexes move up to its boundary.
    pub async fn apply_snapshot(&self, snapshot: Snapshot) -> LogResult<()> {
        let mut store = self.store.lock().await;

        let meta = {
            let state = self.state.read();
            state.ensure_open()?;
            if let Some(local) = state
                .buffer
                .iter()
                .find(|r| r.index() == snapshot.last_index)
            {
                if local.term() != snapshot.last_term {
                    let err = LogError::SnapshotConflict {
                        index: snapshot.last_index,
                        term: snapshot.last_term,
                        local_term: local.term(),
                    };
                    report_failure(&self.name, "apply_snapshot", &err);
                    return Err(err);
                }
            }

            let mut meta = state.meta;
            if snapshot.last_index > meta.last_log_index {
                meta.last_log_index = snapshot.last_index;
                meta.last_log_term = snapshot.last_term;
            }
            meta.commit_log_index = meta.commit_log_index.max(snapshot.last_index);
            meta
        };

        let result = store.applying_snapshot(&snapshot).and_then(|()| {
            if store.hard_state() != meta {
                store.set_hard_state_and_flush(&meta)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            let err = LogError::from(e);
            report_failure(&self.name, "apply_snapshot", &err);
            return Err(err);
        }

        let mut state = self.state.write();
        while state
            .buffer
            .front()
            .is_some_and(|r| r.index() <= snapshot.last_index)
        {
            state.buffer.pop_front();
        }
        state.meta = meta;
        info!(
            "{} installed snapshot up to {} (term {})",
            self.name, snapshot.last_index, snapshot.last_term
        );
        Ok(())
    }

    /// Flush the hard state and release the store. Every later operation
    /// fails with [`LogError::Closed`].
    pub async fn close(&self) -> LogResult<()> {
        let mut store = self.store.lock().await;

        let meta = {
            let state = self.state.read();
            state.ensure_open()?;
            state.meta
        };
        store.set_hard_state_and_flush(&meta)?;
        store.close()?;

        self.state.write().closed = true;
        info!("{} closed at {:?}", self.name, meta);
        Ok(())
    }
}

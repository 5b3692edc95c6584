use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::StorageError,
    message::{LogManagerMeta, Snapshot},
    record::LogRecord,
    traits::{StableEntryStore, StorageResult},
    types::LogIndex,
};

use super::{
    entry::MetaRecord,
    segment::{LogSegment, list_generations, scan_frames, segment_path},
};

const META_FILE_NAME: &str = "log.meta";
const META_TMP_FILE_NAME: &str = "log.meta.tmp";

/// Default amount of removed-but-unreclaimed bytes tolerated (64KB).
pub const DEFAULT_MAX_REMOVED_LOG_SIZE: u64 = 64 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileEntryStoreOptions {
    /// Directory holding the metadata and data files
    pub dir: PathBuf,
    /// Removed bytes allowed to pile up before the data file is rewritten.
    /// Zero rewrites on every removal.
    pub max_removed_log_size: u64,
    /// Whether to sync the data file after each append
    pub sync_on_write: bool,
}

impl Default for FileEntryStoreOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/raft-log"),
            max_removed_log_size: DEFAULT_MAX_REMOVED_LOG_SIZE,
            sync_on_write: true,
        }
    }
}

impl FileEntryStoreOptions {
    pub fn with_dir<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }
}

fn io_error(e: anyhow::Error) -> StorageError {
    StorageError::Io(Arc::new(e))
}

/// Best effort: a data file left behind is removed as stale on the next open.
fn remove_data_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove data file {:?}: {}", path, e);
    }
}

fn read_meta_file(dir: &Path) -> Result<Option<MetaRecord>, StorageError> {
    let path = dir.join(META_FILE_NAME);
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            warn!("Failed to open meta file {:?}: {}", path, e);
            return Err(e.into());
        }
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    // the file is only ever replaced by rename, so a bad record is not a torn write
    MetaRecord::deserialize(&buf).map(Some).map_err(|e| {
        warn!("Failed to decode meta file {:?}: {}", path, e);
        StorageError::Corrupted(format!("{:?}: {}", path, e))
    })
}

/// Append-only file store for log records and the log manager's hard state.
///
/// Layout of `dir`:
///
/// ```text
/// log.meta         # fixed-size MetaRecord, replaced atomically
/// log-{gen}.data   # frames; only the generation named in log.meta is live
/// ```
pub struct FileEntryStore {
    options: FileEntryStoreOptions,
    segment: LogSegment,
    /// Last record flushed to the meta file.
    meta: MetaRecord,
    closed: bool,
}

impl FileEntryStore {
    pub fn open(options: FileEntryStoreOptions) -> StorageResult<Self> {
        fs::create_dir_all(&options.dir)?;

        let meta = read_meta_file(&options.dir)?.unwrap_or_default();
        let mut segment = LogSegment::open(&options.dir, meta.generation).map_err(io_error)?;
        let records = segment
            .replay(meta.head_offset, meta.removed_count)
            .map_err(io_error)?;

        let store = Self {
            options,
            segment,
            meta,
            closed: false,
        };
        store.remove_stale_generations();

        info!(
            "Opened log store {:?}: generation {}, {} retained records, {} removed, meta {:?}",
            store.options.dir,
            store.meta.generation,
            records.len(),
            store.segment.removed_count,
            store.meta.meta
        );
        Ok(store)
    }

    pub fn options(&self) -> &FileEntryStoreOptions {
        &self.options
    }

    pub fn set_max_removed_log_size(&mut self, size: u64) {
        self.options.max_removed_log_size = size;
    }

    /// Frame sizes of the retained records, oldest first.
    pub fn retained_frame_sizes(&self) -> Vec<u64> {
        self.segment.entries.iter().map(|m| m.size).collect()
    }

    /// Bytes removed from the head of the data file but not yet reclaimed.
    pub fn removed_size(&self) -> u64 {
        self.segment.head_offset
    }

    pub fn generation(&self) -> u64 {
        self.segment.generation
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn remove_stale_generations(&self) {
        let generations = match list_generations(&self.options.dir) {
            Ok(g) => g,
            Err(e) => {
                warn!("Failed to list data files in {:?}: {}", self.options.dir, e);
                return;
            }
        };
        for generation in generations {
            if generation != self.segment.generation {
                let path = segment_path(&self.options.dir, generation);
                info!("Removing stale data file {:?}", path);
                remove_data_file(&path);
            }
        }
    }

    fn write_meta(&mut self, record: MetaRecord) -> StorageResult<()> {
        let tmp_path = self.options.dir.join(META_TMP_FILE_NAME);
        let path = self.options.dir.join(META_FILE_NAME);

        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&record.serialize())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            File::open(&self.options.dir)?.sync_all()?;
            Ok(())
        })();

        result.map_err(|e| {
            warn!("Failed to flush meta file {:?}: {}", path, e);
            io_error(e)
        })?;
        self.meta = record;
        Ok(())
    }

    fn watermarked(&self, meta: LogManagerMeta, head_offset: u64, removed_count: u64) -> MetaRecord {
        MetaRecord {
            meta,
            generation: self.segment.generation,
            head_offset,
            removed_count,
        }
    }

    /// Logically drop the `n` oldest records, then reclaim space if the
    /// removed prefix grew past the threshold.
    fn remove_head(&mut self, n: usize, meta: LogManagerMeta) -> StorageResult<()> {
        let (head, removed) = self.segment.watermark_after(n);
        self.write_meta(self.watermarked(meta, head, removed))?;
        self.segment.remove_first(n);
        debug!(
            "Removed {} records from {:?}, {} bytes awaiting reclamation",
            n, self.segment.file_name, head
        );

        // the removal is already durable, a failed rewrite is retried next time
        if head > 0 && head >= self.options.max_removed_log_size {
            if let Err(e) = self.reclaim() {
                warn!("Deferring reclamation of {:?}: {}", self.segment.file_name, e);
            }
        }
        Ok(())
    }

    /// Move the retained frames into the next generation and drop the old file.
    fn reclaim(&mut self) -> StorageResult<()> {
        let next_generation = self.segment.generation + 1;
        let next = self
            .segment
            .rewrite_into(&self.options.dir, next_generation)
            .map_err(|e| {
                warn!("Failed to rewrite log into generation {}: {}", next_generation, e);
                io_error(e)
            })?;

        let record = MetaRecord {
            meta: self.meta.meta,
            generation: next_generation,
            head_offset: 0,
            removed_count: 0,
        };
        if let Err(e) = self.write_meta(record) {
            // unreferenced by log.meta, so the next open would drop it anyway
            drop(next.file);
            remove_data_file(&next.file_name);
            return Err(e);
        }

        let old = std::mem::replace(&mut self.segment, next);
        info!(
            "Reclaimed {} bytes: generation {} replaced by {}",
            old.head_offset, old.generation, next_generation
        );
        drop(old.file);
        remove_data_file(&old.file_name);
        Ok(())
    }
}

impl StableEntryStore for FileEntryStore {
    fn append(&mut self, records: &[LogRecord]) -> StorageResult<()> {
        self.check_open()?;
        if records.is_empty() {
            return Ok(());
        }

        let before = self.segment.entry_count();
        self.segment.write_records(records).map_err(|e| {
            warn!("Failed to append log records: {}", e);
            io_error(e)
        })?;

        if self.options.sync_on_write {
            if let Err(e) = self.segment.sync_data() {
                if let Err(e) = self.segment.truncate_to(before) {
                    warn!("Failed to drop unsynced records: {}", e);
                }
                return Err(io_error(e));
            }
        }
        Ok(())
    }

    fn set_hard_state_and_flush(&mut self, meta: &LogManagerMeta) -> StorageResult<()> {
        self.check_open()?;
        let record = self.watermarked(*meta, self.segment.head_offset, self.segment.removed_count);
        self.write_meta(record)
    }

    fn hard_state(&self) -> LogManagerMeta {
        self.meta.meta
    }

    fn remove_compacted_entries(&mut self, index: LogIndex) -> StorageResult<()> {
        let n = self
            .segment
            .entries
            .iter()
            .take_while(|m| m.log_index < index)
            .count();
        self.remove_first(n)
    }

    fn remove_first(&mut self, n: usize) -> StorageResult<()> {
        self.check_open()?;
        let n = n.min(self.segment.entry_count());
        if n == 0 {
            return Ok(());
        }
        self.remove_head(n, self.meta.meta)
    }

    fn truncate_suffix(&mut self, index: LogIndex) -> StorageResult<()> {
        self.check_open()?;
        let dropped = self.segment.truncate_suffix(index).map_err(io_error)?;
        if dropped > 0 {
            self.segment.sync_data().map_err(io_error)?;
            debug!("Dropped {} records after log {}", dropped, index);
        }
        Ok(())
    }

    fn applying_snapshot(&mut self, snapshot: &Snapshot) -> StorageResult<()> {
        self.check_open()?;

        let entries = &self.segment.entries;
        let conflict = entries
            .iter()
            .any(|m| m.log_index == snapshot.last_index && m.term != snapshot.last_term);
        let beyond = entries
            .back()
            .is_none_or(|last| snapshot.last_index > last.log_index);
        let n = if conflict || beyond {
            entries.len()
        } else {
            entries
                .iter()
                .take_while(|m| m.log_index <= snapshot.last_index)
                .count()
        };

        let mut meta = self.meta.meta;
        if conflict || snapshot.last_index > meta.last_log_index {
            meta.last_log_index = snapshot.last_index;
            meta.last_log_term = snapshot.last_term;
        }
        meta.commit_log_index = meta.commit_log_index.max(snapshot.last_index);

        info!(
            "Applying snapshot up to log {} (term {}): removing {} records",
            snapshot.last_index, snapshot.last_term, n
        );
        self.remove_head(n, meta)
    }

    fn get_all_entries(&self) -> StorageResult<Vec<LogRecord>> {
        self.check_open()?;
        self.segment.read_all().map_err(|e| {
            warn!("Failed to read retained records: {}", e);
            io_error(e)
        })
    }

    fn recover_meta(&mut self) -> StorageResult<LogManagerMeta> {
        Ok(read_meta_file(&self.options.dir)?
            .map(|r| r.meta)
            .unwrap_or_default())
    }

    fn recover_log(&mut self) -> StorageResult<Vec<LogRecord>> {
        let meta = read_meta_file(&self.options.dir)?.unwrap_or_default();
        let path = segment_path(&self.options.dir, meta.generation);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let outcome = scan_frames(&file, meta.head_offset).map_err(io_error)?;
        Ok(outcome.records)
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.segment.sync_data().map_err(io_error)?;
        self.closed = true;
        info!("Closed log store {:?}", self.options.dir);
        Ok(())
    }
}

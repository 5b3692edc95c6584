use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::record::LogRecord;
use crate::types::LogIndex;

use super::entry::{EntryMeta, FRAME_HEADER_SIZE, FrameHeader};

// Data file format:
// | FrameHeader | record body | FrameHeader | record body | ...
//
// Frames before `head_offset` are logically removed. They stay on disk until
// the segment is rewritten into the next generation.

const SEGMENT_FILE_PREFIX: &str = "log-";
const SEGMENT_FILE_EXT: &str = ".data";

pub fn segment_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{}{}{}", SEGMENT_FILE_PREFIX, generation, SEGMENT_FILE_EXT))
}

/// Generations of every data file found in `dir`.
pub fn list_generations(dir: &Path) -> Result<Vec<u64>> {
    let mut generations = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with(SEGMENT_FILE_PREFIX) && name.ends_with(SEGMENT_FILE_EXT) {
                let id_str = name
                    .trim_start_matches(SEGMENT_FILE_PREFIX)
                    .trim_end_matches(SEGMENT_FILE_EXT);
                if let Ok(id) = id_str.parse::<u64>() {
                    generations.push(id);
                }
            }
        }
    }
    generations.sort_unstable();
    Ok(generations)
}

/// Result of scanning a data file.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// Retained records, oldest first.
    pub records: Vec<LogRecord>,
    /// Metadata of the retained frames.
    pub metas: Vec<EntryMeta>,
    /// Frames skipped because they sit before the head offset.
    pub removed_frames: u64,
    /// End of the last frame that passed validation.
    pub valid_len: u64,
    /// Bytes after `valid_len` that did not form a valid frame.
    pub torn_bytes: u64,
}

/// Scans `file` from the start, stopping at the first frame that is
/// incomplete, fails its checksum, does not decode, or breaks the chain.
pub fn scan_frames(file: &File, head_offset: u64) -> Result<ReplayOutcome> {
    let file_size = file.metadata()?.len();
    let mut outcome = ReplayOutcome::default();

    let mut offset: u64 = 0;
    let mut header_buf = [0u8; FRAME_HEADER_SIZE as usize];
    let mut prev: Option<LogRecord> = None;

    while offset < file_size {
        if offset + FRAME_HEADER_SIZE as u64 > file_size {
            warn!("Incomplete frame header at offset {}, stopping replay", offset);
            break;
        }
        file.read_exact_at(&mut header_buf, offset)?;

        let header = match FrameHeader::deserialize(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                warn!("Failed to deserialize frame header at offset {}: {}", offset, e);
                break;
            }
        };

        if offset + header.frame_size() > file_size {
            warn!(
                "Frame at offset {} claims {} bytes but only {} remain, stopping replay",
                offset,
                header.frame_size(),
                file_size - offset
            );
            break;
        }

        let mut body = vec![0u8; header.size as usize];
        file.read_exact_at(&mut body, offset + FRAME_HEADER_SIZE as u64)?;
        if !header.verify(&body) {
            warn!("CRC mismatch at offset {}, stopping replay", offset);
            break;
        }

        let record = match LogRecord::deserialize(&body) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to decode record at offset {}: {}", offset, e);
                break;
            }
        };

        if offset < head_offset {
            outcome.removed_frames += 1;
        } else {
            if let Some(prev) = &prev {
                if !record.follows(prev) {
                    warn!(
                        "Log {} at offset {} does not follow log {} (term {}), stopping replay",
                        record.index(),
                        offset,
                        prev.index(),
                        prev.term()
                    );
                    break;
                }
            }
            outcome.metas.push(EntryMeta {
                log_index: record.index(),
                term: record.term(),
                offset,
                size: header.frame_size(),
            });
            prev = Some(record.clone());
            outcome.records.push(record);
        }

        offset += header.frame_size();
    }

    outcome.valid_len = offset;
    outcome.torn_bytes = file_size - offset;
    Ok(outcome)
}

/// The data file of one generation.
pub struct LogSegment {
    pub(crate) file_name: PathBuf,
    pub(crate) generation: u64,
    pub(crate) file: File,
    /// Retained frames, oldest first.
    pub(crate) entries: VecDeque<EntryMeta>,
    pub(crate) head_offset: u64,
    pub(crate) removed_count: u64,
    /// End of the last valid frame, where the next append goes.
    pub(crate) write_offset: u64,
}

impl LogSegment {
    pub fn open(dir: &Path, generation: u64) -> Result<Self> {
        let file_name = segment_path(dir, generation);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&file_name)
            .map_err(|e| {
                warn!("Failed to open log segment {:?}: {}", file_name, e);
                e
            })?;

        Ok(Self {
            file_name,
            generation,
            file,
            entries: VecDeque::new(),
            head_offset: 0,
            removed_count: 0,
            write_offset: 0,
        })
    }

    /// Rebuild the frame index from disk and cut off a torn tail.
    pub fn replay(&mut self, head_offset: u64, removed_count: u64) -> Result<Vec<LogRecord>> {
        let outcome = scan_frames(&self.file, head_offset)?;

        if outcome.torn_bytes > 0 {
            warn!(
                "Discarding {} trailing bytes of {:?} after offset {}",
                outcome.torn_bytes, self.file_name, outcome.valid_len
            );
            self.file.set_len(outcome.valid_len)?;
            self.sync_data()?;
        }
        if outcome.removed_frames != removed_count {
            warn!(
                "Watermark of {:?} covers {} frames but {} were recorded",
                self.file_name, outcome.removed_frames, removed_count
            );
        }

        self.entries = outcome.metas.into_iter().collect();
        self.head_offset = head_offset.min(outcome.valid_len);
        self.removed_count = outcome.removed_frames;
        self.write_offset = outcome.valid_len;
        Ok(outcome.records)
    }

    pub fn first_entry(&self) -> Option<EntryMeta> {
        self.entries.front().copied()
    }

    pub fn last_entry(&self) -> Option<EntryMeta> {
        self.entries.back().copied()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn sync_data(&self) -> Result<()> {
        self.file.sync_data().map_err(|e| {
            warn!("Failed to sync log segment file data: {}", e);
            e.into()
        })
    }

    pub fn write_records(&mut self, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        let mut metas = Vec::with_capacity(records.len());
        let mut offset = self.write_offset;
        for record in records {
            let body = record.serialize()?;
            let header = FrameHeader::for_body(&body)?;
            buf.extend_from_slice(&header.serialize());
            buf.extend_from_slice(&body);
            metas.push(EntryMeta {
                log_index: record.index(),
                term: record.term(),
                offset,
                size: header.frame_size(),
            });
            offset += header.frame_size();
        }

        if let Err(e) = self.file.write_all_at(&buf, self.write_offset) {
            warn!("Failed to write log records to {:?}: {}", self.file_name, e);
            // drop whatever part of the batch made it to the file
            if let Err(e) = self.file.set_len(self.write_offset) {
                warn!("Failed to roll back partial write: {}", e);
            }
            return Err(e.into());
        }

        self.entries.extend(metas);
        self.write_offset = offset;
        Ok(())
    }

    /// Keep only the first `count` retained frames.
    pub fn truncate_to(&mut self, count: usize) -> Result<()> {
        if count >= self.entries.len() {
            return Ok(());
        }
        let new_len = self.entries[count].offset;
        self.file.set_len(new_len).map_err(|e| {
            warn!("Failed to truncate {:?} to {}: {}", self.file_name, new_len, e);
            e
        })?;
        self.entries.truncate(count);
        self.write_offset = new_len;
        Ok(())
    }

    /// Drop retained frames with index greater than `index`.
    pub fn truncate_suffix(&mut self, index: LogIndex) -> Result<usize> {
        let keep = self
            .entries
            .iter()
            .take_while(|m| m.log_index <= index)
            .count();
        let dropped = self.entries.len() - keep;
        self.truncate_to(keep)?;
        Ok(dropped)
    }

    /// Watermark that removing the `n` oldest retained frames would produce.
    pub fn watermark_after(&self, n: usize) -> (u64, u64) {
        let n = n.min(self.entries.len());
        let head = self
            .entries
            .get(n)
            .map_or(self.write_offset, |m| m.offset);
        (head, self.removed_count + n as u64)
    }

    pub fn remove_first(&mut self, n: usize) {
        let (head, removed) = self.watermark_after(n);
        let n = n.min(self.entries.len());
        self.entries.drain(..n);
        self.head_offset = head;
        self.removed_count = removed;
    }

    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let (Some(first), Some(last)) = (self.first_entry(), self.last_entry()) else {
            return Ok(Vec::new());
        };

        // retained frames are contiguous, read them in one go
        let mut buf = vec![0u8; (last.end() - first.offset) as usize];
        self.file.read_exact_at(&mut buf, first.offset).map_err(|e| {
            warn!("Failed to read log records from {:?}: {}", self.file_name, e);
            e
        })?;

        let mut records = Vec::with_capacity(self.entries.len());
        for meta in &self.entries {
            let start = (meta.offset - first.offset) as usize;
            let frame = &buf[start..start + meta.size as usize];
            let header = FrameHeader::deserialize(frame)?;
            let body = &frame[FRAME_HEADER_SIZE as usize..];
            if !header.verify(body) {
                return Err(anyhow!(
                    "Frame of log {} at offset {} failed verification",
                    meta.log_index,
                    meta.offset
                ));
            }
            records.push(LogRecord::deserialize(body)?);
        }
        Ok(records)
    }

    /// Copy the retained frames into a fresh segment of `generation`.
    pub fn rewrite_into(&self, dir: &Path, generation: u64) -> Result<LogSegment> {
        let mut next = LogSegment::open(dir, generation)?;
        next.file.set_len(0)?;

        let len = self.write_offset - self.head_offset;
        if len > 0 {
            let mut buf = vec![0u8; len as usize];
            self.file.read_exact_at(&mut buf, self.head_offset)?;
            next.file.write_all_at(&buf, 0)?;
        }
        next.file.sync_all()?;

        next.entries = self
            .entries
            .iter()
            .map(|m| EntryMeta {
                offset: m.offset - self.head_offset,
                ..*m
            })
            .collect();
        next.write_offset = len;

        debug!(
            "Rewrote {} retained frames ({} bytes) into {:?}",
            next.entries.len(),
            len,
            next.file_name
        );
        Ok(next)
    }
}

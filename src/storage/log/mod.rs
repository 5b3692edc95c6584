//! File-backed log storage.
//!
//! Records are appended as checksummed frames to a generational data file;
//! the log manager's hard state and the compaction watermark live in a small
//! fixed-size metadata file that is replaced atomically. Removing old records
//! only moves the watermark until enough bytes pile up, then the retained
//! frames are rewritten into the next generation.
//!
//! # Module Structure
//!
//! - `entry`: frame header and metadata record formats
//! - `segment`: data file append, replay and rewrite
//! - `store`: `FileEntryStore`, the `StableEntryStore` implementation

mod entry;
mod segment;
mod store;


pub use entry::{
    EntryMeta, FRAME_HEADER_SIZE, FRAME_MAGIC_NUM, FrameHeader, META_RECORD_SIZE, MetaRecord,
};

pub use segment::{LogSegment, ReplayOutcome};

pub use store::{DEFAULT_MAX_REMOVED_LOG_SIZE, FileEntryStore, FileEntryStoreOptions};

use anyhow::{Result, anyhow};

use crate::message::LogManagerMeta;
use crate::types::{LogIndex, Term};

pub const FRAME_MAGIC_NUM: u32 = 0x_4C4F_4746;
pub const FRAME_HEADER_SIZE: u32 = 12; // 4 + 4 + 4

/// Location of one retained frame in the current data file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryMeta {
    pub log_index: LogIndex,
    pub term: Term,
    /// Offset of the frame header.
    pub offset: u64,
    /// Header plus body.
    pub size: u64,
}

impl EntryMeta {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Body length as stored in a frame header.
pub fn frame_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| anyhow!("Record body of {} bytes does not fit a frame", len))
}

/// Header preceding every record body in a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the body that follows the header.
    pub size: u32,
    pub magic_num: u32,
    pub crc: u32,
}

impl FrameHeader {
    pub fn for_body(body: &[u8]) -> Result<Self> {
        Ok(Self {
            size: frame_len(body.len())?,
            magic_num: FRAME_MAGIC_NUM,
            crc: crc32fast::hash(body),
        })
    }

    pub fn frame_size(&self) -> u64 {
        FRAME_HEADER_SIZE as u64 + self.size as u64
    }

    pub fn serialize(&self) -> [u8; FRAME_HEADER_SIZE as usize] {
        let mut buf = [0u8; FRAME_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.magic_num.to_le_bytes());
        buf[8..12].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE as usize {
            return Err(anyhow!("Invalid length"));
        }

        let size = read_u32(data, 0);
        let magic_num = read_u32(data, 4);
        let crc = read_u32(data, 8);

        if magic_num != FRAME_MAGIC_NUM {
            return Err(anyhow!("Invalid magic number"));
        }

        Ok(Self {
            size,
            magic_num,
            crc,
        })
    }

    pub fn verify(&self, body: &[u8]) -> bool {
        body.len() == self.size as usize && crc32fast::hash(body) == self.crc
    }
}

pub const META_MAGIC_NUM: u32 = 0x_4D45_5441;
pub const META_VERSION_V1: u32 = 1;
pub const META_RECORD_SIZE: usize = 4 + 4 + 8 * 3 + 8 * 3 + 4;

/// Fixed-size record stored in the metadata file.
///
/// ```text
/// | magic | version | last_log_index | last_log_term | commit_log_index |
/// | generation | head_offset | removed_count | crc |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaRecord {
    pub meta: LogManagerMeta,
    /// Data file currently holding the log.
    pub generation: u64,
    /// Frames before this offset are logically removed.
    pub head_offset: u64,
    /// Number of frames before `head_offset`.
    pub removed_count: u64,
}

impl MetaRecord {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(META_RECORD_SIZE);
        buf.extend_from_slice(&META_MAGIC_NUM.to_le_bytes());
        buf.extend_from_slice(&META_VERSION_V1.to_le_bytes());
        buf.extend_from_slice(&self.meta.last_log_index.to_le_bytes());
        buf.extend_from_slice(&self.meta.last_log_term.to_le_bytes());
        buf.extend_from_slice(&self.meta.commit_log_index.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.head_offset.to_le_bytes());
        buf.extend_from_slice(&self.removed_count.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() != META_RECORD_SIZE {
            return Err(anyhow!(
                "meta record is {} bytes, expected {}",
                data.len(),
                META_RECORD_SIZE
            ));
        }
        let body = &data[..META_RECORD_SIZE - 4];
        let crc = read_u32(data, META_RECORD_SIZE - 4);
        if crc32fast::hash(body) != crc {
            return Err(anyhow!("meta record crc mismatch"));
        }
        if read_u32(data, 0) != META_MAGIC_NUM {
            return Err(anyhow!("Invalid magic number"));
        }
        let version = read_u32(data, 4);
        if version != META_VERSION_V1 {
            return Err(anyhow!("Unsupported meta version {}", version));
        }

        Ok(Self {
            meta: LogManagerMeta {
                last_log_index: read_u64(data, 8) as i64,
                last_log_term: read_u64(data, 16) as i64,
                commit_log_index: read_u64(data, 24) as i64,
            },
            generation: read_u64(data, 32),
            head_offset: read_u64(data, 40),
            removed_count: read_u64(data, 48),
        })
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

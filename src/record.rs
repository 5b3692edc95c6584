//! Replicated log records.
//!
//! A record is a chain-linking header (`index`, `term`, `prev_index`,
//! `prev_term`) followed by a payload whose shape is selected by its
//! [`LogKind`]. The body layout written by [`LogRecord::serialize`] is:
//!
//! ```text
//! | index i64 | term i64 | prev_index i64 | prev_term i64 | kind u8 | payload ... |
//! ```
//!
//! All integers are little-endian. The payload is encoded per kind.

use anyhow::{Result, anyhow};
use tracing::warn;

use crate::types::{LogIndex, NO_INDEX, Node, Term};

/// Size of the fixed chain header preceding the payload.
pub const RECORD_HEADER_SIZE: usize = 8 * 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    AddNode,
    RemoveNode,
    PhysicalPlan,
    CloseFile,
}

impl LogKind {
    pub fn code(self) -> u8 {
        match self {
            LogKind::AddNode => 0,
            LogKind::RemoveNode => 1,
            LogKind::PhysicalPlan => 2,
            LogKind::CloseFile => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LogKind::AddNode),
            1 => Some(LogKind::RemoveNode),
            2 => Some(LogKind::PhysicalPlan),
            3 => Some(LogKind::CloseFile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogPayload {
    AddNode {
        node: Node,
    },
    RemoveNode {
        node: Node,
    },
    /// Serialized state machine operation, opaque to the log.
    PhysicalPlan {
        plan: Vec<u8>,
    },
    CloseFile {
        storage_group: String,
        is_seq: bool,
        partition_id: i64,
    },
}

impl LogPayload {
    pub fn kind(&self) -> LogKind {
        match self {
            LogPayload::AddNode { .. } => LogKind::AddNode,
            LogPayload::RemoveNode { .. } => LogKind::RemoveNode,
            LogPayload::PhysicalPlan { .. } => LogKind::PhysicalPlan,
            LogPayload::CloseFile { .. } => LogKind::CloseFile,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        let config = bincode::config::standard();
        match self {
            LogPayload::AddNode { node } | LogPayload::RemoveNode { node } => {
                buf.extend_from_slice(&bincode::encode_to_vec(node, config)?);
            }
            // plans arrive already serialized
            LogPayload::PhysicalPlan { plan } => buf.extend_from_slice(plan),
            LogPayload::CloseFile {
                storage_group,
                is_seq,
                partition_id,
            } => {
                let body = (storage_group.as_str(), *is_seq, *partition_id);
                buf.extend_from_slice(&bincode::encode_to_vec(body, config)?);
            }
        }
        Ok(())
    }

    fn decode(kind: LogKind, data: &[u8]) -> Result<Self> {
        let config = bincode::config::standard();
        let (payload, used) = match kind {
            LogKind::AddNode => {
                let (node, used) = bincode::decode_from_slice::<Node, _>(data, config)?;
                (LogPayload::AddNode { node }, used)
            }
            LogKind::RemoveNode => {
                let (node, used) = bincode::decode_from_slice::<Node, _>(data, config)?;
                (LogPayload::RemoveNode { node }, used)
            }
            LogKind::PhysicalPlan => (
                LogPayload::PhysicalPlan {
                    plan: data.to_vec(),
                },
                data.len(),
            ),
            LogKind::CloseFile => {
                let ((storage_group, is_seq, partition_id), used) =
                    bincode::decode_from_slice::<(String, bool, i64), _>(data, config)?;
                (
                    LogPayload::CloseFile {
                        storage_group,
                        is_seq,
                        partition_id,
                    },
                    used,
                )
            }
        };
        if used != data.len() {
            return Err(anyhow!(
                "{} trailing bytes after {:?} payload",
                data.len() - used,
                kind
            ));
        }
        Ok(payload)
    }
}

/// The position a newly appended record has to link to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTail {
    /// Nothing has ever been appended.
    Empty,
    /// Index and term of the current last entry (or seeded/snapshot boundary).
    At(LogIndex, Term),
}

/// One entry of the replicated log. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogRecord {
    index: LogIndex,
    term: Term,
    prev_index: LogIndex,
    prev_term: Term,
    payload: LogPayload,
}

impl LogRecord {
    pub fn new(
        index: LogIndex,
        term: Term,
        prev_index: LogIndex,
        prev_term: Term,
        payload: LogPayload,
    ) -> Self {
        Self {
            index,
            term,
            prev_index,
            prev_term,
            payload,
        }
    }

    pub fn index(&self) -> LogIndex {
        self.index
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    pub fn prev_term(&self) -> Term {
        self.prev_term
    }

    pub fn payload(&self) -> &LogPayload {
        &self.payload
    }

    pub fn kind(&self) -> LogKind {
        self.payload.kind()
    }

    /// True if this record may be appended directly after `prev`.
    pub fn follows(&self, prev: &LogRecord) -> bool {
        self.is_successor() && self.prev_index == prev.index && self.prev_term == prev.term
    }

    /// Chain continuity check against the current tail of a log.
    pub fn links_to(&self, tail: ChainTail) -> bool {
        if !self.is_successor() {
            return false;
        }
        match tail {
            ChainTail::Empty => self.prev_index == NO_INDEX,
            ChainTail::At(index, term) => self.prev_index == index && self.prev_term == term,
        }
    }

    /// Indexes are dense: a record sits right after the one it links to.
    fn is_successor(&self) -> bool {
        self.prev_index.checked_add(1) == Some(self.index)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + 64);
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.term.to_le_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        buf.extend_from_slice(&self.prev_term.to_le_bytes());
        buf.push(self.kind().code());
        self.payload.encode_into(&mut buf).map_err(|e| {
            warn!("Failed to encode payload of log {}: {}", self.index, e);
            e
        })?;
        Ok(buf)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(anyhow!(
                "record body of {} bytes is shorter than its header",
                data.len()
            ));
        }

        let read_i64 = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[at..at + 8]);
            i64::from_le_bytes(bytes)
        };
        let index = read_i64(0);
        let term = read_i64(8);
        let prev_index = read_i64(16);
        let prev_term = read_i64(24);

        let kind = LogKind::from_code(data[32])
            .ok_or_else(|| anyhow!("Invalid log kind {} at index {}", data[32], index))?;
        let payload = LogPayload::decode(kind, &data[RECORD_HEADER_SIZE..]).map_err(|e| {
            warn!("Failed to decode payload of log {}: {}", index, e);
            e
        })?;

        Ok(Self {
            index,
            term,
            prev_index,
            prev_term,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_record(index: LogIndex) -> LogRecord {
        LogRecord::new(
            index,
            index,
            index - 1,
            index - 1,
            LogPayload::PhysicalPlan {
                plan: format!("insert root.sg.d{}", index).into_bytes(),
            },
        )
    }

    #[test]
    fn test_every_kind_survives_serialization() {
        let node = Node::new("localhost", 30001, 1, 40001);
        let payloads = vec![
            LogPayload::AddNode { node: node.clone() },
            LogPayload::RemoveNode { node },
            LogPayload::PhysicalPlan {
                plan: vec![1, 2, 3],
            },
            LogPayload::PhysicalPlan { plan: vec![] },
            LogPayload::CloseFile {
                storage_group: "root.sg1".to_string(),
                is_seq: true,
                partition_id: 7,
            },
        ];

        for (i, payload) in payloads.into_iter().enumerate() {
            let record = LogRecord::new(i as i64, 3, i as i64 - 1, 3, payload);
            let bytes = record.serialize().unwrap();
            assert_eq!(bytes[32], record.kind().code());
            assert_eq!(LogRecord::deserialize(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_deserialize_rejects_short_body() {
        let bytes = plan_record(1).serialize().unwrap();
        assert!(LogRecord::deserialize(&bytes[..RECORD_HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn test_deserialize_rejects_unknown_kind() {
        let mut bytes = plan_record(1).serialize().unwrap();
        bytes[32] = 42;
        assert!(LogRecord::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let record = LogRecord::new(
            0,
            0,
            NO_INDEX,
            -1,
            LogPayload::AddNode {
                node: Node::new("localhost", 30000, 0, 40000),
            },
        );
        let mut bytes = record.serialize().unwrap();
        bytes.push(0xff);
        assert!(LogRecord::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_chain_continuity() {
        let first = plan_record(0);
        let second = plan_record(1);
        let third = plan_record(2);

        assert!(first.links_to(ChainTail::Empty));
        assert!(!second.links_to(ChainTail::Empty));
        assert!(second.follows(&first));
        assert!(!third.follows(&first));
        assert!(third.links_to(ChainTail::At(1, 1)));
        assert!(!third.links_to(ChainTail::At(1, 2)));
    }

    #[test]
    fn test_chain_requires_next_index() {
        let ninth = plan_record(9);
        // right prev position, but the index goes backward
        let backward = LogRecord::new(3, 9, 9, 9, LogPayload::PhysicalPlan { plan: vec![] });
        let skipping = LogRecord::new(12, 9, 9, 9, LogPayload::PhysicalPlan { plan: vec![] });
        let first_not_zero =
            LogRecord::new(4, 0, NO_INDEX, -1, LogPayload::PhysicalPlan { plan: vec![] });

        assert!(!backward.links_to(ChainTail::At(9, 9)));
        assert!(!backward.follows(&ninth));
        assert!(!skipping.links_to(ChainTail::At(9, 9)));
        assert!(!first_not_zero.links_to(ChainTail::Empty));

        let overflow = LogRecord::new(
            i64::MIN,
            1,
            i64::MAX,
            1,
            LogPayload::PhysicalPlan { plan: vec![] },
        );
        assert!(!overflow.links_to(ChainTail::At(i64::MAX, 1)));
    }

    #[test]
    fn test_equality_covers_payload() {
        let a = plan_record(4);
        let b = LogRecord::new(
            4,
            4,
            3,
            3,
            LogPayload::PhysicalPlan {
                plan: b"something else".to_vec(),
            },
        );
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}

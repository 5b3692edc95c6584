use serde::{Deserialize, Serialize};

use crate::types::{LogIndex, NO_INDEX, NO_TERM, Term};

/// Durable bookkeeping of a log manager ("hard state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogManagerMeta {
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
    pub commit_log_index: LogIndex,
}

impl LogManagerMeta {
    pub fn new(last_log_index: LogIndex, last_log_term: Term, commit_log_index: LogIndex) -> Self {
        Self {
            last_log_index,
            last_log_term,
            commit_log_index,
        }
    }
}

impl Default for LogManagerMeta {
    fn default() -> Self {
        Self {
            last_log_index: NO_INDEX,
            last_log_term: NO_TERM,
            commit_log_index: NO_INDEX,
        }
    }
}

/// Boundary marker of a state machine snapshot.
///
/// The log only cares about the last index/term the snapshot covers; `data`
/// is carried through untouched for providers that want to attach state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_index: LogIndex,
    pub last_term: Term,
    pub data: Vec<u8>,
}

impl Snapshot {
    pub fn new(last_index: LogIndex, last_term: Term) -> Self {
        Self {
            last_index,
            last_term,
            data: Vec::new(),
        }
    }
}

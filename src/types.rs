use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

pub type LogIndex = i64;
pub type Term = i64;

/// Index reported when no entry exists.
pub const NO_INDEX: LogIndex = -1;
/// Term reported when no entry exists.
pub const NO_TERM: Term = -1;

/// A cluster member as carried by membership change records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Node {
    pub ip: String,
    pub meta_port: i32,
    pub node_identifier: i32,
    pub data_port: i32,
}

impl Node {
    pub fn new(ip: impl Into<String>, meta_port: i32, node_identifier: i32, data_port: i32) -> Self {
        Self {
            ip: ip.into(),
            meta_port,
            node_identifier,
            data_port,
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}(data {})",
            self.ip, self.meta_port, self.node_identifier, self.data_port
        )
    }
}

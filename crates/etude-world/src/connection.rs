//! Directed edges between node ports.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Buffer size used when a connection is made without an explicit one.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// `source:source_port -> dest:dest_port` with a buffer budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub source_port: usize,
    pub dest: NodeId,
    pub dest_port: usize,
    pub buffer_size: usize,
}

impl Connection {
    pub fn new(source: NodeId, source_port: usize, dest: NodeId, dest_port: usize) -> Self {
        Self {
            source,
            source_port,
            dest,
            dest_port,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.source == node || self.dest == node
    }

    /// Same four endpoints, buffer size ignored.
    pub fn same_endpoints(&self, other: &Connection) -> bool {
        self.source == other.source
            && self.source_port == other.source_port
            && self.dest == other.dest
            && self.dest_port == other.dest_port
    }

    /// Rewrite every endpoint equal to `from` to `to`.
    pub(crate) fn remap(&mut self, from: NodeId, to: NodeId) {
        if self.source == from {
            self.source = to;
        }
        if self.dest == from {
            self.dest = to;
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source, self.source_port, self.dest, self.dest_port
        )
    }
}

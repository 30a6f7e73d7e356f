//! Connections between node ports

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a connection within a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed, weighted edge from an output port to an input port
///
/// The value delivered to the target is `source output * amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source_node_id: NodeId,
    pub source_port_index: usize,
    pub target_node_id: NodeId,
    pub target_port_index: usize,
    #[serde(default = "unity")]
    pub amount: f32,
}

fn unity() -> f32 {
    1.0
}

impl Connection {
    /// Whether either endpoint is the given node
    pub fn touches(&self, node: &str) -> bool {
        self.source_node_id.as_str() == node || self.target_node_id.as_str() == node
    }

    /// Whether this connection feeds the given input port
    pub fn feeds(&self, node: &str, port: usize) -> bool {
        self.target_node_id.as_str() == node && self.target_port_index == port
    }

    /// Whether this connection reads the given output port
    pub fn reads(&self, node: &str, port: usize) -> bool {
        self.source_node_id.as_str() == node && self.source_port_index == port
    }
}

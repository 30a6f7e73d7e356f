//! Node identity and wiring, without the node objects themselves.
//!
//! Both the single-threaded [`Graph`](crate::graph::Graph) and the real-time
//! editor keep their structure here, so connection rules live in one place:
//! each input port has at most one feeding connection, and a new connection
//! into a connected input replaces the old one.

use crate::connection::{Connection, ConnectionId};
use crate::node::NodeId;
use crate::schedule::{Edge, NodeKey, Schedule};
use slotmap::SlotMap;
use std::collections::HashMap;

/// Result of a successful connect
#[derive(Debug, Clone)]
pub struct Wired {
    pub connection: Connection,
    /// The connection that previously fed the same input, now removed
    pub replaced: Option<Connection>,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    keys: SlotMap<NodeKey, NodeId>,
    index: HashMap<NodeId, NodeKey>,
    registration: Vec<NodeKey>,
    connections: Vec<Connection>,
    next_connection_id: u64,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node id. The caller guarantees it is not already present.
    pub fn insert(&mut self, id: NodeId) -> NodeKey {
        let key = self.keys.insert(id.clone());
        self.index.insert(id, key);
        self.registration.push(key);
        key
    }

    pub fn key(&self, id: &str) -> Option<NodeKey> {
        self.index.get(id).copied()
    }

    pub fn id(&self, key: NodeKey) -> Option<&NodeId> {
        self.keys.get(key)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.registration.len()
    }

    /// Node keys in registration order
    pub fn keys(&self) -> &[NodeKey] {
        &self.registration
    }

    /// Unregister a node and every connection touching it
    pub fn remove(&mut self, id: &str) -> Option<(NodeKey, Vec<Connection>)> {
        let key = self.index.remove(id)?;
        self.keys.remove(key);
        self.registration.retain(|&k| k != key);

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.touches(id));
        self.connections = kept;
        Some((key, removed))
    }

    /// Connect an output to an input, replacing any connection into that input.
    ///
    /// `id` reuses a known connection id (patch loading); otherwise a fresh one
    /// is allocated. None if either node is unknown.
    pub fn connect(
        &mut self,
        source: &str,
        source_port: usize,
        target: &str,
        target_port: usize,
        amount: f32,
        id: Option<ConnectionId>,
    ) -> Option<Wired> {
        let source_id = self.keys.get(self.key(source)?)?.clone();
        let target_id = self.keys.get(self.key(target)?)?.clone();

        let replaced = self
            .connections
            .iter()
            .position(|c| c.feeds(target, target_port))
            .map(|i| self.connections.remove(i));

        let id = match id {
            Some(id) if !self.connections.iter().any(|c| c.id == id) => {
                self.next_connection_id = self.next_connection_id.max(id.0 + 1);
                id
            }
            _ => self.allocate_id(),
        };

        let connection = Connection {
            id,
            source_node_id: source_id,
            source_port_index: source_port,
            target_node_id: target_id,
            target_port_index: target_port,
            amount,
        };
        self.connections.push(connection.clone());
        Some(Wired {
            connection,
            replaced,
        })
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> Option<Connection> {
        let i = self.connections.iter().position(|c| c.id == id)?;
        Some(self.connections.remove(i))
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    pub fn input_in_use(&self, node: &str, port: usize) -> bool {
        self.connections.iter().any(|c| c.feeds(node, port))
    }

    pub fn output_in_use(&self, node: &str, port: usize) -> bool {
        self.connections.iter().any(|c| c.reads(node, port))
    }

    /// Build the execution plan for the current structure
    pub fn schedule(&self) -> Schedule {
        let edges: Vec<Edge> = self
            .connections
            .iter()
            .filter_map(|c| {
                Some(Edge {
                    source: self.key(c.source_node_id.as_str())?,
                    source_port: c.source_port_index,
                    target: self.key(c.target_node_id.as_str())?,
                    target_port: c.target_port_index,
                    amount: c.amount,
                })
            })
            .collect();
        Schedule::build(&self.registration, &edges)
    }

    fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        id
    }
}

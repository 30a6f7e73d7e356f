//! Patch Graph
//!
//! Owns a set of nodes and the connections between them, keeps a cached
//! processing order, and drives the per-block execution pass.
//!
//! The order is derived data: every structural edit marks it stale and the
//! next [`Graph::process`] rebuilds it. Cycles are never an error; see
//! [`crate::schedule`] for how feedback edges are ordered.
//!
//! `Graph` is single-threaded. Hosts that edit from a UI thread while audio
//! renders can wrap it in a mutex, or use the lock-free pair in
//! `crate::realtime`.

use crate::connection::{Connection, ConnectionId};
use crate::node::{Node, NodeId};
use crate::port::PortDirection;
use crate::schedule::{NodeKey, Schedule};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Descriptive metadata of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub created_at: u64,
}

impl GraphInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            author: String::new(),
            created_at,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

/// The main patch graph
pub struct Graph {
    info: GraphInfo,
    topology: Topology,
    nodes: SecondaryMap<NodeKey, Box<dyn Node>>,
    schedule: Schedule,
    order_is_stale: bool,
}

impl Graph {
    /// Create an empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_info(GraphInfo::new(id, name))
    }

    pub fn with_info(info: GraphInfo) -> Self {
        Self {
            info,
            topology: Topology::new(),
            nodes: SecondaryMap::new(),
            schedule: Schedule::default(),
            order_is_stale: true,
        }
    }

    pub fn info(&self) -> &GraphInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut GraphInfo {
        &mut self.info
    }

    /// Add a node to the graph
    pub fn add<N: Node + 'static>(&mut self, node: N) {
        self.add_node(Box::new(node));
    }

    /// Add a boxed node to the graph.
    ///
    /// Ids are expected to be unique; a node whose id is already present
    /// replaces the previous one.
    pub fn add_node(&mut self, node: Box<dyn Node>) {
        let id = node.id().clone();
        if self.topology.contains(id.as_str()) {
            warn!(node = %id, "duplicate node id, replacing existing node");
            self.remove_node(id.as_str());
        }
        debug!(node = %id, kind = node.type_name(), "node added");
        let key = self.topology.insert(id);
        self.nodes.insert(key, node);
        self.invalidate();
    }

    /// Remove and dispose a node, along with every connection touching it
    pub fn remove_node(&mut self, id: &str) -> bool {
        let Some((key, removed)) = self.topology.remove(id) else {
            return false;
        };
        if let Some(mut node) = self.nodes.remove(key) {
            node.dispose();
        }
        for connection in &removed {
            self.refresh_port_flags(connection);
        }
        debug!(node = id, connections = removed.len(), "node removed");
        self.invalidate();
        true
    }

    /// Connect an output port to an input port.
    ///
    /// Returns None if either node is unknown. An existing connection into
    /// the same input is replaced.
    pub fn connect(
        &mut self,
        source: &str,
        source_port: usize,
        target: &str,
        target_port: usize,
        amount: f32,
    ) -> Option<Connection> {
        self.connect_with_id(source, source_port, target, target_port, amount, None)
    }

    pub(crate) fn connect_with_id(
        &mut self,
        source: &str,
        source_port: usize,
        target: &str,
        target_port: usize,
        amount: f32,
        id: Option<ConnectionId>,
    ) -> Option<Connection> {
        let wired = self
            .topology
            .connect(source, source_port, target, target_port, amount, id)?;

        if let Some(old) = &wired.replaced {
            debug!(connection = %old.id, "connection replaced");
            self.refresh_port_flags(old);
        }
        self.refresh_port_flags(&wired.connection);

        debug!(
            connection = %wired.connection.id,
            from = source,
            to = target,
            "connected"
        );
        self.invalidate();
        Some(wired.connection)
    }

    /// Remove a connection; false if the id is unknown
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.topology.disconnect(id) else {
            return false;
        };
        self.refresh_port_flags(&connection);
        debug!(connection = %id, "disconnected");
        self.invalidate();
        true
    }

    /// Run one block.
    ///
    /// Rebuilds the processing order if the topology changed, then, for each
    /// enabled node in order, pulls its incoming connections into its inputs
    /// and processes it.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize, sample_rate: u32) {
        self.ensure_schedule();
        let frames = frames.min(buffer.len());
        self.schedule
            .run(&mut self.nodes, &mut buffer[..frames], frames, sample_rate);
    }

    /// Reset every node; topology is untouched
    pub fn reset(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            node.reset();
        }
    }

    /// Processing order, recomputed first if stale
    pub fn processing_order(&mut self) -> Vec<NodeId> {
        self.ensure_schedule();
        self.schedule
            .order()
            .filter_map(|key| self.topology.id(key).cloned())
            .collect()
    }

    /// Edges dropped from the ordering to break feedback loops
    pub fn feedback_edges(&mut self) -> usize {
        self.ensure_schedule();
        self.schedule.feedback_edges()
    }

    pub fn is_order_stale(&self) -> bool {
        self.order_is_stale
    }

    pub fn node(&self, id: &str) -> Option<&dyn Node> {
        let key = self.topology.key(id)?;
        self.nodes.get(key).map(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut (dyn Node + 'static)> {
        let key = self.topology.key(id)?;
        match self.nodes.get_mut(key) {
            Some(node) => Some(node.as_mut()),
            None => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.topology.contains(id)
    }

    /// Nodes in registration order
    pub fn nodes(&self) -> impl Iterator<Item = &dyn Node> + '_ {
        self.topology
            .keys()
            .iter()
            .filter_map(|&key| self.nodes.get(key).map(|n| n.as_ref()))
    }

    pub fn node_count(&self) -> usize {
        self.topology.len()
    }

    pub fn connections(&self) -> &[Connection] {
        self.topology.connections()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.topology.connection(id)
    }

    pub fn connection_count(&self) -> usize {
        self.topology.connections().len()
    }

    /// Connections feeding any input of the given node
    pub fn connections_into<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.topology
            .connections()
            .iter()
            .filter(move |c| c.target_node_id.as_str() == id)
    }

    /// Set a parameter on a node; false if the node or parameter is unknown
    pub fn set_parameter(&mut self, node: &str, name: &str, value: f32) -> bool {
        self.node_mut(node)
            .is_some_and(|n| n.set_parameter(name, value))
    }

    /// Enable or bypass a node; false if the node is unknown
    pub fn set_enabled(&mut self, node: &str, enabled: bool) -> bool {
        match self.node_mut(node) {
            Some(n) => {
                n.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    fn invalidate(&mut self) {
        self.order_is_stale = true;
    }

    fn ensure_schedule(&mut self) {
        if !self.order_is_stale {
            return;
        }
        self.schedule = self.topology.schedule();
        self.order_is_stale = false;
        debug!(
            nodes = self.schedule.len(),
            connections = self.topology.connections().len(),
            feedback_edges = self.schedule.feedback_edges(),
            "processing order rebuilt"
        );
    }

    /// Recompute `is_connected` on both endpoints of a connection
    fn refresh_port_flags(&mut self, connection: &Connection) {
        let source = connection.source_node_id.as_str();
        let target = connection.target_node_id.as_str();
        let out_used = self
            .topology
            .output_in_use(source, connection.source_port_index);
        let in_used = self
            .topology
            .input_in_use(target, connection.target_port_index);

        if let Some(node) = self.node_mut(source) {
            node.mark_connected(PortDirection::Output, connection.source_port_index, out_used);
        }
        if let Some(node) = self.node_mut(target) {
            node.mark_connected(PortDirection::Input, connection.target_port_index, in_used);
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            node.dispose();
        }
    }
}

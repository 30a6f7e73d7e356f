//! Lock-free editing while audio renders.
//!
//! [`split`] returns two halves of one graph. The [`GraphEditor`] lives on the
//! UI or control thread and owns the staging topology; the [`GraphRenderer`]
//! lives on the audio thread and owns the node objects.
//!
//! Nodes and small state changes travel to the renderer over a channel that
//! the renderer drains without blocking at the start of every block. The
//! processing plan is rebuilt on the editing side and published through an
//! `ArcSwap` on [`GraphEditor::commit`]. Removed nodes are disposed on the
//! render side and handed back over a bounded channel so the editing side
//! frees them. Replaced schedules stay referenced by the editor until
//! [`GraphEditor::collect_garbage`] sees the renderer has let go, so a
//! schedule is never freed on the audio thread either.
//!
//! Inserts are sent before any schedule naming them is published, and
//! removals are sent only after a schedule without them is published, so the
//! renderer never runs a plan pointing at a node it has already dropped. A
//! plan step whose node has not arrived yet is skipped for that block.

use crate::connection::{Connection, ConnectionId};
use crate::node::{Node, NodeId};
use crate::port::PortDirection;
use crate::schedule::{NodeKey, Schedule};
use crate::topology::Topology;
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::Deserialize;
use slotmap::SecondaryMap;
use std::sync::Arc;
use tracing::debug;

/// Runtime sizing of the renderer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Node slots reserved up front on the render side
    pub node_capacity: usize,
    /// Disposed nodes that can wait for [`GraphEditor::collect_garbage`]
    /// before the renderer starts dropping them itself
    pub garbage_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            node_capacity: 256,
            garbage_capacity: 64,
        }
    }
}

/// Messages from the editor to the renderer
enum Command {
    Insert {
        key: NodeKey,
        node: Box<dyn Node>,
    },
    Remove {
        key: NodeKey,
    },
    Link {
        key: NodeKey,
        direction: PortDirection,
        port: usize,
        connected: bool,
    },
    SetParameter {
        key: NodeKey,
        index: usize,
        value: f32,
    },
    SetEnabled {
        key: NodeKey,
        enabled: bool,
    },
    ResetAll,
}

/// Create a connected editor/renderer pair for an empty graph
pub fn split(config: RealtimeConfig) -> (GraphEditor, GraphRenderer) {
    let (command_tx, command_rx) = unbounded();
    let (garbage_tx, garbage_rx) = bounded(config.garbage_capacity.max(1));
    let schedule = Arc::new(ArcSwap::from_pointee(Schedule::default()));

    let editor = GraphEditor {
        topology: Topology::new(),
        parameters: SecondaryMap::new(),
        commands: command_tx,
        garbage: garbage_rx,
        schedule: Arc::clone(&schedule),
        retired: Vec::new(),
        pending_removals: Vec::new(),
        dirty: false,
    };
    let renderer = GraphRenderer {
        nodes: SecondaryMap::with_capacity(config.node_capacity),
        commands: command_rx,
        garbage: garbage_tx,
        schedule,
    };
    (editor, renderer)
}

/// Editing half: structure, parameters and commits
pub struct GraphEditor {
    topology: Topology,
    /// Parameter names per node, to address parameters by index
    parameters: SecondaryMap<NodeKey, Vec<String>>,
    commands: Sender<Command>,
    garbage: Receiver<Box<dyn Node>>,
    schedule: Arc<ArcSwap<Schedule>>,
    /// Replaced schedules the renderer may still be running
    retired: Vec<Arc<Schedule>>,
    pending_removals: Vec<NodeKey>,
    dirty: bool,
}

impl GraphEditor {
    pub fn add<N: Node + 'static>(&mut self, node: N) {
        self.add_node(Box::new(node));
    }

    /// Hand a node to the renderer. It runs once a commit includes it.
    ///
    /// Removals still waiting for a commit are committed first: the node may
    /// land in a recycled slot, and the renderer must have let go of the old
    /// occupant before the new one arrives.
    pub fn add_node(&mut self, node: Box<dyn Node>) {
        let id = node.id().clone();
        if self.topology.contains(id.as_str()) {
            debug!(node = %id, "duplicate node id, replacing existing node");
            self.remove_node(id.as_str());
        }
        if !self.pending_removals.is_empty() {
            self.commit();
        }

        let key = self.topology.insert(id.clone());
        self.parameters.insert(
            key,
            node.parameters().iter().map(|p| p.name.clone()).collect(),
        );
        debug!(node = %id, kind = node.type_name(), "node staged");
        self.send(Command::Insert { key, node });
        self.dirty = true;
    }

    /// Remove a node and its connections; the renderer lets go of it on the
    /// next commit
    pub fn remove_node(&mut self, id: &str) -> bool {
        let Some((key, removed)) = self.topology.remove(id) else {
            return false;
        };
        self.parameters.remove(key);
        for connection in &removed {
            self.send_port_flags(connection);
        }
        self.pending_removals.push(key);
        self.dirty = true;
        debug!(node = id, connections = removed.len(), "node removal staged");
        true
    }

    /// Connect an output to an input, replacing any connection into that input
    pub fn connect(
        &mut self,
        source: &str,
        source_port: usize,
        target: &str,
        target_port: usize,
        amount: f32,
    ) -> Option<Connection> {
        let wired = self
            .topology
            .connect(source, source_port, target, target_port, amount, None)?;
        if let Some(old) = &wired.replaced {
            self.send_port_flags(old);
        }
        self.send_port_flags(&wired.connection);
        self.dirty = true;
        Some(wired.connection)
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.topology.disconnect(id) else {
            return false;
        };
        self.send_port_flags(&connection);
        self.dirty = true;
        true
    }

    /// Queue a parameter change; false if the node or parameter is unknown.
    /// Takes effect at the start of the renderer's next block, no commit needed.
    pub fn set_parameter(&mut self, node: &str, name: &str, value: f32) -> bool {
        let Some(key) = self.topology.key(node) else {
            return false;
        };
        let Some(index) = self
            .parameters
            .get(key)
            .and_then(|names| names.iter().position(|n| n == name))
        else {
            return false;
        };
        self.send(Command::SetParameter { key, index, value });
        true
    }

    pub fn set_enabled(&mut self, node: &str, enabled: bool) -> bool {
        let Some(key) = self.topology.key(node) else {
            return false;
        };
        self.send(Command::SetEnabled { key, enabled });
        true
    }

    /// Reset every node on the render side
    pub fn reset(&mut self) {
        self.send(Command::ResetAll);
    }

    /// Publish the staged structure to the renderer.
    ///
    /// Returns false when nothing structural changed since the last commit.
    pub fn commit(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let schedule = self.topology.schedule();
        debug!(
            nodes = schedule.len(),
            connections = self.topology.connections().len(),
            feedback_edges = schedule.feedback_edges(),
            "schedule published"
        );
        let previous = self.schedule.swap(Arc::new(schedule));
        self.retired.push(previous);

        for key in std::mem::take(&mut self.pending_removals) {
            self.send(Command::Remove { key });
        }
        self.dirty = false;
        true
    }

    /// Free nodes the renderer has disposed and schedules it no longer
    /// holds; returns how many nodes were freed
    pub fn collect_garbage(&mut self) -> usize {
        self.retired.retain(|schedule| Arc::strong_count(schedule) > 1);
        self.garbage.try_iter().count()
    }

    /// Processing order of the staged structure
    pub fn processing_order(&self) -> Vec<NodeId> {
        self.topology
            .schedule()
            .order()
            .filter_map(|key| self.topology.id(key).cloned())
            .collect()
    }

    /// True if structural edits are waiting for [`commit`](Self::commit)
    pub fn has_uncommitted_changes(&self) -> bool {
        self.dirty
    }

    pub fn contains(&self, id: &str) -> bool {
        self.topology.contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.topology.len()
    }

    pub fn connections(&self) -> &[Connection] {
        self.topology.connections()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("renderer dropped, command discarded");
        }
    }

    fn send_port_flags(&self, connection: &Connection) {
        let endpoints = [
            (
                connection.source_node_id.as_str(),
                PortDirection::Output,
                connection.source_port_index,
            ),
            (
                connection.target_node_id.as_str(),
                PortDirection::Input,
                connection.target_port_index,
            ),
        ];
        for (node, direction, port) in endpoints {
            let Some(key) = self.topology.key(node) else {
                continue;
            };
            let connected = match direction {
                PortDirection::Output => self.topology.output_in_use(node, port),
                PortDirection::Input => self.topology.input_in_use(node, port),
            };
            self.send(Command::Link {
                key,
                direction,
                port,
                connected,
            });
        }
    }
}

/// Rendering half: owns the nodes, runs the published schedule
pub struct GraphRenderer {
    nodes: SecondaryMap<NodeKey, Box<dyn Node>>,
    commands: Receiver<Command>,
    garbage: Sender<Box<dyn Node>>,
    schedule: Arc<ArcSwap<Schedule>>,
}

impl GraphRenderer {
    /// Apply pending edits, then run one block. Never blocks.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize, sample_rate: u32) {
        self.apply_commands();
        let schedule = self.schedule.load();
        let frames = frames.min(buffer.len());
        schedule.run(&mut self.nodes, &mut buffer[..frames], frames, sample_rate);
    }

    /// Look a node up by id. Linear; meant for inspection, not the audio path.
    pub fn node(&self, id: &str) -> Option<&dyn Node> {
        self.nodes
            .values()
            .find(|n| n.id().as_str() == id)
            .map(|n| n.as_ref())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Insert { key, node } => {
                    if let Some(old) = self.nodes.insert(key, node) {
                        self.retire(old);
                    }
                }
                Command::Remove { key } => {
                    if let Some(node) = self.nodes.remove(key) {
                        self.retire(node);
                    }
                }
                Command::Link {
                    key,
                    direction,
                    port,
                    connected,
                } => {
                    if let Some(node) = self.nodes.get_mut(key) {
                        node.mark_connected(direction, port, connected);
                    }
                }
                Command::SetParameter { key, index, value } => {
                    if let Some(node) = self.nodes.get_mut(key) {
                        node.base_mut().set_parameter_at(index, value);
                    }
                }
                Command::SetEnabled { key, enabled } => {
                    if let Some(node) = self.nodes.get_mut(key) {
                        node.set_enabled(enabled);
                    }
                }
                Command::ResetAll => {
                    for (_, node) in self.nodes.iter_mut() {
                        node.reset();
                    }
                }
            }
        }
    }

    /// Dispose a node and hand it back for freeing. If the editor is not
    /// collecting, it is dropped here.
    fn retire(&self, mut node: Box<dyn Node>) {
        node.dispose();
        let _ = self.garbage.try_send(node);
    }
}

impl Drop for GraphRenderer {
    fn drop(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            node.dispose();
        }
    }
}

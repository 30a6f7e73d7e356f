//! Node Registry
//!
//! A name-keyed catalog of constructible node types, used by editors to list
//! what can be added and by the patch loader to rebuild nodes by type name.

use crate::node::{Node, NodeId};
use crate::nodes::{
    AudioOutput, Constant, Envelope, Filter, Gain, Mixer, Noise, Oscillator, Sequencer,
};
use crate::port::Port;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Node factory function type
pub type NodeFactory = Box<dyn Fn(NodeId) -> Box<dyn Node> + Send + Sync>;

/// Metadata about a registered node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    pub type_name: String,
    pub display_name: String,
    pub category: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub parameters: Vec<String>,
}

/// Registry of node types available for instantiation
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
    types: BTreeMap<String, TypeInfo>,
    next_id: AtomicU64,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            types: BTreeMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a registry holding the built-in node types
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtin();
        registry
    }

    fn register_builtin(&mut self) {
        // Sources
        self.register_node_type(
            Constant::TYPE_NAME,
            "Constant",
            "Sources",
            "Fixed control value",
            |id| Box::new(Constant::new(id, 0.0)),
        );

        self.register_node_type(
            Noise::TYPE_NAME,
            "Noise",
            "Sources",
            "Seeded white noise",
            |id| Box::new(Noise::new(id)),
        );

        // Oscillators
        self.register_node_type(
            Oscillator::TYPE_NAME,
            "Oscillator",
            "Oscillators",
            "Sine, triangle, saw and square oscillator with FM and sync",
            |id| Box::new(Oscillator::new(id)),
        );

        // Filters
        self.register_node_type(
            Filter::TYPE_NAME,
            "Low-pass Filter",
            "Filters",
            "One-pole low-pass filter",
            |id| Box::new(Filter::new(id)),
        );

        // Envelopes
        self.register_node_type(
            Envelope::TYPE_NAME,
            "ADSR Envelope",
            "Envelopes",
            "Attack-Decay-Sustain-Release envelope generator",
            |id| Box::new(Envelope::new(id)),
        );

        // Utilities
        self.register_node_type(
            Gain::TYPE_NAME,
            "Gain",
            "Utilities",
            "Amplifier with control-voltage input",
            |id| Box::new(Gain::new(id)),
        );

        self.register_node_type(
            Mixer::TYPE_NAME,
            "Mixer",
            "Utilities",
            "4-channel mixer",
            |id| Box::new(Mixer::new(id)),
        );

        // Sequencing
        self.register_node_type(
            Sequencer::TYPE_NAME,
            "Step Sequencer",
            "Sequencing",
            "8-step CV/gate sequencer",
            |id| Box::new(Sequencer::new(id)),
        );

        // Output
        self.register_node_type(
            AudioOutput::TYPE_NAME,
            "Audio Output",
            "I/O",
            "Mixes its input into the host buffer",
            |id| Box::new(AudioOutput::new(id)),
        );
    }

    /// Register a node factory with metadata, replacing any previous entry
    pub fn register_node_type<F>(
        &mut self,
        type_name: &str,
        display_name: &str,
        category: &str,
        description: &str,
        factory: F,
    ) where
        F: Fn(NodeId) -> Box<dyn Node> + Send + Sync + 'static,
    {
        // Port and parameter names come from a throwaway instance
        let mut probe = factory(NodeId::from("probe"));
        let names = |ports: &[Port]| -> Vec<String> {
            ports.iter().map(|p| p.name.clone()).collect()
        };
        let info = TypeInfo {
            type_name: type_name.to_string(),
            display_name: display_name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            inputs: names(probe.inputs()),
            outputs: names(probe.outputs()),
            parameters: probe.parameters().iter().map(|p| p.name.clone()).collect(),
        };
        probe.dispose();

        debug!(kind = type_name, category, "node type registered");
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        self.types.insert(type_name.to_string(), info);
    }

    /// Instantiate a node with a freshly generated id of the form `<type>-<n>`
    pub fn create_node(&self, type_name: &str) -> Option<Box<dyn Node>> {
        if !self.factories.contains_key(type_name) {
            return None;
        }
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.create_node_with_id(type_name, NodeId::new(format!("{type_name}-{n}")))
    }

    /// Instantiate a node with a caller-supplied id (patch loading).
    ///
    /// The node's type name is set to `type_name`, so a saved patch reloads
    /// through the same registration. Generated ids are advanced past a numeric `-<n>` suffix on `id`, so
    /// later [`create_node`](Self::create_node) calls do not collide with it.
    pub fn create_node_with_id(&self, type_name: &str, id: NodeId) -> Option<Box<dyn Node>> {
        let factory = self.factories.get(type_name)?;
        if let Some(n) = id
            .as_str()
            .rsplit_once('-')
            .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
        {
            self.next_id.fetch_max(n.saturating_add(1), Ordering::Relaxed);
        }

        let mut node = factory(id);
        // Saved patches name the registration, whatever the factory builds
        node.base_mut().set_type_name(type_name);
        if let Some(info) = self.types.get(type_name) {
            node.set_display_name(&info.display_name);
        }
        Some(node)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Metadata for a specific node type
    pub fn type_info(&self, type_name: &str) -> Option<&TypeInfo> {
        self.types.get(type_name)
    }

    /// All registered types, sorted by type name
    pub fn list_all_types(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.values()
    }

    /// Types in a specific category, sorted by type name
    pub fn list_types_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a TypeInfo> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// All unique categories, sorted
    pub fn list_categories(&self) -> Vec<String> {
        let mut cats: Vec<_> = self.types.values().map(|t| t.category.clone()).collect();
        cats.sort();
        cats.dedup();
        cats
    }
}

/// An empty registry, same as [`NodeRegistry::new`]
impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

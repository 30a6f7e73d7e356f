//! Serialization and Persistence
//!
//! Patch documents describe a graph completely enough to rebuild it through a
//! [`NodeRegistry`]: graph metadata, each node's type, id, display name,
//! enabled flag and parameter values, and every connection.
//!
//! Loading is forgiving. A node of an unknown type or a repeated id, a
//! parameter the node does not have, or a connection to a node that was
//! skipped is reported as a [`LoadIssue`] and the rest of the patch still
//! loads.

use crate::connection::Connection;
use crate::error::{GraphError, LoadIssue, Result};
use crate::graph::{Graph, GraphInfo};
use crate::node::{Node, NodeId};
use crate::registry::NodeRegistry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Current patch document version
pub const PATCH_VERSION: u32 = 1;

fn current_version() -> u32 {
    PATCH_VERSION
}

fn enabled() -> bool {
    true
}

/// Serializable patch definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDef {
    /// Schema version for forward compatibility
    #[serde(default = "current_version")]
    pub version: u32,

    pub graph: GraphInfo,

    #[serde(default)]
    pub nodes: Vec<NodeDef>,

    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl PatchDef {
    /// Create an empty patch definition
    pub fn new(info: GraphInfo) -> Self {
        Self {
            version: PATCH_VERSION,
            graph: info,
            nodes: vec![],
            connections: vec![],
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Serializable node instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    pub id: NodeId,
    pub type_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub parameters: Vec<ParamValue>,
}

impl NodeDef {
    fn capture(node: &dyn Node) -> Self {
        Self {
            id: node.id().clone(),
            type_name: node.type_name().to_string(),
            display_name: node.display_name().to_string(),
            is_enabled: node.is_enabled(),
            parameters: node
                .parameters()
                .iter()
                .map(|p| ParamValue {
                    name: p.name.clone(),
                    value: p.value(),
                })
                .collect(),
        }
    }
}

/// A stored parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub name: String,
    pub value: f32,
}

/// A loaded graph plus everything that had to be skipped
pub struct LoadReport {
    pub graph: Graph,
    pub issues: Vec<LoadIssue>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Extension methods for Graph to support serialization
impl Graph {
    /// Convert the graph to a serializable definition
    pub fn to_def(&self) -> PatchDef {
        PatchDef {
            version: PATCH_VERSION,
            graph: self.info().clone(),
            nodes: self.nodes().map(NodeDef::capture).collect(),
            connections: self.connections().to_vec(),
        }
    }

    /// Serialize the graph to a JSON patch document
    pub fn serialize(&self) -> Result<String> {
        self.to_def().to_json()
    }

    /// Rebuild a graph from a definition
    pub fn from_def(def: &PatchDef, registry: &NodeRegistry) -> Result<LoadReport> {
        if def.version > PATCH_VERSION {
            return Err(GraphError::UnsupportedVersion(def.version));
        }

        let mut graph = Graph::with_info(def.graph.clone());
        let mut issues = Vec::new();

        for node_def in &def.nodes {
            // First occurrence wins
            if graph.contains(node_def.id.as_str()) {
                warn!(node = %node_def.id, "duplicate node id, skipping");
                issues.push(LoadIssue::DuplicateNodeId {
                    node_id: node_def.id.to_string(),
                });
                continue;
            }

            let Some(mut node) = registry.create_node_with_id(&node_def.type_name, node_def.id.clone())
            else {
                warn!(node = %node_def.id, kind = %node_def.type_name, "unknown node type, skipping");
                issues.push(LoadIssue::UnknownNodeType {
                    node_id: node_def.id.to_string(),
                    type_name: node_def.type_name.clone(),
                });
                continue;
            };

            for param in &node_def.parameters {
                if !node.set_parameter(&param.name, param.value) {
                    warn!(node = %node_def.id, parameter = %param.name, "unknown parameter, skipping");
                    issues.push(LoadIssue::UnknownParameter {
                        node_id: node_def.id.to_string(),
                        name: param.name.clone(),
                    });
                }
            }
            if !node_def.display_name.is_empty() {
                node.set_display_name(&node_def.display_name);
            }
            node.set_enabled(node_def.is_enabled);
            graph.add_node(node);
        }

        for c in &def.connections {
            let missing = [&c.source_node_id, &c.target_node_id]
                .into_iter()
                .find(|id| !graph.contains(id.as_str()));
            if let Some(missing) = missing {
                warn!(connection = %c.id, node = %missing, "connection endpoint missing, skipping");
                issues.push(LoadIssue::UnresolvedConnection {
                    connection_id: c.id.0,
                    missing: missing.to_string(),
                });
                continue;
            }
            graph.connect_with_id(
                c.source_node_id.as_str(),
                c.source_port_index,
                c.target_node_id.as_str(),
                c.target_port_index,
                c.amount,
                Some(c.id),
            );
        }

        info!(
            graph = %def.graph.id,
            nodes = graph.node_count(),
            connections = graph.connection_count(),
            issues = issues.len(),
            "patch loaded"
        );
        Ok(LoadReport { graph, issues })
    }

    /// Parse a JSON patch document and rebuild the graph
    pub fn load(json: &str, registry: &NodeRegistry) -> Result<LoadReport> {
        let def = PatchDef::from_json(json)?;
        Self::from_def(&def, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;

    fn sample_graph(registry: &NodeRegistry) -> Graph {
        let info = GraphInfo::new("patch-1", "Bass")
            .with_author("Test Author")
            .with_description("A test patch");
        let mut graph = Graph::with_info(info);
        for (type_name, id) in [
            ("oscillator", "osc-1"),
            ("filter", "filter-2"),
            ("audio_output", "out-3"),
            ("envelope", "env-4"),
        ] {
            graph.add_node(
                registry
                    .create_node_with_id(type_name, NodeId::from(id))
                    .unwrap(),
            );
        }
        graph.set_parameter("osc-1", "frequency", 110.0);
        graph.set_parameter("filter-2", "cutoff", 800.0);
        graph.set_enabled("env-4", false);
        graph.node_mut("filter-2").unwrap().set_display_name("Warm LPF");

        graph.connect("osc-1", 0, "filter-2", 0, 0.8).unwrap();
        graph.connect("filter-2", 0, "out-3", 0, 1.0).unwrap();
        graph.connect("env-4", 0, "filter-2", 1, 0.5).unwrap();
        graph
    }

    #[test]
    fn test_patch_def_serialization() {
        let def = PatchDef::new(GraphInfo::new("g", "Test Patch").with_author("Test Author"));
        let json = def.to_json().unwrap();
        let loaded = PatchDef::from_json(&json).unwrap();
        assert_eq!(loaded.graph.name, "Test Patch");
        assert_eq!(loaded.graph.author, "Test Author");
        assert_eq!(loaded, def);
    }

    #[test]
    fn test_json_field_names() {
        let registry = NodeRegistry::with_builtins();
        let graph = sample_graph(&registry);
        let value: serde_json::Value = serde_json::from_str(&graph.serialize().unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["graph"]["id"], "patch-1");
        assert!(value["graph"]["createdAt"].is_u64());
        assert_eq!(value["nodes"][0]["typeName"], "oscillator");
        assert_eq!(value["nodes"][3]["isEnabled"], false);
        assert_eq!(value["connections"][0]["sourceNodeId"], "osc-1");
    }

    #[test]
    fn test_patch_roundtrip() {
        let registry = NodeRegistry::with_builtins();
        let graph = sample_graph(&registry);
        let json = graph.serialize().unwrap();

        let report = Graph::load(&json, &registry).unwrap();
        assert!(report.is_clean());
        let loaded = report.graph;

        assert_eq!(loaded.info(), graph.info());
        assert_eq!(loaded.node_count(), 4);
        for original in graph.nodes() {
            let copy = loaded.node(original.id().as_str()).unwrap();
            assert_eq!(copy.type_name(), original.type_name());
            assert_eq!(copy.display_name(), original.display_name());
            assert_eq!(copy.is_enabled(), original.is_enabled());
            for p in original.parameters() {
                assert_eq!(copy.parameter(&p.name).map(|q| q.value()), Some(p.value()));
            }
        }
        assert_eq!(loaded.connections(), graph.connections());
        assert!(loaded.node("filter-2").unwrap().inputs()[1].is_connected);
        assert_eq!(loaded.to_def(), graph.to_def());
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let registry = NodeRegistry::with_builtins();
        let mut def = sample_graph(&registry).to_def();
        def.nodes[1].type_name = "theremin".to_string();

        let report = Graph::from_def(&def, &registry).unwrap();
        assert_eq!(report.graph.node_count(), 3);
        assert!(!report.graph.contains("filter-2"));
        assert_eq!(report.graph.connection_count(), 0);
        assert_eq!(
            report.issues[0],
            LoadIssue::UnknownNodeType {
                node_id: "filter-2".to_string(),
                type_name: "theremin".to_string(),
            }
        );
        // All three connections touch the skipped filter
        assert_eq!(report.issues.len(), 4);
        assert!(report.issues[1..]
            .iter()
            .all(|i| matches!(i, LoadIssue::UnresolvedConnection { missing, .. } if missing == "filter-2")));
    }

    #[test]
    fn test_unknown_parameter_is_reported() {
        let registry = NodeRegistry::with_builtins();
        let mut def = sample_graph(&registry).to_def();
        def.nodes[0].parameters.push(ParamValue {
            name: "warp".to_string(),
            value: 1.0,
        });

        let report = Graph::from_def(&def, &registry).unwrap();
        assert_eq!(report.graph.node_count(), 4);
        assert_eq!(
            report.issues,
            vec![LoadIssue::UnknownParameter {
                node_id: "osc-1".to_string(),
                name: "warp".to_string(),
            }]
        );
    }

    #[test]
    fn test_duplicate_node_id_keeps_first() {
        let registry = NodeRegistry::with_builtins();
        let json = r#"{
            "graph": { "id": "g", "name": "Dupes" },
            "nodes": [
                { "id": "a", "typeName": "constant" },
                { "id": "a", "typeName": "gain" }
            ]
        }"#;
        let report = Graph::load(json, &registry).unwrap();
        assert_eq!(report.graph.node_count(), 1);
        assert_eq!(report.graph.node("a").unwrap().type_name(), "constant");
        assert_eq!(
            report.issues,
            vec![LoadIssue::DuplicateNodeId {
                node_id: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_aliased_type_roundtrips() {
        let mut registry = NodeRegistry::new();
        registry.register_node_type("vca", "VCA", "Utilities", "Gain under another name", |id| {
            Box::new(crate::nodes::Gain::new(id))
        });
        let mut graph = Graph::new("g", "Alias");
        graph.add_node(registry.create_node("vca").unwrap());
        graph.set_parameter("vca-1", "gain", 2.5);

        let json = graph.serialize().unwrap();
        let report = Graph::load(&json, &registry).unwrap();
        assert!(report.is_clean());
        let node = report.graph.node("vca-1").unwrap();
        assert_eq!(node.type_name(), "vca");
        assert_eq!(node.parameter("gain").map(|p| p.value()), Some(2.5));
    }

    #[test]
    fn test_malformed_document() {
        let registry = NodeRegistry::with_builtins();
        assert!(matches!(
            Graph::load("{ not json", &registry),
            Err(GraphError::Json(_))
        ));
    }

    #[test]
    fn test_newer_version_rejected() {
        let registry = NodeRegistry::with_builtins();
        let mut def = PatchDef::new(GraphInfo::new("g", "Future"));
        def.version = 7;
        assert!(matches!(
            Graph::from_def(&def, &registry),
            Err(GraphError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_minimal_document_uses_defaults() {
        let registry = NodeRegistry::with_builtins();
        let json = r#"{
            "graph": { "id": "g", "name": "Minimal" },
            "nodes": [
                { "id": "a", "typeName": "constant" },
                { "id": "b", "typeName": "gain" }
            ],
            "connections": [
                { "id": 5, "sourceNodeId": "a", "sourcePortIndex": 0,
                  "targetNodeId": "b", "targetPortIndex": 0 }
            ]
        }"#;
        let mut report = Graph::load(json, &registry).unwrap();
        assert!(report.is_clean());
        let graph = &mut report.graph;
        assert!(graph.node("a").unwrap().is_enabled());
        assert_eq!(graph.node("b").unwrap().display_name(), "Gain");
        assert_eq!(graph.connections()[0].id, ConnectionId(5));
        assert_eq!(graph.connections()[0].amount, 1.0);

        let next = graph.connect("a", 0, "b", 1, 1.0).unwrap();
        assert_eq!(next.id, ConnectionId(6));
    }
}

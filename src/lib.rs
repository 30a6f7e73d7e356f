//! # Patchwork: Modular Signal-Flow Graph Engine
//!
//! `patchwork` is the execution core of a node-based audio editor. Processing
//! units (nodes) with typed ports and bounded parameters are wired together
//! into a directed graph, which is ordered topologically and processed one
//! block at a time. Feedback loops are allowed: the edge closing a loop
//! carries the previous block's value.
//!
//! ## Architecture
//!
//! - **Ports and Parameters** - Signal conventions, port records and clamped, scaled parameters
//! - **Nodes** - The [`Node`] contract, the shared [`NodeBase`] record and a set of built-in nodes
//! - **Graph** - Node ownership, connections, cycle-safe ordering and the per-block pass
//! - **Registry** - Name-keyed node factories with metadata for editors and loaders
//! - **Serialization** - JSON patch documents with forgiving loads
//! - **Real-time split** - A lock-free editor/renderer pair for editing while audio runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patchwork::prelude::*;
//!
//! let registry = NodeRegistry::with_builtins();
//! let mut graph = Graph::new("patch-1", "Init");
//!
//! graph.add_node(registry.create_node_with_id("oscillator", "osc".into()).unwrap());
//! graph.add_node(registry.create_node_with_id("filter", "lpf".into()).unwrap());
//! graph.add_node(registry.create_node_with_id("audio_output", "out".into()).unwrap());
//!
//! graph.connect("osc", 0, "lpf", 0, 1.0).unwrap();
//! graph.connect("lpf", 0, "out", 0, 0.5).unwrap();
//! graph.set_parameter("osc", "frequency", 110.0);
//!
//! let mut buffer = vec![0.0f32; 256];
//! graph.process(&mut buffer, 256, 48000);
//!
//! let json = graph.serialize().unwrap();
//! let restored = Graph::load(&json, &registry).unwrap().graph;
//! assert_eq!(restored.node_count(), 3);
//! ```

pub mod connection;
pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod port;
#[cfg(feature = "realtime")]
pub mod realtime;
pub mod registry;
pub mod schedule;
pub mod serialize;
mod topology;

/// Prelude module for convenient imports
pub mod prelude {
    // Ports and Parameters
    pub use crate::port::{ParamScale, Parameter, Port, PortDirection, SignalKind};

    // Nodes
    pub use crate::node::{Node, NodeBase, NodeId};

    // Graph
    pub use crate::connection::{Connection, ConnectionId};
    pub use crate::graph::{Graph, GraphInfo};
    pub use crate::schedule::{NodeKey, Schedule};

    // Built-in Nodes
    pub use crate::nodes::{
        AudioOutput, Constant, Envelope, Filter, Gain, Mixer, Noise, Oscillator, Sequencer,
        Waveform,
    };

    // Registry
    pub use crate::registry::{NodeFactory, NodeRegistry, TypeInfo};

    // Serialization
    pub use crate::error::{GraphError, LoadIssue};
    pub use crate::serialize::{LoadReport, NodeDef, ParamValue, PatchDef, PATCH_VERSION};

    // Real-time split
    #[cfg(feature = "realtime")]
    pub use crate::realtime::{split, GraphEditor, GraphRenderer, RealtimeConfig};
}

// Re-export key types at crate root for convenience
pub use prelude::*;

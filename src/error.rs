//! Error types for patch loading.
//!
//! Unknown identifiers are not errors in this crate: lookups return `Option`
//! or `bool`. Only an unreadable patch document fails a whole operation;
//! problems with individual nodes or connections are collected as
//! [`LoadIssue`]s and loading carries on.

use thiserror::Error;

/// Error type for whole-document failures.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Malformed patch document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported patch version {0}")]
    UnsupportedVersion(u32),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, GraphError>;

/// A recoverable problem found while loading a patch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadIssue {
    #[error("Node '{node_id}' skipped: unknown node type '{type_name}'")]
    UnknownNodeType { node_id: String, type_name: String },

    #[error("Node '{node_id}' skipped: id already used by an earlier node")]
    DuplicateNodeId { node_id: String },

    #[error("Node '{node_id}' has no parameter named '{name}'")]
    UnknownParameter { node_id: String, name: String },

    #[error("Connection {connection_id} skipped: endpoint '{missing}' not loaded")]
    UnresolvedConnection { connection_id: u64, missing: String },
}

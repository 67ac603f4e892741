//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine.
///
/// Structural and dispatch variants abort run setup before any node
/// executes; per-node failures never surface here (they live in each node's
/// `NodeExecutionResult`).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Structural errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node's configuration violates its variant's constraints.
    #[error("invalid node '{node_id}': {message}")]
    InvalidNode { node_id: String, message: String },

    /// A dependency references a node ID that isn't in the workflow.
    #[error("node '{node_id}' depends on unknown node '{dependency}'")]
    MissingDependency { node_id: String, dependency: String },

    /// The dependency graph contains a cycle not mediated by a recursive node.
    #[error("workflow graph contains a cycle: {path}")]
    CycleDetected { path: String },

    /// An input mapping does not line up with its source's declared outputs.
    #[error("schema mismatch on node '{node_id}': {message}")]
    SchemaMismatch { node_id: String, message: String },

    /// A sensitive-data or air-gap rule was broken.
    #[error("security policy violation: {0}")]
    SecurityPolicy(String),

    /// The blueprint document could not be turned into node configs.
    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(String),

    // ------ Dispatch errors ------

    /// No executor is registered for a node type.
    #[error("no executor registered for node type '{0}'")]
    UnknownNodeType(String),

    /// An executor was registered twice for the same node type.
    #[error("executor for node type '{0}' registered twice")]
    DuplicateExecutor(String),

    // ------ Configuration and persistence ------

    #[error("configuration error: {0}")]
    Config(String),

    /// A state store rejected a flush.
    #[error("state store error: {0}")]
    Store(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    /// `true` for errors raised while building or validating the graph.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNodeId(_)
                | Self::InvalidNode { .. }
                | Self::MissingDependency { .. }
                | Self::CycleDetected { .. }
                | Self::SchemaMismatch { .. }
                | Self::SecurityPolicy(_)
                | Self::InvalidBlueprint(_)
        )
    }
}

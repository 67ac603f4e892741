//! The `NodeExecutor` trait and the `RunContext` executors run inside.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Capabilities, NodeConfig, NodeError, NodeExecutionResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Interactive,
    Batch,
}

/// Workflow-scoped preferences every executor can read.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// executors can import it without a circular dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPreferences {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// LLM responses must parse as JSON.
    #[serde(default)]
    pub require_json_output: bool,
    /// Input schemas are enforced instead of only logged.
    #[serde(default)]
    pub strict_validation: bool,
    #[serde(default)]
    pub user_preferences: Map<String, Value>,
}

/// Outcome of a child run started through [`RunContext::run_child`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildRun {
    pub success: bool,
    /// Every completed child node's output, keyed by node id.
    pub outputs: Map<String, Value>,
    /// Output of the child's single leaf node, or leaf id → output when the
    /// child has several leaves.
    pub final_output: Map<String, Value>,
    pub errors: Vec<String>,
}

/// What an executor may do besides computing over its input.
///
/// The engine implements this; executors never touch the graph or the
/// branch resolver directly.
#[async_trait]
pub trait RunContext: Send + Sync {
    fn capabilities(&self) -> &Capabilities;

    fn preferences(&self) -> &ExecutionPreferences;

    fn session_id(&self) -> &str;

    /// Metadata inherited by child scopes.
    fn metadata(&self) -> &Map<String, Value>;

    /// Run another node through the executor registry.
    async fn dispatch(&self, node: &NodeConfig, input: Map<String, Value>) -> NodeExecutionResult;

    /// Run `nodes` as an isolated child workflow owned by `owner`.
    async fn run_child(
        &self,
        owner: &NodeConfig,
        nodes: Vec<NodeConfig>,
        inputs: Map<String, Value>,
    ) -> Result<ChildRun, NodeError>;
}

/// The core executor trait: one implementation per node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute `node` against its resolved input context. Failures are
    /// reported through the returned result, never by panicking.
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult;
}

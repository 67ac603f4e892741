//! Builtin executors, one per [`NodeType`].
//!
//! [`builtin_executor`] is the closed dispatch table the engine registers at
//! startup; each executor matches its own [`crate::NodeKind`] variant and
//! reports a configuration error for anything else.

use std::sync::Arc;
use std::time::Duration;

use crate::{NodeConfig, NodeError, NodeExecutor, NodeType};

mod agent;
mod condition;
mod human;
mod llm;
mod loop_node;
mod monitor;
mod nested_chain;
mod parallel;
mod recursive;
mod swarm;
mod tool;

pub use agent::AgentExecutor;
pub use condition::ConditionExecutor;
pub use human::HumanExecutor;
pub use llm::LlmExecutor;
pub use loop_node::LoopExecutor;
pub use monitor::MonitorExecutor;
pub use nested_chain::NestedChainExecutor;
pub use parallel::ParallelExecutor;
pub use recursive::{RecursiveExecutor, CAN_RECURSE_KEY, ITERATION_KEY};
pub use swarm::SwarmExecutor;
pub use tool::ToolExecutor;

/// The builtin executor for `node_type`.
pub fn builtin_executor(node_type: NodeType) -> Arc<dyn NodeExecutor> {
    match node_type {
        NodeType::Tool => Arc::new(ToolExecutor),
        NodeType::Llm => Arc::new(LlmExecutor),
        NodeType::Agent => Arc::new(AgentExecutor),
        NodeType::Condition => Arc::new(ConditionExecutor),
        NodeType::Loop => Arc::new(LoopExecutor),
        NodeType::Parallel => Arc::new(ParallelExecutor),
        NodeType::NestedChain => Arc::new(NestedChainExecutor),
        NodeType::Recursive => Arc::new(RecursiveExecutor),
        NodeType::Swarm => Arc::new(SwarmExecutor),
        NodeType::Human => Arc::new(HumanExecutor),
        NodeType::Monitor => Arc::new(MonitorExecutor),
    }
}

fn kind_mismatch(node: &NodeConfig, expected: NodeType) -> NodeError {
    NodeError::InvalidConfig(format!(
        "{expected} executor cannot run node '{}' of type {}",
        node.id,
        node.node_type()
    ))
}

/// Budget for calls that take their own timeout (LLM requests), when the
/// node does not declare one.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

fn call_timeout(node: &NodeConfig) -> Duration {
    node.timeout_seconds
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(DEFAULT_CALL_TIMEOUT)
}

//! `nodes` crate: node configuration, results, and the builtin executors.
//!
//! Every node type has exactly one [`NodeExecutor`]; the engine crate looks
//! executors up by [`NodeType`] and runs them inside a [`RunContext`].

pub mod agent;
pub mod capability;
pub mod config;
pub mod error;
pub mod executors;
pub mod expression;
pub mod mock;
pub mod result;
pub mod template;
pub mod traits;

pub use capability::{
    Agent, AgentAction, AgentDefinition, AgentHandle, AgentStep, AgentTurn, Capabilities,
    HumanInput, HumanRequest, LlmProvider, LlmResponse, TokenUsage, Tool, WorkflowSource,
};
pub use config::{
    AgentNode, ApprovalType, ConditionNode, HumanNode, InputMapping, LlmConfig, LlmNode,
    LoopNode, MonitorAction, MonitorNode, NestedChainNode, NodeConfig, NodeKind, NodeType,
    ParallelNode, RecursiveNode, Schema, SwarmAgent, SwarmNode, SwarmStrategy, ToolNode,
    WaitStrategy, WHOLE_PAYLOAD,
};
pub use error::{CapabilityError, NodeError};
pub use result::{into_output, ExecutionTimer, NodeExecutionResult, NodeMetadata};
pub use traits::{ChildRun, ExecutionMode, ExecutionPreferences, NodeExecutor, RunContext};

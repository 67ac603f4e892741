//! `engine` crate: dependency graph, branch gating, executor registry and
//! the level-parallel run loop.

pub mod blueprint;
mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod gating;
pub mod graph;
pub mod registry;
pub mod store;
pub mod workflow;

pub use blueprint::Blueprint;
pub use config::EngineConfig;
pub use context::{MemoryStateStore, StateStore, WorkflowExecutionContext, DEFAULT_FLUSH_THRESHOLD};
pub use error::EngineError;
pub use executor::{
    ExecutorConfig, FailurePolicy, RunResult, SecurityViolation, SkipReason, ViolationKind,
    WorkflowExecutor,
};
pub use gating::{BranchGatingResolver, Exclusion};
pub use graph::DependencyGraph;
pub use registry::ExecutorRegistry;
pub use store::SqlStateStore;
pub use workflow::Workflow;

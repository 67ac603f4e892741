//! Node-level error types.

use thiserror::Error;

/// Why a single node execution failed.
///
/// Executors never surface these to the run loop directly: every variant is
/// folded into a failed [`crate::NodeExecutionResult`], with
/// [`NodeError::error_type`] recorded in the result metadata.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// The named tool is not registered.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// An LLM prompt still contains `{var}` tokens after rendering.
    #[error("prompt has unresolved placeholders: {}", .0.join(", "))]
    UnresolvedPlaceholder(Vec<String>),

    /// The LLM provider (or another capability) reported an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The node did not finish within its time budget.
    #[error("node '{node_id}' timed out after {seconds}s")]
    Timeout { node_id: String, seconds: f64 },

    /// An agent proposed an action that failed validation.
    #[error("invalid agent action: {0}")]
    AgentAction(String),

    /// A boolean expression could not be evaluated.
    #[error("failed to evaluate expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// The input context does not satisfy the node's declared input schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An input mapping referenced output that does not exist.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// A child workflow could not be resolved or did not complete.
    #[error("child workflow failed: {0}")]
    ChildWorkflow(String),

    /// No human response was obtained.
    #[error("human input failed: {0}")]
    HumanInput(String),

    /// A monitor node's trigger requested the workflow to abort.
    #[error("monitor triggered abort: {0}")]
    MonitorAbort(String),

    /// The node configuration is unusable for its executor.
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    /// The executor panicked; the panic was caught at the dispatch boundary.
    #[error("executor panicked: {0}")]
    Panicked(String),

    /// A capability lookup or call failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl NodeError {
    /// Stable name written into `NodeExecutionResult.metadata.error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) => "ToolNotFoundError",
            Self::UnresolvedPlaceholder(_) => "UnresolvedPlaceholderError",
            Self::Provider(_) => "ProviderError",
            Self::Timeout { .. } => "TimeoutError",
            Self::AgentAction(_) => "AgentActionError",
            Self::Expression { .. } => "ExpressionError",
            Self::InvalidInput(_) => "InputValidationError",
            Self::MissingInput(_) => "MissingInputError",
            Self::ChildWorkflow(_) => "ChildWorkflowError",
            Self::HumanInput(_) => "HumanInputError",
            Self::MonitorAbort(_) => "MonitorAbortError",
            Self::InvalidConfig(_) => "ConfigurationError",
            Self::Panicked(_) => "ExecutorPanicError",
            Self::Capability(_) => "CapabilityError",
        }
    }
}

/// Errors from capability lookup (tools, agents, LLMs, workflows) and calls.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{name} failed: {message}")]
    Call { name: String, message: String },
}

impl CapabilityError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound { kind, name: name.into() }
    }

    pub fn call(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call { name: name.into(), message: message.into() }
    }
}

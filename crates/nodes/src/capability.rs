//! External capabilities consumed by executors: tools, agents, LLM providers,
//! registered workflows, prompt templates and the human-input channel.
//!
//! [`Capabilities`] is an explicit value built at startup and shared
//! read-only (behind an `Arc`) by every run, so tests can assemble exactly the
//! capabilities they need.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ApprovalType, CapabilityError, LlmConfig, NodeConfig};

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A deterministic tool callable from tool nodes and agents.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, CapabilityError>;
}

// ---------------------------------------------------------------------------
// LLM providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// What a provider hands back. `error` is set instead of failing the call so
/// provider wrappers can report partial usage alongside a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            usage: None,
            error: Some(message.into()),
        }
    }
}

/// Text generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        config: &LlmConfig,
        prompt: &str,
        context: &Map<String, Value>,
        tools: Option<&[String]>,
        timeout: Duration,
        max_retries: u32,
    ) -> LlmResponse;
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// One decision of an agent's think/decide loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    ToolCall {
        tool: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    Final {
        #[serde(default)]
        result: Value,
    },
}

/// A tool call the agent already made, and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub tool: String,
    pub args: Map<String, Value>,
    pub observation: Value,
}

/// Everything an agent sees when deciding its next action.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTurn {
    pub iteration: u32,
    pub input: Map<String, Value>,
    pub history: Vec<AgentStep>,
    pub tools: Vec<String>,
}

/// Code-driven agent.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn decide(&self, turn: &AgentTurn) -> Result<AgentAction, CapabilityError>;
}

/// Data-driven agent: the LLM picks actions under this system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub llm_config: LlmConfig,
}

/// A resolved agent package.
#[derive(Clone)]
pub enum AgentHandle {
    Code(Arc<dyn Agent>),
    Data(AgentDefinition),
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(_) => f.write_str("AgentHandle::Code(..)"),
            Self::Data(def) => f.debug_tuple("AgentHandle::Data").field(def).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// A registered child workflow: a fixed node list, or a factory producing a
/// fresh one per instantiation.
#[derive(Clone)]
pub enum WorkflowSource {
    Nodes(Vec<NodeConfig>),
    Factory(Arc<dyn Fn() -> Vec<NodeConfig> + Send + Sync>),
}

impl WorkflowSource {
    pub fn instantiate(&self) -> Vec<NodeConfig> {
        match self {
            Self::Nodes(nodes) => nodes.clone(),
            Self::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for WorkflowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nodes(nodes) => write!(f, "WorkflowSource::Nodes({} nodes)", nodes.len()),
            Self::Factory(_) => f.write_str("WorkflowSource::Factory(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Human input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HumanRequest {
    pub node_id: String,
    pub prompt: String,
    pub approval_type: ApprovalType,
    pub choices: Vec<String>,
}

/// Channel that puts a question to a person and waits for the answer.
#[async_trait]
pub trait HumanInput: Send + Sync {
    async fn request(&self, request: HumanRequest) -> Result<Value, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Lookup table of everything executors may call out to.
#[derive(Default, Clone)]
pub struct Capabilities {
    tools: HashMap<String, Arc<dyn Tool>>,
    agents: HashMap<String, AgentHandle>,
    llms: HashMap<String, Arc<dyn LlmProvider>>,
    default_llm: Option<Arc<dyn LlmProvider>>,
    workflows: HashMap<String, WorkflowSource>,
    templates: HashMap<String, String>,
    human: Option<Arc<dyn HumanInput>>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tools: Vec<_> = self.tools.keys().collect();
        tools.sort();
        let mut agents: Vec<_> = self.agents.keys().collect();
        agents.sort();
        let mut workflows: Vec<_> = self.workflows.keys().collect();
        workflows.sort();
        f.debug_struct("Capabilities")
            .field("tools", &tools)
            .field("agents", &agents)
            .field("llms", &self.llms.len())
            .field("default_llm", &self.default_llm.is_some())
            .field("workflows", &workflows)
            .field("templates", &self.templates.len())
            .field("human", &self.human.is_some())
            .finish()
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: impl Tool + 'static) -> Self {
        self.tools.insert(name.into(), Arc::new(tool));
        self
    }

    pub fn with_shared_tool(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    pub fn with_agent(mut self, package: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(package.into(), AgentHandle::Code(agent));
        self
    }

    pub fn with_agent_definition(
        mut self,
        package: impl Into<String>,
        definition: AgentDefinition,
    ) -> Self {
        self.agents.insert(package.into(), AgentHandle::Data(definition));
        self
    }

    /// Provider used for one specific model name.
    pub fn with_llm(mut self, model: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.llms.insert(model.into(), provider);
        self
    }

    /// Provider used for any model without a dedicated one.
    pub fn with_default_llm(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.default_llm = Some(provider);
        self
    }

    pub fn with_workflow(mut self, name: impl Into<String>, source: WorkflowSource) -> Self {
        self.workflows.insert(name.into(), source);
        self
    }

    pub fn with_template(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(name.into(), template.into());
        self
    }

    pub fn with_human_input(mut self, channel: Arc<dyn HumanInput>) -> Self {
        self.human = Some(channel);
        self
    }

    pub fn get_tool(&self, name: &str) -> Result<Arc<dyn Tool>, CapabilityError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| CapabilityError::not_found("tool", name))
    }

    pub fn get_agent(&self, package: &str) -> Result<AgentHandle, CapabilityError> {
        self.agents
            .get(package)
            .cloned()
            .ok_or_else(|| CapabilityError::not_found("agent", package))
    }

    pub fn get_llm_instance(&self, model: &str) -> Result<Arc<dyn LlmProvider>, CapabilityError> {
        self.llms
            .get(model)
            .or(self.default_llm.as_ref())
            .cloned()
            .ok_or_else(|| CapabilityError::not_found("llm", model))
    }

    pub fn get_workflow(&self, name: &str) -> Result<WorkflowSource, CapabilityError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| CapabilityError::not_found("workflow", name))
    }

    pub fn get_template(&self, name: &str) -> Result<&str, CapabilityError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| CapabilityError::not_found("template", name))
    }

    pub fn human_input(&self) -> Option<Arc<dyn HumanInput>> {
        self.human.clone()
    }
}

//! Node configuration model.
//!
//! A [`NodeConfig`] is the immutable descriptor of one DAG node. The fields
//! every node shares (id, dependencies, mappings, schemas, security flags)
//! live on the struct; everything type-specific lives in the [`NodeKind`]
//! sum type, which is flattened into the same JSON object and selected by
//! its `type` tag.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared shape contract: key → type name (`str`, `int`, `dict`, ...).
pub type Schema = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// Discriminator tag of a node, used as the executor registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Tool,
    Llm,
    Agent,
    Condition,
    Loop,
    Parallel,
    NestedChain,
    Recursive,
    Swarm,
    Human,
    Monitor,
}

impl NodeType {
    pub const ALL: [NodeType; 11] = [
        NodeType::Tool,
        NodeType::Llm,
        NodeType::Agent,
        NodeType::Condition,
        NodeType::Loop,
        NodeType::Parallel,
        NodeType::NestedChain,
        NodeType::Recursive,
        NodeType::Swarm,
        NodeType::Human,
        NodeType::Monitor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Llm => "llm",
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::NestedChain => "nested_chain",
            Self::Recursive => "recursive",
            Self::Swarm => "swarm",
            Self::Human => "human",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(Self::Tool),
            "llm" | "operator" => Ok(Self::Llm),
            "agent" => Ok(Self::Agent),
            "condition" => Ok(Self::Condition),
            "loop" => Ok(Self::Loop),
            "parallel" => Ok(Self::Parallel),
            "nested_chain" | "workflow" => Ok(Self::NestedChain),
            "recursive" => Ok(Self::Recursive),
            "swarm" => Ok(Self::Swarm),
            "human" => Ok(Self::Human),
            "monitor" => Ok(Self::Monitor),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// InputMapping
// ---------------------------------------------------------------------------

/// Where a node's input placeholder gets its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputMapping {
    /// Output of a direct dependency. `source_output_key` is a dot path into
    /// that node's output, or `"."` for the whole payload.
    Reference {
        source_node_id: String,
        source_output_key: String,
    },
    /// A constant.
    Literal(Value),
}

impl InputMapping {
    pub fn reference(node_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Reference {
            source_node_id: node_id.into(),
            source_output_key: key.into(),
        }
    }
}

/// `source_output_key` value meaning "the whole output payload".
pub const WHOLE_PAYLOAD: &str = ".";

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// One node of a blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique within a blueprint; the graph vertex key.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Edges point dependency → this node.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Topological depth, assigned by the graph builder.
    #[serde(default, skip_deserializing)]
    pub level: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mappings: BTreeMap<String, InputMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
    /// Wall-clock budget for one dispatch of this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub contains_sensitive_data: bool,
    #[serde(default)]
    pub requires_external_io: bool,
    #[serde(default)]
    pub airgap_mode: bool,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            dependencies: Vec::new(),
            level: 0,
            input_mappings: BTreeMap::new(),
            input_schema: None,
            output_schema: None,
            timeout_seconds: None,
            contains_sensitive_data: false,
            requires_external_io: false,
            airgap_mode: false,
            kind,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mapping(mut self, placeholder: impl Into<String>, mapping: InputMapping) -> Self {
        self.input_mappings.insert(placeholder.into(), mapping);
        self
    }

    pub fn with_output_schema<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.output_schema = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_input_schema<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.input_schema = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// `name` when set, otherwise the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Branch lists when this is a condition node.
    pub fn branches(&self) -> Option<(&[String], &[String])> {
        match &self.kind {
            NodeKind::Condition(c) => Some((&c.true_branch, &c.false_branch)),
            _ => None,
        }
    }

    /// Dependencies that close a loop back into this node. Only recursive
    /// nodes declare any.
    pub fn recursive_sources(&self) -> &[String] {
        match &self.kind {
            NodeKind::Recursive(r) => &r.recursive_sources,
            _ => &[],
        }
    }

    /// Check the variant-specific constraints serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("node id must not be empty".into());
        }
        match &self.kind {
            NodeKind::Tool(t) if t.tool_name.trim().is_empty() => {
                Err("tool_name must not be empty".into())
            }
            NodeKind::Llm(l) if l.prompt.is_empty() => Err("prompt must not be empty".into()),
            NodeKind::Agent(a) if a.agent_package.is_none() && a.system_prompt.is_none() => Err(
                "agent requires either agent_package or an inline system_prompt".into(),
            ),
            NodeKind::Condition(c) if c.expression.trim().is_empty() => {
                Err("expression must not be empty".into())
            }
            NodeKind::Loop(l) if l.items_source.trim().is_empty() => {
                Err("items_source must not be empty".into())
            }
            NodeKind::Parallel(p) if p.branches.is_empty() => {
                Err("parallel node needs at least one branch".into())
            }
            NodeKind::NestedChain(n) if n.workflow_ref.is_some() == n.workflow.is_some() => {
                Err("exactly one of workflow_ref or workflow is required".into())
            }
            NodeKind::Recursive(r) if r.agent_package.is_some() == r.workflow_ref.is_some() => {
                Err("exactly one of agent_package or workflow_ref is required".into())
            }
            NodeKind::Swarm(s) if s.agents.is_empty() => {
                Err("swarm needs at least one agent".into())
            }
            NodeKind::Monitor(m) if m.metric_expression.trim().is_empty() => {
                Err("metric_expression must not be empty".into())
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeKind and its variants
// ---------------------------------------------------------------------------

/// Type-specific node fields, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Tool(ToolNode),
    #[serde(alias = "operator")]
    Llm(LlmNode),
    Agent(AgentNode),
    Condition(ConditionNode),
    Loop(LoopNode),
    Parallel(ParallelNode),
    #[serde(alias = "workflow")]
    NestedChain(NestedChainNode),
    Recursive(RecursiveNode),
    Swarm(SwarmNode),
    Human(HumanNode),
    Monitor(MonitorNode),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Tool(_) => NodeType::Tool,
            Self::Llm(_) => NodeType::Llm,
            Self::Agent(_) => NodeType::Agent,
            Self::Condition(_) => NodeType::Condition,
            Self::Loop(_) => NodeType::Loop,
            Self::Parallel(_) => NodeType::Parallel,
            Self::NestedChain(_) => NodeType::NestedChain,
            Self::Recursive(_) => NodeType::Recursive,
            Self::Swarm(_) => NodeType::Swarm,
            Self::Human(_) => NodeType::Human,
            Self::Monitor(_) => NodeType::Monitor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolNode {
    pub tool_name: String,
    /// Static arguments; `{placeholder}` strings are substituted from the
    /// input context.
    #[serde(default)]
    pub tool_args: Map<String, Value>,
}

/// Model selection and sampling settings handed to the LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            provider: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_model() -> String {
    "gpt-4o".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmNode {
    /// Inline template, or `template:<name>` for a registered one.
    pub prompt: String,
    #[serde(default)]
    pub llm_config: LlmConfig,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNode {
    /// Registered agent (code-driven or data-driven definition).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_package: Option<String>,
    /// Inline data-driven definition, used when no package is named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Tool allow-list.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmConfig>,
    #[serde(default = "default_agent_iterations")]
    pub max_iterations: u32,
}

fn default_agent_iterations() -> u32 {
    5
}

impl AgentNode {
    /// Agent node that runs a registered package with default limits.
    pub fn for_package(package: impl Into<String>) -> Self {
        Self {
            agent_package: Some(package.into()),
            system_prompt: None,
            tools: Vec::new(),
            llm_config: None,
            max_iterations: default_agent_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionNode {
    pub expression: String,
    /// Nodes that run only when the expression is true.
    #[serde(default)]
    pub true_branch: Vec<String>,
    /// Nodes that run only when the expression is false.
    #[serde(default)]
    pub false_branch: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopNode {
    /// Dot path to an array in the input context.
    pub items_source: String,
    /// Sub-graph executed once per item.
    #[serde(default)]
    pub body_nodes: Vec<NodeConfig>,
    #[serde(default = "default_loop_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_item_var")]
    pub item_var: String,
}

fn default_loop_iterations() -> usize {
    100
}

fn default_item_var() -> String {
    "item".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelNode {
    pub branches: Vec<Vec<NodeConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub wait_strategy: WaitStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedChainNode {
    /// Key of a registered workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,
    /// Inline child workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Vec<NodeConfig>>,
    /// Output key → JSONPath into the child's per-node outputs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecursiveNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,
    /// Dependencies that feed back into this node.
    #[serde(default)]
    pub recursive_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence_condition: Option<String>,
    #[serde(default = "default_recursive_iterations")]
    pub max_iterations: u32,
}

fn default_recursive_iterations() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmAgent {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStrategy {
    #[default]
    Consensus,
    Hierarchical,
    Marketplace,
}

impl SwarmStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consensus => "consensus",
            Self::Hierarchical => "hierarchical",
            Self::Marketplace => "marketplace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmNode {
    pub agents: Vec<SwarmAgent>,
    #[serde(default)]
    pub strategy: SwarmStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    #[default]
    ApproveReject,
    InputRequired,
    Choice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanNode {
    pub prompt: String,
    #[serde(default)]
    pub approval_type: ApprovalType,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<Value>,
}

fn default_response_timeout() -> f64 {
    300.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorAction {
    #[default]
    AlertOnly,
    PauseWorkflow,
    AbortWorkflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorNode {
    pub metric_expression: String,
    #[serde(default)]
    pub action_on_trigger: MonitorAction,
    #[serde(default)]
    pub alert_channels: Vec<String>,
}

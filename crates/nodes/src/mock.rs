//! Test doubles for capabilities and the run context.
//!
//! Useful in unit and integration tests where a real tool, provider or
//! engine is either unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    executors::builtin_executor, Agent, AgentAction, AgentTurn, Capabilities, CapabilityError,
    ChildRun, ExecutionPreferences, HumanInput, HumanRequest, LlmConfig, LlmProvider,
    LlmResponse, NodeConfig, NodeError, NodeExecutionResult, RunContext, TokenUsage, Tool,
};

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Behaviour injected into `MockTool` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the arguments it was called with.
    EchoArgs,
    /// Fail with a call error.
    Fail(String),
}

/// A mock tool that records every call it receives and returns a
/// programmer-specified result.
pub struct MockTool {
    pub behaviour: MockBehaviour,
    /// All argument maps seen by this tool (in call order).
    pub calls: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl MockTool {
    pub fn returning(value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(value))
    }

    pub fn echoing() -> Self {
        Self::with_behaviour(MockBehaviour::EchoArgs)
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Fail(msg.into()))
    }

    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this tool has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Tool for MockTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, CapabilityError> {
        self.calls.lock().unwrap().push(args.clone());
        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::EchoArgs => Ok(Value::Object(args)),
            MockBehaviour::Fail(msg) => Err(CapabilityError::call("mock tool", msg.clone())),
        }
    }
}

/// A tool that sleeps before answering.
pub struct SlowTool {
    pub delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    async fn call(&self, _args: Map<String, Value>) -> Result<Value, CapabilityError> {
        tokio::time::sleep(self.delay).await;
        Ok(Value::Bool(true))
    }
}

// ---------------------------------------------------------------------------
// LLM providers
// ---------------------------------------------------------------------------

/// Echoes the rendered prompt back as the completion.
pub struct EchoLlm;

#[async_trait]
impl LlmProvider for EchoLlm {
    async fn generate(
        &self,
        _config: &LlmConfig,
        prompt: &str,
        _context: &Map<String, Value>,
        _tools: Option<&[String]>,
        _timeout: Duration,
        _max_retries: u32,
    ) -> LlmResponse {
        let tokens = prompt.split_whitespace().count() as u64;
        LlmResponse {
            text: prompt.to_owned(),
            usage: Some(TokenUsage {
                prompt_tokens: tokens,
                completion_tokens: tokens,
                total_tokens: tokens * 2,
            }),
            error: None,
        }
    }
}

/// Replays queued responses; the last one repeats once the queue runs dry.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    last: Mutex<Option<LlmResponse>>,
    /// Every prompt received, in order.
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn repeating(text: impl Into<String>) -> Self {
        Self::new(vec![LlmResponse::text(text)])
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(vec![LlmResponse::error(message)])
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(
        &self,
        _config: &LlmConfig,
        prompt: &str,
        _context: &Map<String, Value>,
        _tools: Option<&[String]>,
        _timeout: Duration,
        _max_retries: u32,
    ) -> LlmResponse {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        let next = self.responses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| LlmResponse::error("scripted llm has no responses")),
        }
    }
}

// ---------------------------------------------------------------------------
// Agents and humans
// ---------------------------------------------------------------------------

/// Code-driven agent that replays a fixed action list (last one repeats).
pub struct ScriptedAgent {
    actions: Vec<AgentAction>,
    /// Every turn it was asked to decide on.
    pub turns: Arc<Mutex<Vec<AgentTurn>>>,
}

impl ScriptedAgent {
    pub fn new(actions: Vec<AgentAction>) -> Self {
        Self {
            actions,
            turns: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always finishes immediately with `result`.
    pub fn finishing(result: Value) -> Self {
        Self::new(vec![AgentAction::Final { result }])
    }

    pub fn decision_count(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn decide(&self, turn: &AgentTurn) -> Result<AgentAction, CapabilityError> {
        let mut turns = self.turns.lock().unwrap();
        let index = turns.len().min(self.actions.len().saturating_sub(1));
        turns.push(turn.clone());
        self.actions
            .get(index)
            .cloned()
            .ok_or_else(|| CapabilityError::call("scripted agent", "no actions"))
    }
}

/// Human channel that answers after `delay` (or never, when `response` is
/// `None`).
pub struct MockHuman {
    pub response: Option<Value>,
    pub delay: Duration,
}

#[async_trait]
impl HumanInput for MockHuman {
    async fn request(&self, _request: HumanRequest) -> Result<Value, CapabilityError> {
        tokio::time::sleep(self.delay).await;
        match &self.response {
            Some(v) => Ok(v.clone()),
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// In-crate `RunContext`: dispatches through the builtin executors and
/// answers child runs from a script (or echoes the child inputs).
pub struct MockRunContext {
    pub capabilities: Capabilities,
    pub preferences: ExecutionPreferences,
    pub metadata: Map<String, Value>,
    child_results: Mutex<VecDeque<Result<ChildRun, NodeError>>>,
    /// (owner id, child node ids, inputs) per child run, in order.
    pub child_calls: Arc<Mutex<Vec<(String, Vec<String>, Map<String, Value>)>>>,
}

impl MockRunContext {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            preferences: ExecutionPreferences::default(),
            metadata: Map::new(),
            child_results: Mutex::new(VecDeque::new()),
            child_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_preferences(mut self, preferences: ExecutionPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Queue the result of the next child run.
    pub fn push_child_result(&self, result: Result<ChildRun, NodeError>) {
        self.child_results.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl RunContext for MockRunContext {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn preferences(&self) -> &ExecutionPreferences {
        &self.preferences
    }

    fn session_id(&self) -> &str {
        "mock-session"
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    async fn dispatch(&self, node: &NodeConfig, input: Map<String, Value>) -> NodeExecutionResult {
        builtin_executor(node.node_type())
            .execute(self, node, input)
            .await
    }

    async fn run_child(
        &self,
        owner: &NodeConfig,
        nodes: Vec<NodeConfig>,
        inputs: Map<String, Value>,
    ) -> Result<ChildRun, NodeError> {
        let ids = nodes.iter().map(|n| n.id.clone()).collect();
        self.child_calls
            .lock()
            .unwrap()
            .push((owner.id.clone(), ids, inputs.clone()));
        let scripted = self.child_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ChildRun {
                success: true,
                outputs: Map::new(),
                final_output: inputs,
                errors: Vec::new(),
            })
        })
    }
}

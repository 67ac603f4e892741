//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Resolves an executor for every node before anything runs.
//! 2. Walks the graph level by level; nodes of one level run concurrently,
//!    bounded by `max_parallel`.
//! 3. Consults the branch resolver before each node and records condition
//!    decisions (and, under `continue_if_possible`, failures) back into it.
//! 4. Buffers a snapshot of every node result in the execution context.
//! 5. Applies the failure policy once a level has finished.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

use nodes::template::lookup_value;
use nodes::{
    Capabilities, ExecutionTimer, InputMapping, NodeConfig, NodeError, NodeExecutionResult,
    NodeExecutor, Schema, WHOLE_PAYLOAD,
};

use crate::chain::ChainContext;
use crate::context::WorkflowExecutionContext;
use crate::gating::{BranchGatingResolver, Exclusion};
use crate::registry::ExecutorRegistry;
use crate::workflow::Workflow;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens to the rest of the run after a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop after the level containing the first failure.
    Halt,
    /// Skip only the transitive dependents of failed nodes.
    #[default]
    ContinueIfPossible,
    /// Attempt every node; missing inputs fail individually.
    AlwaysContinue,
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Nodes of one level dispatched at the same time.
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
    /// Budget for nodes without their own `timeout_seconds`.
    pub default_timeout: Option<Duration>,
    /// Child-run depth limit for nested chains, loops and parallel branches.
    pub max_nesting_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            failure_policy: FailurePolicy::default(),
            default_timeout: None,
            max_nesting_depth: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a completed run
// ---------------------------------------------------------------------------

/// Why a node was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BranchExcluded,
    UpstreamFailed,
    UpstreamInactive,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Timeout,
}

/// A resource rule a node broke during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub node_id: String,
    pub kind: ViolationKind,
    pub message: String,
}

/// The result of running a full workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    /// `true` when no dispatched node failed.
    pub success: bool,
    pub node_results: BTreeMap<String, NodeExecutionResult>,
    /// Output of every successful node, keyed by node id.
    pub outputs: Map<String, Value>,
    pub skipped: BTreeMap<String, SkipReason>,
    pub levels: BTreeMap<usize, Vec<String>>,
    pub violations: Vec<SecurityViolation>,
}

impl RunResult {
    /// Output of the single executed leaf, or leaf id → output when several
    /// leaves ran.
    pub fn final_output(&self, workflow: &Workflow) -> Map<String, Value> {
        let leaves: Vec<(String, &Value)> = workflow
            .graph()
            .get_leaf_nodes()
            .into_iter()
            .filter_map(|id| self.outputs.get(&id).map(|out| (id, out)))
            .collect();
        match leaves.as_slice() {
            [(_, Value::Object(single))] => single.clone(),
            _ => leaves
                .into_iter()
                .map(|(id, out)| (id, out.clone()))
                .collect(),
        }
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeExecutionResult> {
        self.node_results.values().filter(|r| !r.success)
    }
}

/// Identity of one (possibly nested) run.
#[derive(Debug, Clone)]
pub(crate) struct RunScope {
    pub session_id: String,
    pub depth: usize,
    pub metadata: Map<String, Value>,
}

/// One dispatch as seen by the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct Dispatched {
    pub result: NodeExecutionResult,
    pub timed_out: bool,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator; cheap to clone and shared by child runs.
#[derive(Clone)]
pub struct WorkflowExecutor {
    pub(crate) registry: Arc<ExecutorRegistry>,
    pub(crate) capabilities: Arc<Capabilities>,
    pub(crate) config: ExecutorConfig,
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        capabilities: Arc<Capabilities>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            capabilities,
            config,
        }
    }

    /// Executor over every builtin node executor.
    pub fn with_builtins(
        capabilities: Capabilities,
        config: ExecutorConfig,
    ) -> Result<Self, EngineError> {
        Ok(Self::new(
            Arc::new(ExecutorRegistry::builtin()?),
            Arc::new(capabilities),
            config,
        ))
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Run the workflow to completion.
    ///
    /// # Errors
    /// Only dispatch problems found before any node runs (a node type with no
    /// registered executor). Node failures are reported in the result.
    pub async fn run(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
        ctx: &mut WorkflowExecutionContext,
    ) -> Result<RunResult, EngineError> {
        let scope = RunScope {
            session_id: Uuid::new_v4().to_string(),
            depth: 0,
            metadata: workflow.metadata.clone(),
        };
        self.run_scoped(workflow, inputs, ctx, scope).await
    }

    #[instrument(
        skip(self, workflow, inputs, ctx, scope),
        fields(
            workflow_id = %workflow.id,
            session_id = %scope.session_id,
            depth = scope.depth,
            run_id = tracing::field::Empty
        )
    )]
    pub(crate) async fn run_scoped(
        &self,
        workflow: &Workflow,
        inputs: Map<String, Value>,
        ctx: &mut WorkflowExecutionContext,
        scope: RunScope,
    ) -> Result<RunResult, EngineError> {
        // ------------------------------------------------------------------
        // Resolve every executor up front.
        // ------------------------------------------------------------------
        let mut executors: HashMap<&str, Arc<dyn NodeExecutor>> = HashMap::new();
        for node in &workflow.nodes {
            executors.insert(node.id.as_str(), self.registry.resolve(node.node_type())?);
        }

        let graph = workflow.graph();
        let by_id: HashMap<&str, &NodeConfig> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());
        info!(
            "executing {} nodes across {} levels (run {})",
            workflow.nodes.len(),
            graph.get_level_nodes().len(),
            run_id
        );

        let chain = ChainContext::new(self.clone(), scope, ctx.preferences.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut resolver = BranchGatingResolver::new(&workflow.nodes, graph);

        let mut node_results = BTreeMap::new();
        let mut outputs = Map::new();
        let mut skipped: BTreeMap<String, SkipReason> = BTreeMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut violations = Vec::new();
        let mut halted = false;

        for (level, ids) in graph.get_level_nodes() {
            // --------------------------------------------------------------
            // Decide what runs, build inputs, and spawn.
            // --------------------------------------------------------------
            let mut handles = Vec::new();
            for id in ids {
                let Some(&node) = by_id.get(id.as_str()) else {
                    continue;
                };

                if halted {
                    skipped.insert(id.clone(), SkipReason::Halted);
                    continue;
                }
                if let Some(exclusion) = resolver.exclusion_reason(id) {
                    let reason = match exclusion {
                        Exclusion::Branch { .. } => SkipReason::BranchExcluded,
                        Exclusion::Upstream { dependency } => {
                            if failed.contains(&dependency)
                                || skipped.get(&dependency) == Some(&SkipReason::UpstreamFailed)
                            {
                                SkipReason::UpstreamFailed
                            } else {
                                SkipReason::UpstreamInactive
                            }
                        }
                    };
                    info!("skipping node '{}' ({:?})", id, reason);
                    skipped.insert(id.clone(), reason);
                    continue;
                }

                let timer = ExecutionTimer::start();
                let input = match build_input(node, &inputs, &outputs).and_then(|input| {
                    check_input_schema(node, &input, ctx.preferences.strict_validation)?;
                    Ok(input)
                }) {
                    Ok(input) => input,
                    Err(err) => {
                        let result = NodeExecutionResult::failure(node, &err, timer);
                        handles.push((node, Err(result)));
                        continue;
                    }
                };

                let executor = Arc::clone(&executors[id.as_str()]);
                let task_chain = chain.clone();
                let task_node = node.clone();
                let permits = Arc::clone(&semaphore);
                let handle = tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    task_chain.run_node(executor, &task_node, input).await
                });
                handles.push((node, Ok(handle)));
            }

            // --------------------------------------------------------------
            // Collect in declaration order.
            // --------------------------------------------------------------
            let mut level_failed = false;
            for (node, handle) in handles {
                let dispatched = match handle {
                    Err(result) => Dispatched {
                        result,
                        timed_out: false,
                    },
                    Ok(handle) => match handle.await {
                        Ok(dispatched) => dispatched,
                        Err(join_err) => Dispatched {
                            result: NodeExecutionResult::failure(
                                node,
                                &NodeError::Panicked(join_err.to_string()),
                                ExecutionTimer::start(),
                            ),
                            timed_out: false,
                        },
                    },
                };
                let result = dispatched.result;

                match serde_json::to_value(&result) {
                    Ok(state) => {
                        if let Err(e) = ctx.persist_state(format!("{run_id}:{}", node.id), state).await {
                            warn!("failed to persist state of node '{}': {}", node.id, e);
                        }
                    }
                    Err(e) => warn!("failed to serialize result of node '{}': {}", node.id, e),
                }

                if dispatched.timed_out {
                    violations.push(SecurityViolation {
                        node_id: node.id.clone(),
                        kind: ViolationKind::Timeout,
                        message: result.error.clone().unwrap_or_default(),
                    });
                }

                if result.success {
                    if let Some(decision) = condition_decision(node, &result.output) {
                        resolver.record_decision(&node.id, decision);
                    }
                    if result.output.get("action_taken").and_then(Value::as_str) == Some("pause") {
                        warn!("monitor '{}' paused the workflow", node.id);
                        halted = true;
                    }
                    info!("node '{}' succeeded in {:.3}s", node.id, result.execution_time);
                    outputs.insert(node.id.clone(), Value::Object(result.output.clone()));
                } else {
                    warn!(
                        "node '{}' failed: {}",
                        node.id,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                    failed.insert(node.id.clone());
                    level_failed = true;
                    if self.config.failure_policy == FailurePolicy::ContinueIfPossible {
                        resolver.record_failure(&node.id);
                    }
                }
                node_results.insert(node.id.clone(), result);
            }

            if level_failed && self.config.failure_policy == FailurePolicy::Halt && !halted {
                warn!("halting after level {} on failure", level);
                halted = true;
            }
        }

        ctx.finish().await;

        let success = failed.is_empty();
        info!(
            "run {} finished: success={} executed={} skipped={}",
            run_id,
            success,
            node_results.len(),
            skipped.len()
        );

        Ok(RunResult {
            run_id,
            success,
            node_results,
            outputs,
            skipped,
            levels: graph.get_level_nodes().clone(),
            violations,
        })
    }
}

// ---------------------------------------------------------------------------
// Input resolution
// ---------------------------------------------------------------------------

/// Initial inputs, then completed outputs by node id, then mappings.
fn build_input(
    node: &NodeConfig,
    initial: &Map<String, Value>,
    outputs: &Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let mut input = initial.clone();
    input.extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));

    for (placeholder, mapping) in &node.input_mappings {
        let value = match mapping {
            InputMapping::Literal(value) => value.clone(),
            InputMapping::Reference {
                source_node_id,
                source_output_key,
            } => {
                let source = outputs.get(source_node_id).ok_or_else(|| {
                    NodeError::MissingInput(format!(
                        "'{placeholder}' needs output of '{source_node_id}', which has none"
                    ))
                })?;
                if source_output_key == WHOLE_PAYLOAD {
                    source.clone()
                } else {
                    lookup_value(source, source_output_key).cloned().ok_or_else(|| {
                        NodeError::MissingInput(format!(
                            "'{placeholder}' references '{source_node_id}.{source_output_key}', which does not exist"
                        ))
                    })?
                }
            }
        };
        input.insert(placeholder.clone(), value);
    }
    Ok(input)
}

fn type_matches(type_name: &str, value: &Value) -> bool {
    match type_name {
        "str" => value.is_string(),
        "int" => value.is_i64() || value.is_u64(),
        "float" => value.is_number(),
        "bool" => value.is_boolean(),
        "dict" => value.is_object(),
        "list" => value.is_array(),
        _ => true,
    }
}

fn schema_violations(schema: &Schema, input: &Map<String, Value>) -> Vec<String> {
    schema
        .iter()
        .filter_map(|(key, type_name)| match input.get(key) {
            None => Some(format!("'{key}' is missing")),
            Some(value) if !type_matches(type_name, value) => {
                Some(format!("'{key}' is not of type {type_name}"))
            }
            Some(_) => None,
        })
        .collect()
}

/// Enforced when `strict`, otherwise only logged.
fn check_input_schema(
    node: &NodeConfig,
    input: &Map<String, Value>,
    strict: bool,
) -> Result<(), NodeError> {
    let Some(schema) = &node.input_schema else {
        return Ok(());
    };
    let violations = schema_violations(schema, input);
    if violations.is_empty() {
        return Ok(());
    }
    let message = violations.join("; ");
    if strict {
        Err(NodeError::InvalidInput(message))
    } else {
        warn!("node '{}' input does not match its schema: {}", node.id, message);
        Ok(())
    }
}

fn condition_decision(node: &NodeConfig, output: &Map<String, Value>) -> Option<bool> {
    node.branches()?;
    output.get("result").and_then(Value::as_bool)
}

//! The engine's [`RunContext`]: dispatch boundary and child-run scopes.
//!
//! Every dispatch goes through [`ChainContext::guarded_execute`], which adds
//! the timeout and catches executor panics. Child runs (nested chains, loop
//! bodies, parallel branches) get their own graph, resolver and execution
//! context; only preferences and metadata are inherited.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use nodes::executors::{CAN_RECURSE_KEY, ITERATION_KEY};
use nodes::{
    Capabilities, ChildRun, ExecutionPreferences, ExecutionTimer, NodeConfig, NodeError,
    NodeExecutionResult, NodeExecutor, NodeKind, RunContext,
};

use crate::context::WorkflowExecutionContext;
use crate::executor::{Dispatched, RunScope, WorkflowExecutor};
use crate::workflow::Workflow;

#[derive(Clone)]
pub(crate) struct ChainContext {
    executor: WorkflowExecutor,
    scope: RunScope,
    preferences: ExecutionPreferences,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

impl ChainContext {
    pub(crate) fn new(
        executor: WorkflowExecutor,
        scope: RunScope,
        preferences: ExecutionPreferences,
    ) -> Self {
        Self {
            executor,
            scope,
            preferences,
        }
    }

    fn budget(&self, node: &NodeConfig) -> Option<Duration> {
        node.timeout_seconds
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .or(self.executor.config.default_timeout)
    }

    /// One dispatch with the node's time budget; panics become failures.
    #[instrument(
        skip(self, executor, node, input),
        fields(node_id = %node.id, node_type = %node.node_type())
    )]
    pub(crate) async fn guarded_execute(
        &self,
        executor: &dyn NodeExecutor,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> Dispatched {
        let timer = ExecutionTimer::start();
        let call = AssertUnwindSafe(executor.execute(self, node, input)).catch_unwind();

        let outcome = match self.budget(node) {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = NodeError::Timeout {
                        node_id: node.id.clone(),
                        seconds: limit.as_secs_f64(),
                    };
                    return Dispatched {
                        result: NodeExecutionResult::failure(node, &err, timer),
                        timed_out: true,
                    };
                }
            },
            None => call.await,
        };

        let result = outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!("executor for node '{}' panicked: {}", node.id, message);
            NodeExecutionResult::failure(node, &NodeError::Panicked(message), timer)
        });
        Dispatched {
            result,
            timed_out: false,
        }
    }

    /// Dispatch `node`, re-invoking it while a round asks to recurse.
    ///
    /// The last round's carried output is merged under the terminal round's
    /// fields, and timing covers every round.
    pub(crate) async fn run_node(
        &self,
        executor: Arc<dyn NodeExecutor>,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> Dispatched {
        let timer = ExecutionTimer::start();
        let max_rounds = match &node.kind {
            NodeKind::Recursive(cfg) => cfg.max_iterations as usize + 1,
            _ => 1,
        };

        let mut round_input = input;
        let mut carried: Map<String, Value> = Map::new();
        let mut rounds = 0usize;

        loop {
            let dispatched = self
                .guarded_execute(executor.as_ref(), node, round_input.clone())
                .await;
            rounds += 1;
            if !dispatched.result.success {
                return dispatched;
            }

            let mut output = dispatched.result.output;
            let again = output
                .remove(CAN_RECURSE_KEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let iteration = output.remove(ITERATION_KEY);

            if !again || rounds >= max_rounds {
                let mut merged = std::mem::take(&mut carried);
                merged.extend(output);
                let result = if rounds == 1 {
                    NodeExecutionResult {
                        output: merged,
                        ..dispatched.result
                    }
                } else {
                    NodeExecutionResult::success(node, merged, timer)
                };
                return Dispatched {
                    result,
                    timed_out: false,
                };
            }

            debug!("node '{}' recursing (round {})", node.id, rounds);
            round_input.extend(output.iter().map(|(k, v)| (k.clone(), v.clone())));
            if let Some(iteration) = iteration {
                round_input.insert(ITERATION_KEY.into(), iteration);
            }
            carried = output;
        }
    }
}

#[async_trait]
impl RunContext for ChainContext {
    fn capabilities(&self) -> &Capabilities {
        &self.executor.capabilities
    }

    fn preferences(&self) -> &ExecutionPreferences {
        &self.preferences
    }

    fn session_id(&self) -> &str {
        &self.scope.session_id
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.scope.metadata
    }

    async fn dispatch(&self, node: &NodeConfig, input: Map<String, Value>) -> NodeExecutionResult {
        match self.executor.registry.resolve(node.node_type()) {
            Ok(executor) => self.guarded_execute(executor.as_ref(), node, input).await.result,
            Err(e) => NodeExecutionResult::failure(
                node,
                &NodeError::InvalidConfig(e.to_string()),
                ExecutionTimer::start(),
            ),
        }
    }

    async fn run_child(
        &self,
        owner: &NodeConfig,
        nodes: Vec<NodeConfig>,
        inputs: Map<String, Value>,
    ) -> Result<ChildRun, NodeError> {
        let depth = self.scope.depth + 1;
        let limit = self.executor.config.max_nesting_depth;
        if depth > limit {
            return Err(NodeError::ChildWorkflow(format!(
                "nesting depth {depth} exceeds the limit of {limit}"
            )));
        }

        let session_id = format!("{}/{}/{}", self.scope.session_id, owner.id, Uuid::new_v4());
        let workflow = Workflow::new(session_id.clone(), nodes)
            .map_err(|e| NodeError::ChildWorkflow(e.to_string()))?;
        let scope = RunScope {
            session_id,
            depth,
            metadata: self.scope.metadata.clone(),
        };
        let mut child_ctx = WorkflowExecutionContext::new(self.preferences.clone());

        let run = Box::pin(self.executor.run_scoped(&workflow, inputs, &mut child_ctx, scope))
            .await
            .map_err(|e| NodeError::ChildWorkflow(e.to_string()))?;

        let errors = run
            .failed_nodes()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.metadata.node_id,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        Ok(ChildRun {
            success: run.success,
            final_output: run.final_output(&workflow),
            outputs: run.outputs,
            errors,
        })
    }
}

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::kind_mismatch;
use crate::{
    AgentNode, ExecutionTimer, NodeConfig, NodeError, NodeExecutionResult, NodeExecutor,
    NodeKind, NodeType, RunContext, SwarmAgent, SwarmNode, SwarmStrategy,
};

/// Coordinates several agents under one of the swarm strategies.
pub struct SwarmExecutor;

#[async_trait]
impl NodeExecutor for SwarmExecutor {
    async fn execute(
        &self,
        ctx: &dyn RunContext,
        node: &NodeConfig,
        input: Map<String, Value>,
    ) -> NodeExecutionResult {
        let timer = ExecutionTimer::start();
        let outcome = match &node.kind {
            NodeKind::Swarm(cfg) => run_swarm(ctx, node, cfg, input).await,
            _ => Err(kind_mismatch(node, NodeType::Swarm)),
        };
        NodeExecutionResult::from_outcome(node, outcome, timer)
    }
}

/// What one agent produced: its package and output, or the error.
type AgentOutcome = (String, Result<Map<String, Value>, String>);

async fn run_member(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    member: &SwarmAgent,
    mut input: Map<String, Value>,
) -> AgentOutcome {
    if let Some(role) = &member.role {
        input.insert("role".into(), json!(role));
    }
    let delegate = NodeConfig {
        id: format!("{}.{}", node.id, member.package),
        kind: NodeKind::Agent(AgentNode::for_package(member.package.clone())),
        ..node.clone()
    };
    let result = ctx.dispatch(&delegate, input).await;
    let outcome = if result.success {
        Ok(result.output)
    } else {
        Err(result.error.unwrap_or_default())
    };
    (member.package.clone(), outcome)
}

async fn run_members(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    members: &[SwarmAgent],
    input: &Map<String, Value>,
) -> Vec<AgentOutcome> {
    join_all(
        members
            .iter()
            .map(|member| run_member(ctx, node, member, input.clone())),
    )
    .await
}

fn summarize(outcomes: &[AgentOutcome]) -> Vec<Value> {
    outcomes
        .iter()
        .map(|(package, outcome)| match outcome {
            Ok(output) => json!({ "agent": package, "output": output }),
            Err(error) => json!({ "agent": package, "error": error }),
        })
        .collect()
}

/// The value an agent votes with: its `result` field, or its whole output.
fn vote(output: &Map<String, Value>) -> Value {
    output
        .get("result")
        .cloned()
        .unwrap_or_else(|| Value::Object(output.clone()))
}

fn consensus(outcomes: &[AgentOutcome]) -> Option<(Value, usize)> {
    let mut tally: Vec<(Value, usize)> = Vec::new();
    for output in outcomes.iter().filter_map(|(_, o)| o.as_ref().ok()) {
        let ballot = vote(output);
        match tally.iter_mut().find(|(v, _)| *v == ballot) {
            Some((_, count)) => *count += 1,
            None => tally.push((ballot, 1)),
        }
    }
    // First-seen wins ties.
    let mut best: Option<(Value, usize)> = None;
    for (value, count) in tally {
        if best.as_ref().map_or(true, |(_, top)| count > *top) {
            best = Some((value, count));
        }
    }
    best
}

fn highest_bid(outcomes: &[AgentOutcome]) -> Option<(String, Map<String, Value>, f64)> {
    let mut best: Option<(String, Map<String, Value>, f64)> = None;
    for (package, outcome) in outcomes {
        let Ok(output) = outcome else { continue };
        let Some(bid) = output.get("bid").and_then(Value::as_f64) else {
            continue;
        };
        if best.as_ref().map_or(true, |(_, _, top)| bid > *top) {
            best = Some((package.clone(), output.clone(), bid));
        }
    }
    best
}

fn all_failed(outcomes: &[AgentOutcome]) -> NodeError {
    let reasons: Vec<String> = outcomes
        .iter()
        .filter_map(|(p, o)| o.as_ref().err().map(|e| format!("{p}: {e}")))
        .collect();
    NodeError::ChildWorkflow(format!("no usable agent output ({})", reasons.join("; ")))
}

async fn run_swarm(
    ctx: &dyn RunContext,
    node: &NodeConfig,
    cfg: &SwarmNode,
    input: Map<String, Value>,
) -> Result<Map<String, Value>, NodeError> {
    let Some((coordinator, workers)) = cfg.agents.split_first() else {
        return Err(NodeError::InvalidConfig("swarm needs at least one agent".into()));
    };
    debug!(node_id = %node.id, strategy = cfg.strategy.as_str(), agents = cfg.agents.len(), "swarm start");

    let mut output = Map::new();
    output.insert("strategy".into(), json!(cfg.strategy.as_str()));

    match cfg.strategy {
        SwarmStrategy::Consensus => {
            let outcomes = run_members(ctx, node, &cfg.agents, &input).await;
            let (decision, votes) = consensus(&outcomes).ok_or_else(|| all_failed(&outcomes))?;
            output.insert("decision".into(), decision);
            output.insert("votes".into(), json!(votes));
            output.insert("agent_outputs".into(), Value::Array(summarize(&outcomes)));
        }
        SwarmStrategy::Hierarchical => {
            let outcomes = run_members(ctx, node, workers, &input).await;
            for (package, o) in &outcomes {
                if let Err(e) = o {
                    warn!(node_id = %node.id, agent = %package, error = %e, "swarm worker failed");
                }
            }
            let worker_outputs = summarize(&outcomes);
            let mut scope = input;
            scope.insert("worker_outputs".into(), Value::Array(worker_outputs.clone()));
            let (package, lead) = run_member(ctx, node, coordinator, scope).await;
            let lead = lead.map_err(|e| {
                NodeError::ChildWorkflow(format!("coordinator '{package}' failed: {e}"))
            })?;
            output.insert("decision".into(), vote(&lead));
            output.insert("coordinator".into(), json!(package));
            output.insert("agent_outputs".into(), Value::Array(worker_outputs));
        }
        SwarmStrategy::Marketplace => {
            let outcomes = run_members(ctx, node, &cfg.agents, &input).await;
            let (winner, winning, bid) =
                highest_bid(&outcomes).ok_or_else(|| all_failed(&outcomes))?;
            output.insert("decision".into(), vote(&winning));
            output.insert("winner".into(), json!(winner));
            output.insert("bid".into(), json!(bid));
            output.insert("agent_outputs".into(), Value::Array(summarize(&outcomes)));
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRunContext, ScriptedAgent};
    use crate::Capabilities;
    use std::sync::Arc;

    fn member(package: &str) -> SwarmAgent {
        SwarmAgent {
            package: package.into(),
            role: None,
        }
    }

    fn swarm(strategy: SwarmStrategy, packages: &[&str]) -> NodeConfig {
        NodeConfig::new(
            "council",
            NodeKind::Swarm(SwarmNode {
                agents: packages.iter().map(|p| member(p)).collect(),
                strategy,
            }),
        )
    }

    fn finishing(result: Value) -> Arc<ScriptedAgent> {
        Arc::new(ScriptedAgent::finishing(result))
    }

    #[tokio::test]
    async fn consensus_picks_the_majority_result() {
        let caps = Capabilities::new()
            .with_agent("a", finishing(json!({ "result": "ship" })))
            .with_agent("b", finishing(json!({ "result": "wait" })))
            .with_agent("c", finishing(json!({ "result": "ship" })));
        let ctx = MockRunContext::new(caps);

        let result = SwarmExecutor
            .execute(&ctx, &swarm(SwarmStrategy::Consensus, &["a", "b", "c"]), Map::new())
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["decision"], "ship");
        assert_eq!(result.output["votes"], 2);
        assert_eq!(result.output["agent_outputs"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn hierarchical_coordinator_sees_worker_outputs() {
        let lead = finishing(json!({ "result": "merged" }));
        let caps = Capabilities::new()
            .with_agent("lead", lead.clone())
            .with_agent("w1", finishing(json!({ "result": 1 })))
            .with_agent("w2", finishing(json!({ "result": 2 })));
        let ctx = MockRunContext::new(caps);

        let result = SwarmExecutor
            .execute(&ctx, &swarm(SwarmStrategy::Hierarchical, &["lead", "w1", "w2"]), Map::new())
            .await;

        assert_eq!(result.output["decision"], "merged");
        assert_eq!(result.output["coordinator"], "lead");
        let turns = lead.turns.lock().unwrap();
        assert_eq!(turns[0].input["worker_outputs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn marketplace_takes_the_highest_bid() {
        let caps = Capabilities::new()
            .with_agent("cheap", finishing(json!({ "bid": 0.2, "result": "cheap plan" })))
            .with_agent("pricy", finishing(json!({ "bid": 0.9, "result": "pricy plan" })));
        let ctx = MockRunContext::new(caps);

        let result = SwarmExecutor
            .execute(&ctx, &swarm(SwarmStrategy::Marketplace, &["cheap", "pricy"]), Map::new())
            .await;

        assert_eq!(result.output["winner"], "pricy");
        assert_eq!(result.output["decision"], "pricy plan");
    }

    #[tokio::test]
    async fn every_agent_failing_fails_the_node() {
        let ctx = MockRunContext::new(Capabilities::new());
        let result = SwarmExecutor
            .execute(&ctx, &swarm(SwarmStrategy::Consensus, &["ghost"]), Map::new())
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("ghost"));
    }
}

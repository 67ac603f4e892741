//! Branch gating: which nodes may run given the condition decisions so far.
//!
//! Exclusions from all recorded decisions are OR-ed together, so a node
//! named in the non-taken branch of *any* decided condition is inactive
//! regardless of the order decisions were recorded in. Inactivity then
//! propagates to every transitive dependent. Failed nodes are treated the
//! same way, which is how `continue_if_possible` finds what it must skip.

use std::collections::{HashMap, HashSet};

use nodes::NodeConfig;
use tracing::debug;

use crate::graph::DependencyGraph;

/// Why a node will not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// Named in the non-taken branch of `condition`.
    Branch { condition: String },
    /// A dependency failed or is itself inactive.
    Upstream { dependency: String },
}

#[derive(Debug, Clone)]
struct BranchLists {
    true_branch: Vec<String>,
    false_branch: Vec<String>,
}

/// Per-run resolver of node activity.
#[derive(Debug, Clone)]
pub struct BranchGatingResolver {
    branches: HashMap<String, BranchLists>,
    dependencies: HashMap<String, Vec<String>>,
    /// Recording order, kept for diagnostics.
    decisions: Vec<(String, bool)>,
    failed: HashSet<String>,
    active_cache: HashMap<String, bool>,
}

impl BranchGatingResolver {
    pub fn new(nodes: &[NodeConfig], graph: &DependencyGraph) -> Self {
        let branches = nodes
            .iter()
            .filter_map(|node| {
                node.branches().map(|(t, f)| {
                    (
                        node.id.clone(),
                        BranchLists {
                            true_branch: t.to_vec(),
                            false_branch: f.to_vec(),
                        },
                    )
                })
            })
            .collect();
        let dependencies = nodes
            .iter()
            .map(|node| {
                (
                    node.id.clone(),
                    graph.get_node_dependencies(&node.id).to_vec(),
                )
            })
            .collect();
        Self {
            branches,
            dependencies,
            decisions: Vec::new(),
            failed: HashSet::new(),
            active_cache: HashMap::new(),
        }
    }

    /// Store (or replace) the decision of `condition_id` and drop every
    /// memoized activity result.
    pub fn record_decision(&mut self, condition_id: &str, decision: bool) {
        match self.decisions.iter_mut().find(|(id, _)| id == condition_id) {
            Some((_, existing)) => *existing = decision,
            None => self.decisions.push((condition_id.to_owned(), decision)),
        }
        self.active_cache.clear();
        debug!(condition = condition_id, decision, "branch decision recorded");
    }

    pub fn decision(&self, condition_id: &str) -> Option<bool> {
        self.decisions
            .iter()
            .find(|(id, _)| id == condition_id)
            .map(|(_, d)| *d)
    }

    /// Decisions in the order they were first recorded.
    pub fn decisions(&self) -> &[(String, bool)] {
        &self.decisions
    }

    /// Mark `node_id` as failed; its dependents become inactive.
    pub fn record_failure(&mut self, node_id: &str) {
        if self.failed.insert(node_id.to_owned()) {
            self.active_cache.clear();
        }
    }

    pub fn is_failed(&self, node_id: &str) -> bool {
        self.failed.contains(node_id)
    }

    pub fn is_node_active(&mut self, node_id: &str) -> bool {
        let mut visiting = HashSet::new();
        self.resolve(node_id, &mut visiting)
    }

    /// First reason `node_id` is inactive, or `None` when it is active.
    ///
    /// Branch exclusions are reported before upstream ones; among branches
    /// the earliest recorded decision is named.
    pub fn exclusion_reason(&mut self, node_id: &str) -> Option<Exclusion> {
        if let Some(condition) = self.branch_exclusion(node_id) {
            return Some(Exclusion::Branch { condition });
        }
        let deps = self.dependencies.get(node_id).cloned().unwrap_or_default();
        deps.into_iter()
            .find(|dep| !self.is_node_active(dep))
            .map(|dependency| Exclusion::Upstream { dependency })
    }

    fn branch_exclusion(&self, node_id: &str) -> Option<String> {
        self.decisions.iter().find_map(|(condition, decision)| {
            let lists = self.branches.get(condition)?;
            let losing = if *decision {
                &lists.false_branch
            } else {
                &lists.true_branch
            };
            losing
                .iter()
                .any(|id| id == node_id)
                .then(|| condition.clone())
        })
    }

    fn resolve(&mut self, node_id: &str, visiting: &mut HashSet<String>) -> bool {
        if let Some(&cached) = self.active_cache.get(node_id) {
            return cached;
        }
        // The forward graph is acyclic; the guard only protects direct use
        // with hand-built dependency maps.
        if !visiting.insert(node_id.to_owned()) {
            return true;
        }

        let active = if self.failed.contains(node_id) || self.branch_exclusion(node_id).is_some()
        {
            false
        } else {
            let deps = self.dependencies.get(node_id).cloned().unwrap_or_default();
            deps.iter().all(|dep| self.resolve(dep, visiting))
        };

        visiting.remove(node_id);
        self.active_cache.insert(node_id.to_owned(), active);
        active
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use nodes::{ConditionNode, NodeKind, ToolNode};
    use serde_json::Map;

    fn tool(id: &str, deps: &[&str]) -> NodeConfig {
        NodeConfig::new(
            id,
            NodeKind::Tool(ToolNode {
                tool_name: "noop".into(),
                tool_args: Map::new(),
            }),
        )
        .with_dependencies(deps.iter().copied())
    }

    fn condition(id: &str, t: &[&str], f: &[&str]) -> NodeConfig {
        NodeConfig::new(
            id,
            NodeKind::Condition(ConditionNode {
                expression: "true".into(),
                true_branch: t.iter().map(|s| s.to_string()).collect(),
                false_branch: f.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    fn resolver(nodes: &[NodeConfig]) -> BranchGatingResolver {
        let graph = DependencyGraph::build(nodes).unwrap();
        BranchGatingResolver::new(nodes, &graph)
    }

    #[test]
    fn decision_excludes_the_losing_branch() {
        // X is listed on the true branch, so a `false` decision excludes it.
        let nodes = [condition("c", &["X"], &["Y"]), tool("X", &["c"]), tool("Y", &["c"])];
        let mut r = resolver(&nodes);

        r.record_decision("c", true);
        assert!(r.is_node_active("X"));
        assert!(!r.is_node_active("Y"));

        r.record_decision("c", false);
        assert!(!r.is_node_active("X"));
        assert!(r.is_node_active("Y"));
    }

    #[test]
    fn false_branch_member_is_excluded_by_true_decision() {
        let nodes = [condition("c", &[], &["X"]), tool("X", &[])];
        let mut r = resolver(&nodes);

        r.record_decision("c", true);
        assert!(!r.is_node_active("X"));
        r.record_decision("c", false);
        assert!(r.is_node_active("X"));
    }

    #[test]
    fn repeated_identical_decision_is_idempotent() {
        let nodes = [condition("c", &["X"], &["Y"]), tool("X", &[]), tool("Y", &[])];
        let mut r = resolver(&nodes);

        r.record_decision("c", true);
        let before = (r.is_node_active("X"), r.is_node_active("Y"));
        r.record_decision("c", true);
        assert_eq!(before, (r.is_node_active("X"), r.is_node_active("Y")));
        assert_eq!(r.decisions().len(), 1);
    }

    #[test]
    fn inactivity_propagates_to_transitive_dependents() {
        let nodes = [
            condition("c", &["yes"], &["no"]),
            tool("no", &["c"]),
            tool("after_no", &["no"]),
            tool("far", &["after_no"]),
        ];
        let mut r = resolver(&nodes);

        r.record_decision("c", true);
        assert!(!r.is_node_active("far"));
        assert_eq!(
            r.exclusion_reason("far"),
            Some(Exclusion::Upstream {
                dependency: "after_no".into()
            })
        );
        assert_eq!(
            r.exclusion_reason("no"),
            Some(Exclusion::Branch { condition: "c".into() })
        );
    }

    #[test]
    fn exclusions_from_different_conditions_are_combined() {
        // X is on c1's true branch and c2's false branch.
        let nodes = [
            condition("c1", &["X"], &[]),
            condition("c2", &[], &["X"]),
            tool("X", &[]),
        ];

        let mut a = resolver(&nodes);
        a.record_decision("c1", true);
        a.record_decision("c2", true);
        let mut b = resolver(&nodes);
        b.record_decision("c2", true);
        b.record_decision("c1", true);

        assert!(!a.is_node_active("X"));
        assert!(!b.is_node_active("X"));
    }

    #[test]
    fn failure_deactivates_dependents_only() {
        let nodes = [
            tool("a", &[]),
            tool("b", &["a"]),
            tool("c", &["b"]),
            tool("side", &[]),
        ];
        let mut r = resolver(&nodes);

        r.record_failure("a");
        assert!(r.is_failed("a"));
        assert!(!r.is_node_active("c"));
        assert!(r.is_node_active("side"));
        assert_eq!(
            r.exclusion_reason("b"),
            Some(Exclusion::Upstream { dependency: "a".into() })
        );
    }

    #[test]
    fn undecided_conditions_exclude_nothing() {
        let nodes = [condition("c", &["X"], &["Y"]), tool("X", &[]), tool("Y", &[])];
        let mut r = resolver(&nodes);
        assert!(r.is_node_active("X"));
        assert!(r.is_node_active("Y"));
        assert_eq!(r.exclusion_reason("X"), None);
    }
}

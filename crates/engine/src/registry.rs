//! Executor registry: node type → executor, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use nodes::executors::builtin_executor;
use nodes::{NodeExecutor, NodeType};

use crate::EngineError;

/// Immutable-after-startup lookup of executors by node type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.executors.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("ExecutorRegistry").field("types", &types).finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every builtin executor.
    pub fn builtin() -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for node_type in NodeType::ALL {
            registry.register(node_type, builtin_executor(node_type))?;
        }
        Ok(registry)
    }

    /// # Errors
    /// [`EngineError::DuplicateExecutor`] when `node_type` already has one.
    pub fn register(
        &mut self,
        node_type: NodeType,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<(), EngineError> {
        if self.executors.contains_key(&node_type) {
            return Err(EngineError::DuplicateExecutor(node_type.to_string()));
        }
        self.executors.insert(node_type, executor);
        Ok(())
    }

    /// # Errors
    /// [`EngineError::UnknownNodeType`] when nothing is registered.
    pub fn resolve(&self, node_type: NodeType) -> Result<Arc<dyn NodeExecutor>, EngineError> {
        self.executors
            .get(&node_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }
}

//! Per-run execution context and the write-behind snapshot buffer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use nodes::ExecutionPreferences;

use crate::EngineError;

pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

/// Durable sink for state snapshots.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn bulk_save(&self, entries: Vec<(String, Value)>) -> Result<(), EngineError>;
}

/// Keeps every flushed snapshot in memory, in flush order.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
    flushes: Arc<Mutex<usize>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Latest snapshot stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Number of `bulk_save` calls received.
    pub fn flush_count(&self) -> usize {
        self.flushes.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn bulk_save(&self, entries: Vec<(String, Value)>) -> Result<(), EngineError> {
        let mut stored = self
            .entries
            .lock()
            .map_err(|_| EngineError::Store("memory store lock poisoned".into()))?;
        stored.extend(entries);
        if let Ok(mut n) = self.flushes.lock() {
            *n += 1;
        }
        Ok(())
    }
}

/// Workflow-scoped preferences plus a buffer of pending snapshots.
///
/// Without a store every persistence call is a no-op, so the execution core
/// runs fully in memory.
pub struct WorkflowExecutionContext {
    pub preferences: ExecutionPreferences,
    flush_threshold: usize,
    buffer: Vec<(String, Value)>,
    store: Option<Arc<dyn StateStore>>,
}

impl std::fmt::Debug for WorkflowExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutionContext")
            .field("preferences", &self.preferences)
            .field("flush_threshold", &self.flush_threshold)
            .field("buffered", &self.buffer.len())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl Default for WorkflowExecutionContext {
    fn default() -> Self {
        Self::new(ExecutionPreferences::default())
    }
}

impl WorkflowExecutionContext {
    pub fn new(preferences: ExecutionPreferences) -> Self {
        Self {
            preferences,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            buffer: Vec::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// A threshold of zero behaves like one: flush on every write.
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a snapshot; flushes once the buffer reaches the threshold.
    pub async fn persist_state(&mut self, key: impl Into<String>, state: Value) -> Result<(), EngineError> {
        if self.store.is_none() {
            return Ok(());
        }
        self.buffer.push((key.into(), state));
        if self.buffer.len() >= self.flush_threshold {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write every buffered snapshot. On failure the entries stay buffered.
    pub async fn flush(&mut self) -> Result<(), EngineError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if self.buffer.is_empty() {
            return Ok(());
        }
        let entries = self.buffer.clone();
        store.bulk_save(entries).await?;
        debug!(entries = self.buffer.len(), "state buffer flushed");
        self.buffer.clear();
        Ok(())
    }

    /// End-of-run flush; failures are logged, never returned.
    pub async fn finish(&mut self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, pending = self.buffer.len(), "final state flush failed");
        }
    }
}

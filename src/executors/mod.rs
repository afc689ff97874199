//! Executors — the boundary where a resolved operation would reach a real
//! backend (spec §6). Executing actual external side effects is
//! explicitly out of scope for this crate; `fake` provides deterministic
//! in-memory stand-ins so the orchestrator, resolvers and entity
//! resolvers can be exercised end-to-end in tests and the CLI demo.

pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Uniform result shape for both executor operations (spec §6: "`list`...
/// `mutate`... each at minimum").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ExecutorResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self { success: true, data, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: serde_json::Value::Null, error: Some(message.into()) }
    }
}

/// One capability's backend surface (spec §6). A real implementation
/// would speak to Google Calendar, a task store API, etc.; this crate
/// only needs the shape, since acting on it is out of scope.
#[async_trait]
pub trait Executor: Send + Sync {
    /// List items matching a filter — used by EntityResolvers to fetch
    /// disambiguation candidates.
    async fn list(&self, filter: serde_json::Value) -> ExecutorResult;

    /// Apply a mutation once an operation's target has been resolved.
    async fn mutate(&self, op: &str, args: serde_json::Value) -> ExecutorResult;
}

/// Registry of executors keyed by entity type, the same key space
/// [`crate::entities::EntityResolverRegistry`] and
/// [`crate::entities::entity_type_for_step`] use.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: std::collections::HashMap<&'static str, std::sync::Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: &'static str, executor: std::sync::Arc<dyn Executor>) {
        self.executors.insert(entity_type, executor);
    }

    pub fn get(&self, entity_type: &str) -> Option<std::sync::Arc<dyn Executor>> {
        self.executors.get(entity_type).cloned()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::dag::TaskStep;

/// External collaborator that performs the actual work for one step.
///
/// Implementations must tolerate concurrent invocations for unrelated
/// steps within the same wave; the coordinator calls them through an
/// `Arc` from spawned tasks. An `Err` marks the step failed and fails
/// its dependents; it never aborts the run.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute `step`. `dep_results` carries `(id, result)` pairs for
    /// the step's completed dependencies, in declared dependency order.
    async fn execute(&self, step: &TaskStep, dep_results: &[(String, Value)]) -> Result<Value>;
}

/// Executors keyed by the opaque `agent_type` tag on each step.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `agent_type`, replacing any previous
    /// registration for that tag.
    pub fn register(&mut self, agent_type: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(agent_type.into(), executor);
    }

    pub fn with_executor(
        mut self,
        agent_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        self.register(agent_type, executor);
        self
    }

    pub fn get(&self, agent_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(agent_type).cloned()
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.executors.contains_key(agent_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl StepExecutor for EchoExecutor {
        async fn execute(&self, step: &TaskStep, _deps: &[(String, Value)]) -> Result<Value> {
            Ok(json!({ "echo": step.name }))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExecutorRegistry::new().with_executor("echo", Arc::new(EchoExecutor));

        assert!(registry.contains("echo"));
        assert!(!registry.contains("missing"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_executor_receives_step() {
        let registry = ExecutorRegistry::new().with_executor("echo", Arc::new(EchoExecutor));
        let step = TaskStep::new("hello", "echo");

        let executor = registry.get("echo").unwrap();
        let result = executor.execute(&step, &[]).await.unwrap();
        assert_eq!(result["echo"], "hello");
    }
}

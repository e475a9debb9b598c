use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a step.
///
/// Transitions are `Pending -> Running -> {Completed | Failed}`, plus
/// `Pending -> Failed` when an upstream dependency fails. A terminal
/// status is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed { reason: String },
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Pending
    }
}

/// One schedulable unit of work.
///
/// `agent_type` is an opaque tag selecting which executor handles the
/// step; the scheduler never interprets it. `dependencies` lists the
/// ids of steps that must complete before this one may start, and is
/// fixed at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub name: String,
    pub description: String,
    pub agent_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: StepStatus,
    /// Executor output; set only when `status == Completed`.
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: format!("step-{}", Uuid::new_v4().to_string().split('-').next().unwrap()),
            name: name.into(),
            description: String::new(),
            agent_type: agent_type.into(),
            dependencies: vec![],
            status: StepStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a single dependency id.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Replace the dependency list wholesale.
    pub fn with_dependencies(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, StepStatus::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, StepStatus::Running)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, StepStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StepStatus::Failed { .. })
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failed()
    }

    /// Failure reason, if the step failed.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            StepStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to `Completed`, storing the executor's result.
    /// No-op if the step is already terminal.
    pub(crate) fn complete(&mut self, result: Value) {
        if self.is_terminal() {
            return;
        }
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Transition to `Failed`. No-op if the step is already terminal.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.status = StepStatus::Failed { reason: reason.into() };
        self.completed_at = Some(Utc::now());
    }
}

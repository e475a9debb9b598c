use thiserror::Error;

/// Configuration errors surfaced before any step executes.
///
/// Executor failures are never represented here: an individual step's
/// failure is recorded on the step itself and propagated to its
/// dependents, and a stalled run is a [`RunStatus`] outcome, not an
/// error.
///
/// [`RunStatus`]: crate::coordinator::RunStatus
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Two steps in the collection share an id.
    #[error("duplicate step id: {id}")]
    DuplicateStep { id: String },

    /// A step depends on an id not present in the collection.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected involving step '{step}'")]
    CycleDetected { step: String },

    /// A step's agent type has no registered executor.
    #[error("step '{step}' names agent type '{agent_type}' with no registered executor")]
    UnknownAgentType { step: String, agent_type: String },
}

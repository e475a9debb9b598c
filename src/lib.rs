pub mod coordinator;
pub mod dag;
pub mod error;
pub mod executor;
pub mod notify;

pub use coordinator::{Coordinator, CoordinatorConfig, RunReport, RunStatus};
pub use dag::{GraphStats, StepGraph, StepStatus, TaskStep};
pub use error::SchedulerError;
pub use executor::{ExecutorRegistry, StepExecutor};
pub use notify::{ChannelNotifier, NoopNotifier, Notifier, StepEvent};

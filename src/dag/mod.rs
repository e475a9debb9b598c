mod graph;
mod step;

pub use graph::{GraphStats, StepGraph};
pub use step::{StepStatus, TaskStep};

use std::collections::{HashMap, VecDeque};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde_json::Value;

use crate::error::SchedulerError;

use super::step::{StepStatus, TaskStep};

/// The step collection plus its dependency graph.
///
/// Nodes are step ids; an edge `a -> b` means `b` depends on `a`.
/// Dependency ids that reference nothing in the collection produce no
/// edge; such a step can never become ready (it stalls the run unless
/// [`StepGraph::validate`] rejected it first).
#[derive(Debug)]
pub struct StepGraph {
    graph: DiGraph<String, ()>,
    steps: HashMap<String, TaskStep>,
    indices: HashMap<String, NodeIndex>,
}

impl StepGraph {
    /// Build the graph from a step collection.
    ///
    /// Duplicate ids are always rejected; dangling dependency ids and
    /// cycles are left for [`validate`](Self::validate).
    pub fn from_steps(steps: Vec<TaskStep>) -> Result<Self, SchedulerError> {
        let mut graph = DiGraph::new();
        let mut map = HashMap::new();
        let mut indices = HashMap::new();

        for step in steps {
            if map.contains_key(&step.id) {
                return Err(SchedulerError::DuplicateStep { id: step.id });
            }
            let idx = graph.add_node(step.id.clone());
            indices.insert(step.id.clone(), idx);
            map.insert(step.id.clone(), step);
        }

        for step in map.values() {
            let to_idx = indices[&step.id];
            for dep_id in &step.dependencies {
                if let Some(&from_idx) = indices.get(dep_id) {
                    graph.add_edge(from_idx, to_idx, ());
                }
            }
        }

        Ok(Self { graph, steps: map, indices })
    }

    /// Check the graph for dangling dependency ids and cycles.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for step in self.steps.values() {
            for dep_id in &step.dependencies {
                if !self.steps.contains_key(dep_id) {
                    return Err(SchedulerError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep_id.clone(),
                    });
                }
            }
        }

        toposort(&self.graph, None)
            .map_err(|cyclic| SchedulerError::CycleDetected {
                step: self.graph[cyclic.node_id()].clone(),
            })?;

        Ok(())
    }

    /// Pending steps whose every dependency is completed.
    ///
    /// An empty dependency list is trivially satisfied; a dependency id
    /// missing from the collection never is.
    pub fn ready_steps(&self) -> Vec<&TaskStep> {
        self.steps
            .values()
            .filter(|step| {
                step.is_pending()
                    && step.dependencies.iter().all(|dep_id| {
                        self.steps.get(dep_id).map(|d| d.is_completed()).unwrap_or(false)
                    })
            })
            .collect()
    }

    /// Results of a step's dependencies, in declared dependency order.
    pub fn dependency_results(&self, step_id: &str) -> Vec<(String, Value)> {
        let Some(step) = self.steps.get(step_id) else {
            return vec![];
        };

        step.dependencies
            .iter()
            .filter_map(|dep_id| {
                self.steps
                    .get(dep_id)
                    .and_then(|d| d.result.clone())
                    .map(|r| (dep_id.clone(), r))
            })
            .collect()
    }

    /// Mark every pending dependent of `failed_id` as failed, then the
    /// dependents of those, until no more steps are affected.
    ///
    /// Each newly failed step's reason names the direct dependency that
    /// failed. Steps already running or terminal are left untouched.
    /// Returns the newly failed ids so the caller can report them.
    pub(crate) fn fail_dependents(&mut self, failed_id: &str) -> Vec<String> {
        let mut newly_failed = vec![];
        let mut worklist = VecDeque::from([failed_id.to_string()]);

        while let Some(id) = worklist.pop_front() {
            for dep_id in self.dependents_of(&id) {
                if let Some(step) = self.steps.get_mut(&dep_id) {
                    if step.is_pending() {
                        step.fail(format!("dependency '{}' failed", id));
                        newly_failed.push(dep_id.clone());
                        worklist.push_back(dep_id);
                    }
                }
            }
        }

        newly_failed
    }

    /// Ids of steps that directly depend on `step_id`.
    fn dependents_of(&self, step_id: &str) -> Vec<String> {
        let Some(&idx) = self.indices.get(step_id) else {
            return vec![];
        };

        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|dep_idx| self.graph[dep_idx].clone())
            .collect()
    }

    pub fn get(&self, step_id: &str) -> Option<&TaskStep> {
        self.steps.get(step_id)
    }

    pub(crate) fn get_mut(&mut self, step_id: &str) -> Option<&mut TaskStep> {
        self.steps.get_mut(step_id)
    }

    pub fn steps(&self) -> impl Iterator<Item = &TaskStep> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True once no step is pending or running.
    pub fn is_settled(&self) -> bool {
        self.steps.values().all(|s| s.is_terminal())
    }

    pub(crate) fn into_steps(self) -> Vec<TaskStep> {
        self.steps.into_values().collect()
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total: self.steps.len(),
            ..GraphStats::default()
        };
        for step in self.steps.values() {
            match step.status {
                StepStatus::Pending => stats.pending += 1,
                StepStatus::Running => stats.running += 1,
                StepStatus::Completed => stats.completed += 1,
                StepStatus::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> StepGraph {
        StepGraph::from_steps(vec![
            TaskStep::new("A", "worker").with_id("a"),
            TaskStep::new("B", "worker").with_id("b").depends_on("a"),
            TaskStep::new("C", "worker").with_id("c").depends_on("b"),
        ])
        .unwrap()
    }

    #[test]
    fn test_ready_steps_respect_dependencies() {
        let mut graph = chain();

        let ready = graph.ready_steps();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "a");

        graph.get_mut("a").unwrap().complete(json!(null));

        let ready = graph.ready_steps();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "b");
    }

    #[test]
    fn test_ready_steps_is_idempotent() {
        let graph = chain();
        let first: Vec<String> = graph.ready_steps().iter().map(|s| s.id.clone()).collect();
        let second: Vec<String> = graph.ready_steps().iter().map(|s| s.id.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_diamond_fan_out() {
        let mut graph = StepGraph::from_steps(vec![
            TaskStep::new("A", "worker").with_id("a"),
            TaskStep::new("B", "worker").with_id("b").depends_on("a"),
            TaskStep::new("C", "worker").with_id("c").depends_on("a"),
            TaskStep::new("D", "worker").with_id("d").with_dependencies(["b", "c"]),
        ])
        .unwrap();

        graph.get_mut("a").unwrap().complete(json!(1));

        let mut ready: Vec<&str> = graph.ready_steps().iter().map(|s| s.id.as_str()).collect();
        ready.sort();
        assert_eq!(ready, vec!["b", "c"]);

        // d waits for both branches
        graph.get_mut("b").unwrap().complete(json!(2));
        assert!(graph.ready_steps().iter().all(|s| s.id != "d"));

        graph.get_mut("c").unwrap().complete(json!(3));
        let ready: Vec<&str> = graph.ready_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["d"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = StepGraph::from_steps(vec![
            TaskStep::new("A", "worker").with_id("a"),
            TaskStep::new("A again", "worker").with_id("a"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateStep { id } if id == "a"));
    }

    #[test]
    fn test_validate_detects_dangling_dependency() {
        let graph = StepGraph::from_steps(vec![
            TaskStep::new("Z", "worker").with_id("z").depends_on("missing"),
        ])
        .unwrap();

        let err = graph.validate().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::UnknownDependency { ref step, ref dependency }
                if step == "z" && dependency == "missing"
        ));

        // and the step is never ready
        assert!(graph.ready_steps().is_empty());
    }

    #[test]
    fn test_validate_detects_cycle() {
        let graph = StepGraph::from_steps(vec![
            TaskStep::new("X", "worker").with_id("x").depends_on("y"),
            TaskStep::new("Y", "worker").with_id("y").depends_on("x"),
        ])
        .unwrap();

        assert!(matches!(graph.validate(), Err(SchedulerError::CycleDetected { .. })));
        assert!(graph.ready_steps().is_empty());
    }

    #[test]
    fn test_fail_dependents_collapses_chain() {
        let mut graph = chain();

        graph.get_mut("a").unwrap().start();
        graph.get_mut("a").unwrap().fail("boom");

        let mut newly = graph.fail_dependents("a");
        newly.sort();
        assert_eq!(newly, vec!["b", "c"]);

        assert_eq!(graph.get("b").unwrap().error(), Some("dependency 'a' failed"));
        assert_eq!(graph.get("c").unwrap().error(), Some("dependency 'b' failed"));
    }

    #[test]
    fn test_fail_dependents_skips_terminal_and_running() {
        let mut graph = StepGraph::from_steps(vec![
            TaskStep::new("A", "worker").with_id("a"),
            TaskStep::new("B", "worker").with_id("b").depends_on("a"),
            TaskStep::new("C", "worker").with_id("c").depends_on("a"),
        ])
        .unwrap();

        // c already completed in an earlier wave; b mid-flight
        graph.get_mut("c").unwrap().complete(json!(null));
        graph.get_mut("b").unwrap().start();
        graph.get_mut("a").unwrap().fail("boom");

        let newly = graph.fail_dependents("a");
        assert!(newly.is_empty());
        assert!(graph.get("b").unwrap().is_running());
        assert!(graph.get("c").unwrap().is_completed());
    }

    #[test]
    fn test_dependency_results_follow_declared_order() {
        let mut graph = StepGraph::from_steps(vec![
            TaskStep::new("A", "worker").with_id("a"),
            TaskStep::new("B", "worker").with_id("b"),
            TaskStep::new("D", "worker").with_id("d").with_dependencies(["b", "a"]),
        ])
        .unwrap();

        graph.get_mut("a").unwrap().complete(json!("ra"));
        graph.get_mut("b").unwrap().complete(json!("rb"));

        let results = graph.dependency_results("d");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("b".to_string(), json!("rb")));
        assert_eq!(results[1], ("a".to_string(), json!("ra")));
    }

    #[test]
    fn test_stats() {
        let mut graph = chain();
        graph.get_mut("a").unwrap().complete(json!(null));
        graph.get_mut("b").unwrap().start();

        let stats = graph.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 0);
        assert!(!graph.is_settled());
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dag::{GraphStats, StepGraph, TaskStep};
use crate::error::SchedulerError;
use crate::executor::ExecutorRegistry;
use crate::notify::{Notifier, NoopNotifier, StepEvent};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Reject duplicate ids, dangling dependencies, cycles, and
    /// unregistered agent types before anything runs. When disabled,
    /// an unschedulable graph surfaces as a stalled run instead.
    pub eager_validation: bool,
    /// Upper bound on a single executor invocation. A step whose
    /// executor exceeds it is failed, so one hung call cannot stall
    /// the whole run. `None` means no limit.
    pub step_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            eager_validation: true,
            step_timeout: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every step reached a terminal status.
    Completed,
    /// No step was ready and none was running; the remaining pending
    /// steps can never execute (cycle or dangling dependency).
    Stalled,
}

/// Outcome of one scheduling run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    /// Step id to result, for completed steps only.
    pub results: HashMap<String, Value>,
    /// The final step collection, for full status and error detail.
    pub steps: Vec<TaskStep>,
    pub stats: GraphStats,
}

impl RunReport {
    pub fn step(&self, id: &str) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// True when every step completed and nothing stalled.
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed && self.stats.failed == 0
    }
}

/// Drives the wave scheduling loop over a step collection.
///
/// Each round, every ready step is dispatched to its executor
/// concurrently and the whole wave is awaited before statuses change
/// and the next ready set is computed. The barrier keeps the graph a
/// single-writer resource: executors only ever see owned copies of
/// their step and of prior results.
pub struct Coordinator {
    registry: ExecutorRegistry,
    notifier: Arc<dyn Notifier>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry,
            notifier: Arc::new(NoopNotifier),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute the collection to a terminal state.
    ///
    /// Returns `Err` only for configuration problems found before any
    /// step runs. Executor failures and stalls are reported through
    /// the [`RunReport`].
    pub async fn run(&self, steps: Vec<TaskStep>) -> Result<RunReport, SchedulerError> {
        let mut graph = StepGraph::from_steps(steps)?;

        if self.config.eager_validation {
            graph.validate()?;
            for step in graph.steps() {
                if !self.registry.contains(&step.agent_type) {
                    return Err(SchedulerError::UnknownAgentType {
                        step: step.id.clone(),
                        agent_type: step.agent_type.clone(),
                    });
                }
            }
        }

        let mut wave = 0u32;
        let status = loop {
            let ready_ids: Vec<String> =
                graph.ready_steps().iter().map(|s| s.id.clone()).collect();

            if ready_ids.is_empty() {
                // The wave barrier guarantees nothing is running here,
                // so an unsettled graph cannot make further progress.
                if graph.is_settled() {
                    break RunStatus::Completed;
                }
                let stats = graph.stats();
                warn!(
                    pending = stats.pending,
                    "no step ready and none running; run is stalled"
                );
                break RunStatus::Stalled;
            }

            wave += 1;
            info!(wave, steps = ready_ids.len(), "dispatching wave");

            let mut handles = Vec::with_capacity(ready_ids.len());
            for id in &ready_ids {
                let dep_results = graph.dependency_results(id);
                let Some(step) = graph.get_mut(id) else {
                    continue;
                };
                step.start();
                let step = step.clone();

                debug!(step = %step.id, agent_type = %step.agent_type, "step started");
                self.notify(StepEvent::Started {
                    id: step.id.clone(),
                    name: step.name.clone(),
                })
                .await;

                let executor = self.registry.get(&step.agent_type);
                let timeout = self.config.step_timeout;
                let handle = tokio::spawn(async move {
                    let Some(executor) = executor else {
                        return Err(anyhow!(
                            "no executor registered for agent type '{}'",
                            step.agent_type
                        ));
                    };
                    match timeout {
                        Some(limit) => {
                            match tokio::time::timeout(limit, executor.execute(&step, &dep_results))
                                .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Err(anyhow!(
                                    "executor timed out after {}ms",
                                    limit.as_millis()
                                )),
                            }
                        }
                        None => executor.execute(&step, &dep_results).await,
                    }
                });
                handles.push((id.clone(), handle));
            }

            // wave barrier: every dispatched step settles before any
            // status is applied or the next ready set is computed
            let settled =
                join_all(handles.into_iter().map(|(id, h)| async move { (id, h.await) })).await;

            for (id, joined) in settled {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(err) => Err(anyhow!("executor panicked: {err}")),
                };
                match outcome {
                    Ok(value) => self.apply_completion(&mut graph, &id, value).await,
                    Err(err) => self.apply_failure(&mut graph, &id, err.to_string()).await,
                }
            }
        };

        let stats = graph.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            total = stats.total,
            ?status,
            "run finished"
        );

        let results = graph
            .steps()
            .filter_map(|s| s.result.clone().map(|r| (s.id.clone(), r)))
            .collect();

        Ok(RunReport {
            status,
            results,
            steps: graph.into_steps(),
            stats,
        })
    }

    async fn apply_completion(&self, graph: &mut StepGraph, id: &str, value: Value) {
        let Some(step) = graph.get_mut(id) else {
            return;
        };
        step.complete(value.clone());
        let name = step.name.clone();

        info!(step = %id, "step completed");
        self.notify(StepEvent::Completed {
            id: id.to_string(),
            name,
            result: value,
        })
        .await;
    }

    async fn apply_failure(&self, graph: &mut StepGraph, id: &str, reason: String) {
        let Some(step) = graph.get_mut(id) else {
            return;
        };
        step.fail(reason.clone());
        let name = step.name.clone();

        warn!(step = %id, error = %reason, "step failed");
        self.notify(StepEvent::Failed {
            id: id.to_string(),
            name,
            error: reason,
        })
        .await;

        // collapse the dependent chain before the next ready set
        for failed_id in graph.fail_dependents(id) {
            let Some(step) = graph.get(&failed_id) else {
                continue;
            };
            let error = step.error().unwrap_or_default().to_string();
            warn!(step = %failed_id, error = %error, "step failed due to upstream failure");
            self.notify(StepEvent::Failed {
                id: failed_id.clone(),
                name: step.name.clone(),
                error,
            })
            .await;
        }
    }

    async fn notify(&self, event: StepEvent) {
        if let Err(err) = self.notifier.notify(event).await {
            warn!(error = %err, "notifier failed; continuing");
        }
    }
}

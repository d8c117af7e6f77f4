use super::dag::PipelineDag;
use super::task_executor::{TaskExecutor, TaskResult};
use crate::events::{Event, EventLog, EventType};
use crate::types::{
    PipelineSpec, Run, RunId, RunStatus, TaskExecution, TaskId, TaskSpec, TaskStatus,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;

/// How many tasks may run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutorMode {
    /// One task at a time, in topological order
    Serial,
    /// Every ready task at once, up to `max_parallelism` (0 = unlimited)
    Parallel { max_parallelism: usize },
}

impl ExecutorMode {
    fn limit(&self) -> usize {
        match self {
            ExecutorMode::Serial => 1,
            ExecutorMode::Parallel { max_parallelism: 0 } => usize::MAX,
            ExecutorMode::Parallel { max_parallelism } => *max_parallelism,
        }
    }
}

impl Default for ExecutorMode {
    fn default() -> Self {
        ExecutorMode::Parallel { max_parallelism: 0 }
    }
}

/// What happened to the DAG as a whole
struct DagOutcome {
    executions: HashMap<TaskId, TaskExecution>,
    failed: Vec<TaskId>,
    cancelled: bool,
}

/// Pipeline executor that coordinates DAG execution
pub struct PipelineExecutor {
    event_log: Arc<dyn EventLog>,
    task_executor: Arc<TaskExecutor>,
    mode: ExecutorMode,
    // Track active runs for cancellation
    active_runs: Arc<RwLock<HashMap<RunId, watch::Sender<bool>>>>,
}

impl PipelineExecutor {
    pub fn new(event_log: Arc<dyn EventLog>, mode: ExecutorMode) -> Self {
        let task_executor = Arc::new(TaskExecutor::new(event_log.clone()));

        Self {
            event_log,
            task_executor,
            mode,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn mode(&self) -> ExecutorMode {
        self.mode
    }

    /// Execute a pipeline under a fresh run id
    pub async fn execute(&self, pipeline: PipelineSpec) -> Result<Run> {
        self.execute_run(RunId::new(), pipeline).await
    }

    /// Register a run id so [`cancel`](Self::cancel) accepts it before
    /// [`execute_run`](Self::execute_run) has started. A cancel that lands in
    /// between is honoured: the run starts no tasks.
    pub async fn prepare_run(&self, run_id: RunId) -> watch::Receiver<bool> {
        self.active_runs
            .write()
            .await
            .entry(run_id)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Execute a pipeline under a caller-chosen run id, so the caller can
    /// [`cancel`](Self::cancel) it while it runs.
    ///
    /// Task failures don't make this return `Err`; they show up in the
    /// returned run's status. Invalid graphs and event log errors do.
    pub async fn execute_run(&self, run_id: RunId, pipeline: PipelineSpec) -> Result<Run> {
        let cancel_rx = self.prepare_run(run_id).await;
        let started_at = Utc::now();

        tracing::info!(
            "Starting pipeline execution: run_id={}, tasks={}, mode={:?}",
            run_id,
            pipeline.tasks.len(),
            self.mode
        );

        let result = self.run_to_end(run_id, &pipeline, cancel_rx).await;

        // Clean up active runs before propagating anything
        self.active_runs.write().await.remove(&run_id);
        let outcome = result?;

        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        let status = if outcome.cancelled {
            RunStatus::Cancelled
        } else if !outcome.failed.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        match status {
            RunStatus::Completed => {
                self.event_log
                    .append(Event::new(run_id, EventType::RunCompleted { duration_ms }))
                    .await?;
                tracing::info!(
                    "Pipeline execution completed: run_id={}, duration_ms={}",
                    run_id,
                    duration_ms
                );
            }
            RunStatus::Failed => {
                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::RunFailed {
                            failed_tasks: outcome.failed.clone(),
                            duration_ms,
                        },
                    ))
                    .await?;
                tracing::error!(
                    "Pipeline execution failed: run_id={}, failed_tasks={:?}",
                    run_id,
                    outcome.failed
                );
            }
            _ => {
                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::RunCancelled {
                            reason: "User requested cancellation".to_string(),
                        },
                    ))
                    .await?;
                tracing::warn!("Pipeline execution cancelled: run_id={}", run_id);
            }
        }

        self.event_log.flush(&run_id).await?;

        let mut executions = outcome.executions;
        let tasks = pipeline
            .tasks
            .iter()
            .filter_map(|t| executions.remove(&t.id))
            .collect();

        Ok(Run {
            id: run_id,
            status,
            started_at,
            completed_at: Some(completed_at),
            tasks,
        })
    }

    async fn run_to_end(
        &self,
        run_id: RunId,
        pipeline: &PipelineSpec,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<DagOutcome> {
        let dag = PipelineDag::from_pipeline(pipeline).context("Failed to build DAG")?;

        self.event_log
            .append(Event::new(
                run_id,
                EventType::RunStarted {
                    task_count: pipeline.tasks.len(),
                    pipeline_spec: pipeline.clone(),
                },
            ))
            .await?;

        self.execute_dag(run_id, &dag, pipeline, cancel_rx).await
    }

    /// Execute the DAG
    async fn execute_dag(
        &self,
        run_id: RunId,
        dag: &PipelineDag,
        pipeline: &PipelineSpec,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<DagOutcome> {
        let mut executions: HashMap<TaskId, TaskExecution> = HashMap::new();
        let mut completed: HashSet<TaskId> = HashSet::new();
        // failed or skipped; their dependents can never run
        let mut blocked: HashSet<TaskId> = HashSet::new();
        let mut failed: Vec<TaskId> = Vec::new();
        let mut cancelled = false;

        // Emit TaskScheduled events for all tasks
        for task in &pipeline.tasks {
            self.event_log
                .append(Event::new(
                    run_id,
                    EventType::TaskScheduled {
                        task_id: task.id.clone(),
                        action: task.action.clone(),
                    },
                ))
                .await?;

            executions.insert(task.id.clone(), TaskExecution::pending(task.id.clone()));
        }

        // Topological order makes one pass enough to cascade skips
        let mut pending: Vec<TaskSpec> = dag.topological_order();
        let mut running: JoinSet<(TaskId, Result<TaskResult>)> = JoinSet::new();
        let limit = self.mode.limit();

        loop {
            if !cancelled && *cancel_rx.borrow() {
                tracing::warn!("Cancellation requested: run_id={}", run_id);
                cancelled = true;
            }

            if !cancelled {
                let mut i = 0;
                while i < pending.len() {
                    let deps = dag.dependencies(&pending[i].id)?;

                    if let Some(dep) = deps.iter().find(|d| blocked.contains(*d)) {
                        let task = pending.remove(i);
                        let reason = format!("Dependency {} did not complete", dep);
                        self.skip(run_id, &task.id, reason, &mut executions).await?;
                        blocked.insert(task.id);
                        continue;
                    }

                    if running.len() < limit && deps.iter().all(|d| completed.contains(d)) {
                        let task = pending.remove(i);
                        let upstream: Vec<TaskSpec> =
                            deps.iter().filter_map(|d| dag.task(d).cloned()).collect();

                        if let Some(exec) = executions.get_mut(&task.id) {
                            exec.status = TaskStatus::Running;
                            exec.started_at = Some(Utc::now());
                        }

                        let task_executor = self.task_executor.clone();
                        running.spawn(async move {
                            let result = task_executor.execute(run_id, &task, &upstream).await;
                            (task.id, result)
                        });
                        continue;
                    }

                    i += 1;
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    let Some(joined) = joined else { continue };
                    let (task_id, result) = joined.context("Task join failed")?;
                    let result = result?;

                    if let Some(exec) = executions.get_mut(&task_id) {
                        exec.status = result.status;
                        exec.completed_at = Some(Utc::now());
                        exec.error = result.error.clone();
                    }

                    match result.status {
                        TaskStatus::Completed => {
                            completed.insert(task_id);
                        }
                        _ => {
                            failed.push(task_id.clone());
                            blocked.insert(task_id);
                        }
                    }
                }
                _ = cancel_rx.changed(), if !cancelled => {}
            }
        }

        if cancelled {
            for task in pending.drain(..) {
                self.skip(run_id, &task.id, "Run cancelled".to_string(), &mut executions)
                    .await?;
            }
        } else if !pending.is_empty() {
            // Only reachable if the graph changed underneath us
            return Err(anyhow!("{} tasks could not be scheduled", pending.len()));
        }

        failed.sort();
        Ok(DagOutcome {
            executions,
            failed,
            cancelled,
        })
    }

    async fn skip(
        &self,
        run_id: RunId,
        task_id: &TaskId,
        reason: String,
        executions: &mut HashMap<TaskId, TaskExecution>,
    ) -> Result<()> {
        tracing::warn!("Skipping task {}: {}", task_id, reason);

        self.event_log
            .append(Event::new(
                run_id,
                EventType::TaskSkipped {
                    task_id: task_id.clone(),
                    reason,
                },
            ))
            .await?;

        if let Some(exec) = executions.get_mut(task_id) {
            exec.status = TaskStatus::Skipped;
        }

        Ok(())
    }

    /// Cancel a running or prepared pipeline. Tasks already running finish;
    /// nothing new starts. The run itself records the `RunCancelled` event.
    pub async fn cancel(&self, run_id: RunId) -> Result<()> {
        let active_runs = self.active_runs.read().await;
        let cancel_tx = active_runs
            .get(&run_id)
            .ok_or_else(|| anyhow!("Run {} is not active", run_id))?;

        cancel_tx.send_replace(true);
        tracing::warn!("Cancellation signal sent for run {}", run_id);
        Ok(())
    }
}

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An event in a run's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events emitted while a pipeline runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Run lifecycle events
    RunStarted {
        task_count: usize,
        pipeline_spec: PipelineSpec,
    },
    RunCompleted {
        duration_ms: u64,
    },
    RunFailed {
        failed_tasks: Vec<TaskId>,
        duration_ms: u64,
    },
    RunCancelled {
        reason: String,
    },

    // Task lifecycle events
    TaskScheduled {
        task_id: TaskId,
        action: TaskAction,
    },
    TaskStarted {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    TaskSkipped {
        task_id: TaskId,
        reason: String,
    },

    // Product events
    ProductWritten {
        task_id: TaskId,
        product: String,
        path: PathBuf,
        digest: ProductDigest,
        bytes: u64,
    },
}

impl EventType {
    /// One-line rendering for log replay
    pub fn summary(&self) -> String {
        match self {
            EventType::RunStarted { task_count, .. } => {
                format!("run started ({} tasks)", task_count)
            }
            EventType::RunCompleted { duration_ms } => {
                format!("run completed in {} ms", duration_ms)
            }
            EventType::RunFailed {
                failed_tasks,
                duration_ms,
            } => {
                let names: Vec<&str> = failed_tasks.iter().map(|t| t.0.as_str()).collect();
                format!("run failed in {} ms: {}", duration_ms, names.join(", "))
            }
            EventType::RunCancelled { reason } => format!("run cancelled: {}", reason),
            EventType::TaskScheduled { task_id, action } => {
                format!("{} scheduled ({})", task_id, action.kind())
            }
            EventType::TaskStarted { task_id } => format!("{} started", task_id),
            EventType::TaskCompleted {
                task_id,
                duration_ms,
            } => format!("{} completed in {} ms", task_id, duration_ms),
            EventType::TaskFailed { task_id, error } => format!("{} failed: {}", task_id, error),
            EventType::TaskSkipped { task_id, reason } => {
                format!("{} skipped: {}", task_id, reason)
            }
            EventType::ProductWritten {
                task_id,
                product,
                path,
                digest,
                bytes,
            } => format!(
                "{} wrote {} -> {} ({} bytes, sha256 {})",
                task_id,
                product,
                path.display(),
                bytes,
                &digest.0[..12.min(digest.0.len())]
            ),
        }
    }
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Persist anything buffered for a run
    async fn flush(&self, run_id: &RunId) -> anyhow::Result<()>;

    /// Get all events for a run
    async fn get_run_events(&self, run_id: RunId) -> anyhow::Result<Vec<Event>>;
}

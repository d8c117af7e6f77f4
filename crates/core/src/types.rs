use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the product every task writes and every downstream task reads.
pub const FILE_PRODUCT: &str = "file";

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a task in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 digest of a product's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductDigest(pub String);

impl ProductDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(data);
        Self(hex::encode(hash))
    }
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Status of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Specification for a pipeline (DAG of tasks)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub tasks: Vec<TaskSpec>,
    pub dependencies: HashMap<TaskId, Vec<TaskId>>,
}

impl PipelineSpec {
    /// Register a task. Returns its id so it can be wired into edges.
    pub fn add_task(&mut self, task: TaskSpec) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    /// Declare that `task` reads the products of `upstream`.
    pub fn set_upstream(&mut self, task: &TaskId, upstream: &TaskId) {
        let deps = self.dependencies.entry(task.clone()).or_default();
        if !deps.contains(upstream) {
            deps.push(upstream.clone());
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

/// Specification for a single task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub name: String,
    pub action: TaskAction,
    pub products: BTreeMap<String, PathBuf>,
}

impl TaskSpec {
    /// Task with a single `file` product; the name doubles as the id.
    pub fn new(name: impl Into<String>, action: TaskAction, file: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let mut products = BTreeMap::new();
        products.insert(FILE_PRODUCT.to_string(), file.into());
        Self {
            id: TaskId::new(name.clone()),
            name,
            action,
            products,
        }
    }

    pub fn file_product(&self) -> Option<&Path> {
        self.products.get(FILE_PRODUCT).map(PathBuf::as_path)
    }
}

/// Action to perform in a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskAction {
    /// Generate a table with `t` plus one column per stream
    MakeMultiData {
        n_streams: usize,
        n_entries: usize,
        seed: Option<u64>,
    },
    /// Generate a single `t`, `f` series
    MakeSingleData { n_entries: usize, seed: Option<u64> },
    /// Select one stream column from the upstream table
    ExtractStream { stream: String },
    /// Reject outliers above the linear fit
    FilterOutliers { max_variance: f64 },
    /// Area under the curve (trapezoidal rule)
    Integrate,
    /// Sum the areas of every upstream branch
    Totalise,
}

impl TaskAction {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::MakeMultiData { .. } => "make_multi_data",
            TaskAction::MakeSingleData { .. } => "make_single_data",
            TaskAction::ExtractStream { .. } => "extract_stream",
            TaskAction::FilterOutliers { .. } => "filter_outliers",
            TaskAction::Integrate => "integrate",
            TaskAction::Totalise => "totalise",
        }
    }
}

/// A pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskExecution>,
}

impl Run {
    pub fn task(&self, id: &TaskId) -> Option<&TaskExecution> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

/// Execution state of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: TaskId,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskExecution {
    pub fn pending(id: TaskId) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

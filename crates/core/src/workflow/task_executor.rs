use crate::events::{Event, EventLog, EventType};
use crate::ops;
use crate::storage::ProductStore;
use crate::table;
use crate::types::{RunId, TaskAction, TaskSpec, TaskStatus, FILE_PRODUCT};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of executing a task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// Runs a single task's action against its upstream products
pub struct TaskExecutor {
    event_log: Arc<dyn EventLog>,
}

impl TaskExecutor {
    pub fn new(event_log: Arc<dyn EventLog>) -> Self {
        Self { event_log }
    }

    /// Execute a task. `upstream` are the tasks it depends on; their `file`
    /// products are its inputs, ordered by task id.
    ///
    /// A failing action is reported as a `Failed` result; only event log
    /// errors are returned as `Err`.
    pub async fn execute(
        &self,
        run_id: RunId,
        task: &TaskSpec,
        upstream: &[TaskSpec],
    ) -> Result<TaskResult> {
        tracing::info!("Executing task {} for run {}", task.id, run_id);

        self.event_log
            .append(Event::new(
                run_id,
                EventType::TaskStarted {
                    task_id: task.id.clone(),
                },
            ))
            .await?;

        let start = std::time::Instant::now();
        let result = self.execute_action(task, upstream).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                for (product, path) in &task.products {
                    let record = ProductStore::record(path).await?;
                    self.event_log
                        .append(Event::new(
                            run_id,
                            EventType::ProductWritten {
                                task_id: task.id.clone(),
                                product: product.clone(),
                                path: path.clone(),
                                digest: record.digest,
                                bytes: record.bytes,
                            },
                        ))
                        .await?;
                }

                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::TaskCompleted {
                            task_id: task.id.clone(),
                            duration_ms,
                        },
                    ))
                    .await?;

                Ok(TaskResult {
                    status: TaskStatus::Completed,
                    error: None,
                })
            }
            Err(e) => {
                let error_msg = format!("{:#}", e);
                tracing::error!("Task {} failed: {}", task.id, error_msg);

                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::TaskFailed {
                            task_id: task.id.clone(),
                            error: error_msg.clone(),
                        },
                    ))
                    .await?;

                Ok(TaskResult {
                    status: TaskStatus::Failed,
                    error: Some(error_msg),
                })
            }
        }
    }

    async fn execute_action(&self, task: &TaskSpec, upstream: &[TaskSpec]) -> Result<()> {
        let output = task
            .file_product()
            .ok_or_else(|| anyhow!("Task {} has no '{}' product", task.id, FILE_PRODUCT))?
            .to_path_buf();

        let mut sorted: Vec<&TaskSpec> = upstream.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let inputs = sorted
            .into_iter()
            .map(|t| {
                t.file_product()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| anyhow!("Upstream task {} has no '{}' product", t.id, FILE_PRODUCT))
            })
            .collect::<Result<Vec<PathBuf>>>()?;

        ProductStore::prepare(&output).await?;

        let action = task.action.clone();
        tokio::task::spawn_blocking(move || run_action(&action, &inputs, &output))
            .await
            .context("Task panicked")?
            .with_context(|| format!("{} action failed", task.action.kind()))
    }
}

fn single_input<'a>(action: &TaskAction, inputs: &'a [PathBuf]) -> Result<&'a Path> {
    match inputs {
        [input] => Ok(input.as_path()),
        _ => Err(anyhow!(
            "{} expects exactly one upstream product, got {}",
            action.kind(),
            inputs.len()
        )),
    }
}

/// The blocking body of every action: read inputs, compute, write the product
fn run_action(action: &TaskAction, inputs: &[PathBuf], output: &Path) -> Result<()> {
    match action {
        TaskAction::MakeMultiData {
            n_streams,
            n_entries,
            seed,
        } => {
            let mut rng = ops::seeded_rng(*seed);
            let data = ops::make_multi_data(&mut rng, *n_streams, *n_entries);
            table::write_multi_stream(output, &data)?;
        }
        TaskAction::MakeSingleData { n_entries, seed } => {
            let mut rng = ops::seeded_rng(*seed);
            let series = ops::make_single_data(&mut rng, *n_entries);
            table::write_series(output, &series)?;
        }
        TaskAction::ExtractStream { stream } => {
            let input = single_input(action, inputs)?;
            let data = table::read_multi_stream(input)?;
            let series = data.extract(stream)?;
            table::write_series(output, &series)?;
        }
        TaskAction::FilterOutliers { max_variance } => {
            let input = single_input(action, inputs)?;
            let series = table::read_series(input)?;
            let outcome = ops::filter_outliers(&series, *max_variance)?;
            tracing::info!(
                "Rejected {} of {} rows from {}",
                outcome.rejected,
                series.len(),
                input.display()
            );
            table::write_series(output, &outcome.filtered)?;
        }
        TaskAction::Integrate => {
            let input = single_input(action, inputs)?;
            let series = table::read_series(input)?;
            let area = ops::trapezoid(&series.t, &series.f)?;
            table::write_area(output, area)?;
        }
        TaskAction::Totalise => {
            let areas = inputs
                .iter()
                .map(|path| {
                    table::read_area(path).with_context(|| format!("reading {}", path.display()))
                })
                .collect::<Result<Vec<f64>>>()?;
            let total = ops::totalise(&areas);
            tracing::info!("Total area over {} branches: {:.3}", areas.len(), total);
            table::write_total(output, &ops::format_total(total))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEventLog;
    use crate::table::Series;
    use tempfile::TempDir;

    fn task(name: &str, action: TaskAction, file: PathBuf) -> TaskSpec {
        TaskSpec::new(name, action, file)
    }

    #[tokio::test]
    async fn test_integrate_task_writes_area_and_events() {
        let temp_dir = TempDir::new().unwrap();
        let log = Arc::new(MemoryEventLog::new());
        let executor = TaskExecutor::new(log.clone());
        let run_id = RunId::new();

        let cleaned = temp_dir.path().join("stream-000_cleaned.csv");
        table::write_series(
            &cleaned,
            &Series::new(vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 1.0]).unwrap(),
        )
        .unwrap();

        let upstream = task("stream-000_filter-data", TaskAction::Integrate, cleaned);
        let area = task(
            "stream-000_area",
            TaskAction::Integrate,
            temp_dir.path().join("out").join("stream-000_area.csv"),
        );

        let result = executor.execute(run_id, &area, &[upstream]).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(
            table::read_area(area.file_product().unwrap()).unwrap(),
            2.0
        );

        let events = log.get_run_events(run_id).await.unwrap();
        assert!(matches!(events[0].event_type, EventType::TaskStarted { .. }));
        assert!(matches!(
            events[1].event_type,
            EventType::ProductWritten { bytes, .. } if bytes > 0
        ));
        assert!(matches!(events[2].event_type, EventType::TaskCompleted { .. }));
    }

    #[tokio::test]
    async fn test_missing_stream_fails_task() {
        let temp_dir = TempDir::new().unwrap();
        let executor = TaskExecutor::new(Arc::new(MemoryEventLog::new()));

        let make = task(
            "make-data",
            TaskAction::MakeMultiData {
                n_streams: 1,
                n_entries: 10,
                seed: Some(5),
            },
            temp_dir.path().join("input_data.csv"),
        );
        let result = executor.execute(RunId::new(), &make, &[]).await.unwrap();
        assert_eq!(result.status, TaskStatus::Completed);

        let extract = task(
            "stream-007_extract_data",
            TaskAction::ExtractStream {
                stream: "stream-007".to_string(),
            },
            temp_dir.path().join("stream-007.csv"),
        );
        let result = executor
            .execute(RunId::new(), &extract, &[make])
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("stream-007"));
    }

    #[tokio::test]
    async fn test_single_input_actions_reject_fan_in() {
        let temp_dir = TempDir::new().unwrap();
        let executor = TaskExecutor::new(Arc::new(MemoryEventLog::new()));

        let a = task("a", TaskAction::Integrate, temp_dir.path().join("a.csv"));
        let b = task("b", TaskAction::Integrate, temp_dir.path().join("b.csv"));
        let c = task("c", TaskAction::Integrate, temp_dir.path().join("c.csv"));

        let result = executor.execute(RunId::new(), &c, &[a, b]).await.unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("exactly one upstream product"));
    }

    #[tokio::test]
    async fn test_totaliser_sums_every_branch() {
        let temp_dir = TempDir::new().unwrap();
        let executor = TaskExecutor::new(Arc::new(MemoryEventLog::new()));

        let mut upstream = Vec::new();
        for (name, area) in [("stream-001_area", 2.5), ("stream-000_area", 1.25)] {
            let path = temp_dir.path().join(format!("{}.csv", name));
            table::write_area(&path, area).unwrap();
            upstream.push(task(name, TaskAction::Integrate, path));
        }

        let total_path = temp_dir.path().join("total.txt");
        let totaliser = task("totaliser", TaskAction::Totalise, total_path.clone());

        let result = executor
            .execute(RunId::new(), &totaliser, &upstream)
            .await
            .unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(std::fs::read_to_string(total_path).unwrap(), "3.750");
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fanflow_core::events::EventLog;
use fanflow_core::storage::{JsonlEventLog, ProductStore};
use fanflow_core::workflow::{serial_pipeline, ParallelPipelineBuilder, PipelineDag, PipelineExecutor};
use fanflow_core::{PipelineSpec, Run, RunId, RunStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;

use config::{FanflowConfig, Layout, ModeName};

#[derive(Parser, Debug)]
#[command(name = "fanflow")]
#[command(about = "Parameterized fan-out/fan-in data pipeline", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "fanflow.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and run the pipeline
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Don't write the DAG diagram before running
        #[arg(long)]
        no_plot: bool,
    },
    /// Write the DAG diagram (mermaid HTML) without running anything
    Plot {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Print the recorded events of a run
    Events {
        /// Run id printed by `fanflow run`
        run_id: String,

        /// Directory holding the products (and runs/ logs)
        #[arg(long)]
        products_dir: Option<PathBuf>,
    },
}

/// Overrides for the `[pipeline]` and `[executor]` config sections
#[derive(clap::Args, Debug, Default)]
struct PipelineArgs {
    /// Graph layout
    #[arg(long, value_enum)]
    layout: Option<Layout>,

    /// Single-branch pipeline, same as `--layout serial`
    #[arg(long, conflicts_with = "layout")]
    serial: bool,

    /// Number of parallel streams
    #[arg(long)]
    streams: Option<usize>,

    /// Samples per stream
    #[arg(long)]
    entries: Option<usize>,

    /// Outlier threshold in residual standard deviations
    #[arg(long)]
    max_variance: Option<f64>,

    /// RNG seed for reproducible data
    #[arg(long, env = "FANFLOW_SEED")]
    seed: Option<u64>,

    /// Where products are written
    #[arg(long)]
    products_dir: Option<PathBuf>,

    /// Where the DAG diagram is written
    #[arg(long)]
    plot_file: Option<PathBuf>,

    /// Executor mode
    #[arg(long, value_enum)]
    executor: Option<ModeName>,

    /// Maximum concurrently running tasks (0 = unlimited)
    #[arg(long)]
    max_parallelism: Option<usize>,
}

impl PipelineArgs {
    fn apply(self, config: &mut FanflowConfig) {
        let pipeline = &mut config.pipeline;
        if let Some(layout) = self.layout {
            pipeline.layout = layout;
        }
        if self.serial {
            pipeline.layout = Layout::Serial;
        }
        if let Some(n) = self.streams {
            pipeline.n_streams = n;
        }
        if let Some(n) = self.entries {
            pipeline.n_entries = n;
        }
        if let Some(v) = self.max_variance {
            pipeline.max_variance = v;
        }
        if self.seed.is_some() {
            pipeline.seed = self.seed;
        }
        if let Some(dir) = self.products_dir {
            pipeline.products_dir = dir;
        }
        if let Some(file) = self.plot_file {
            pipeline.plot_file = file;
        }
        if let Some(mode) = self.executor {
            config.executor.mode = mode;
        }
        if let Some(n) = self.max_parallelism {
            config.executor.max_parallelism = n;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fanflow=info,fanflow_core=info".into());
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    let mut config = FanflowConfig::load(&args.config)?;

    match args.command {
        Command::Run { pipeline, no_plot } => {
            pipeline.apply(&mut config);
            config.validate()?;
            run(&config, no_plot).await
        }
        Command::Plot { pipeline } => {
            pipeline.apply(&mut config);
            config.validate()?;
            let store = ProductStore::new(&config.pipeline.products_dir);
            let spec = build_pipeline(&config, &store)?;
            write_plot(&spec, &config.pipeline.plot_file)
        }
        Command::Events {
            run_id,
            products_dir,
        } => {
            if let Some(dir) = products_dir {
                config.pipeline.products_dir = dir;
            }
            print_events(&config, &run_id).await
        }
    }
}

fn build_pipeline(config: &FanflowConfig, store: &ProductStore) -> Result<PipelineSpec> {
    let pipeline = &config.pipeline;
    match pipeline.layout {
        Layout::Parallel => ParallelPipelineBuilder::new(store.clone())
            .n_streams(pipeline.n_streams)
            .n_entries(pipeline.n_entries)
            .max_variance(pipeline.max_variance)
            .seed(pipeline.seed)
            .build(),
        Layout::Serial => Ok(serial_pipeline(
            store,
            pipeline.n_entries,
            pipeline.max_variance,
            pipeline.seed,
        )),
    }
}

fn write_plot(spec: &PipelineSpec, path: &Path) -> Result<()> {
    let dag = PipelineDag::from_pipeline(spec)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create plot directory")?;
        }
    }
    std::fs::write(path, dag.to_mermaid_html())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote DAG diagram to {}", path.display());
    Ok(())
}

async fn run(config: &FanflowConfig, no_plot: bool) -> Result<()> {
    let store = ProductStore::new(&config.pipeline.products_dir);
    store.init()?;

    let spec = build_pipeline(config, &store)?;
    if !no_plot {
        write_plot(&spec, &config.pipeline.plot_file)?;
    }

    let event_log = Arc::new(
        JsonlEventLog::new(store.runs_dir()).context("Failed to create event log")?,
    );
    let executor = PipelineExecutor::new(event_log, config.executor.executor_mode());

    let run_id = RunId::new();
    tracing::info!("Run id: {}", run_id);

    // Registered up front so an early Ctrl-C still reaches the run
    executor.prepare_run(run_id).await;
    let execution = executor.execute_run(run_id, spec);
    tokio::pin!(execution);

    let run = tokio::select! {
        result = &mut execution => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling run {}", run_id);
            if let Err(e) = executor.cancel(run_id).await {
                tracing::warn!("Could not cancel run: {}", e);
            }
            execution.await?
        }
    };

    report(&run, &store);

    match run.status {
        RunStatus::Completed => Ok(()),
        status => bail!("Run {} finished with status {:?}", run.id, status),
    }
}

fn report(run: &Run, store: &ProductStore) {
    println!("run {} ({:?})", run.id, run.status);
    for task in &run.tasks {
        match &task.error {
            Some(error) => println!("  {:<28} {:?}: {}", task.id.0, task.status, error),
            None => println!("  {:<28} {:?}", task.id.0, task.status),
        }
    }

    if run.status == RunStatus::Completed {
        match std::fs::read_to_string(store.total()) {
            Ok(total) => println!("total: {}", total.trim()),
            Err(e) => tracing::warn!("Could not read {}: {}", store.total().display(), e),
        }
    }
}

async fn print_events(config: &FanflowConfig, run_id: &str) -> Result<()> {
    let run_id: RunId = run_id
        .parse()
        .with_context(|| format!("Invalid run id: {}", run_id))?;

    let event_log = JsonlEventLog::new(config.runs_dir())?;
    let events = event_log.get_run_events(run_id).await?;
    if events.is_empty() {
        bail!(
            "No events recorded for run {} under {}",
            run_id,
            config.runs_dir().display()
        );
    }

    for event in events {
        println!(
            "{}  {}",
            event.timestamp.format("%H:%M:%S%.3f"),
            event.event_type.summary()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanflow_core::workflow::ExecutorMode;
    use tempfile::TempDir;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "fanflow",
            "run",
            "--streams",
            "5",
            "--seed",
            "9",
            "--executor",
            "serial",
            "--no-plot",
        ]);

        let mut config = FanflowConfig::default();
        match args.command {
            Command::Run { pipeline, no_plot } => {
                assert!(no_plot);
                pipeline.apply(&mut config);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert_eq!(config.pipeline.n_streams, 5);
        assert_eq!(config.pipeline.seed, Some(9));
        assert_eq!(config.executor.mode, ModeName::Serial);
        // untouched values keep their defaults
        assert_eq!(config.pipeline.n_entries, 100);
    }

    #[test]
    fn test_serial_flag_selects_serial_layout() {
        let args = Args::parse_from(["fanflow", "run", "--serial"]);
        let mut config = FanflowConfig::default();
        match args.command {
            Command::Run { pipeline, .. } => pipeline.apply(&mut config),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(config.pipeline.layout, Layout::Serial);

        assert!(Args::try_parse_from(["fanflow", "run", "--serial", "--layout", "parallel"]).is_err());
    }

    #[tokio::test]
    async fn test_cancel_before_execution_is_honoured() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProductStore::new(temp_dir.path());
        let spec = build_pipeline(&FanflowConfig::default(), &store).unwrap();

        let event_log = Arc::new(JsonlEventLog::new(store.runs_dir()).unwrap());
        let executor = PipelineExecutor::new(event_log, ExecutorMode::default());
        let run_id = RunId::new();

        executor.prepare_run(run_id).await;
        executor.cancel(run_id).await.unwrap();
        let run = executor.execute_run(run_id, spec).await.unwrap();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(!store.total().exists());
    }

    #[test]
    fn test_build_pipeline_layouts() {
        let store = ProductStore::new("out");

        let mut config = FanflowConfig::default();
        config.pipeline.n_streams = 2;
        assert_eq!(build_pipeline(&config, &store).unwrap().tasks.len(), 8);

        config.pipeline.layout = Layout::Serial;
        assert_eq!(build_pipeline(&config, &store).unwrap().tasks.len(), 4);
    }

    #[test]
    fn test_write_plot() {
        let temp_dir = TempDir::new().unwrap();
        let store = ProductStore::new(temp_dir.path());
        let spec = build_pipeline(&FanflowConfig::default(), &store).unwrap();

        let path = temp_dir.path().join("plots").join("dag.html");
        write_plot(&spec, &path).unwrap();

        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("graph LR"));
        assert!(html.contains("stream-002_area"));
    }
}

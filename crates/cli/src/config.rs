use anyhow::{bail, Context, Result};
use fanflow_core::ops::DEFAULT_MAX_VARIANCE;
use fanflow_core::workflow::ExecutorMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanflowConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Shape of the task graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// make-data -> N branches -> totaliser
    Parallel,
    /// One branch, single-stream generator
    Serial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_layout")]
    pub layout: Layout,

    #[serde(default = "default_n_streams")]
    pub n_streams: usize,

    #[serde(default = "default_n_entries")]
    pub n_entries: usize,

    #[serde(default = "default_max_variance")]
    pub max_variance: f64,

    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_products_dir")]
    pub products_dir: PathBuf,

    #[serde(default = "default_plot_file")]
    pub plot_file: PathBuf,
}

fn default_layout() -> Layout {
    Layout::Parallel
}

fn default_n_streams() -> usize {
    3
}

fn default_n_entries() -> usize {
    100
}

fn default_max_variance() -> f64 {
    DEFAULT_MAX_VARIANCE
}

fn default_products_dir() -> PathBuf {
    PathBuf::from("products").join("multi")
}

fn default_plot_file() -> PathBuf {
    PathBuf::from("param_parallel.html")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
            n_streams: default_n_streams(),
            n_entries: default_n_entries(),
            max_variance: default_max_variance(),
            seed: None,
            products_dir: default_products_dir(),
            plot_file: default_plot_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModeName {
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_mode")]
    pub mode: ModeName,

    /// 0 = unlimited
    #[serde(default)]
    pub max_parallelism: usize,
}

fn default_mode() -> ModeName {
    ModeName::Parallel
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_parallelism: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn executor_mode(&self) -> ExecutorMode {
        match self.mode {
            ModeName::Serial => ExecutorMode::Serial,
            ModeName::Parallel => ExecutorMode::Parallel {
                max_parallelism: self.max_parallelism,
            },
        }
    }
}

impl FanflowConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!(
                "Configuration file {} not found, using defaults",
                config_path.display()
            );
            Self::default()
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.layout == Layout::Parallel && pipeline.n_streams == 0 {
            bail!("pipeline.n_streams must be at least 1");
        }
        if pipeline.n_entries < 2 {
            bail!(
                "pipeline.n_entries must be at least 2 to fit a line, got {}",
                pipeline.n_entries
            );
        }
        if !(pipeline.max_variance > 0.0) {
            bail!(
                "pipeline.max_variance must be positive, got {}",
                pipeline.max_variance
            );
        }
        Ok(())
    }

    /// Directory the run event logs are written to
    pub fn runs_dir(&self) -> PathBuf {
        self.pipeline.products_dir.join("runs")
    }
}

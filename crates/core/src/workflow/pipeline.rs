use crate::ops::{stream_name, DEFAULT_MAX_VARIANCE};
use crate::storage::ProductStore;
use crate::types::{PipelineSpec, TaskAction, TaskId, TaskSpec};
use anyhow::{anyhow, Result};

/// Id of the generator task
pub const MAKE_DATA: &str = "make-data";
/// Id of the aggregation task
pub const TOTALISER: &str = "totaliser";

/// Builds the fan-out/fan-in pipeline:
///
/// ```text
///     |--> B1 --> C1 --> D1 -->|
///     |--> B2 --> C2 --> D2 -->|
/// A --|     ....               |--> E
///     |--> Bn --> Cn --> Dn -->|
/// ```
///
/// `A` generates the multi-stream table, each branch extracts, filters and
/// integrates one stream, and `E` sums the areas.
pub struct ParallelPipelineBuilder {
    products: ProductStore,
    n_streams: usize,
    n_entries: usize,
    max_variance: f64,
    seed: Option<u64>,
}

impl ParallelPipelineBuilder {
    pub fn new(products: ProductStore) -> Self {
        Self {
            products,
            n_streams: 3,
            n_entries: 100,
            max_variance: DEFAULT_MAX_VARIANCE,
            seed: None,
        }
    }

    pub fn n_streams(mut self, n: usize) -> Self {
        self.n_streams = n;
        self
    }

    pub fn n_entries(mut self, n: usize) -> Self {
        self.n_entries = n;
        self
    }

    pub fn max_variance(mut self, max_variance: f64) -> Self {
        self.max_variance = max_variance;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<PipelineSpec> {
        if self.n_streams == 0 {
            return Err(anyhow!("A parallel pipeline needs at least one stream"));
        }

        let mut spec = PipelineSpec::default();

        let make_data = spec.add_task(TaskSpec::new(
            MAKE_DATA,
            TaskAction::MakeMultiData {
                n_streams: self.n_streams,
                n_entries: self.n_entries,
                seed: self.seed,
            },
            self.products.input_data(),
        ));

        let branch_ends: Vec<TaskId> = (0..self.n_streams)
            .map(|i| {
                processor_branch(
                    &mut spec,
                    &self.products,
                    &stream_name(i),
                    &make_data,
                    self.max_variance,
                )
            })
            .collect();

        let totaliser = spec.add_task(TaskSpec::new(
            TOTALISER,
            TaskAction::Totalise,
            self.products.total(),
        ));
        for end in &branch_ends {
            spec.set_upstream(&totaliser, end);
        }

        tracing::debug!(
            "Built parallel pipeline with {} streams ({} tasks)",
            self.n_streams,
            spec.tasks.len()
        );

        Ok(spec)
    }
}

/// Add one stream's `extract -> filter -> area` branch below `upstream`.
///
/// Returns the branch's last task so it can feed the aggregator.
pub fn processor_branch(
    spec: &mut PipelineSpec,
    products: &ProductStore,
    stream: &str,
    upstream: &TaskId,
    max_variance: f64,
) -> TaskId {
    let extract = spec.add_task(TaskSpec::new(
        format!("{}_extract_data", stream),
        TaskAction::ExtractStream {
            stream: stream.to_string(),
        },
        products.stream(stream),
    ));

    let filter = spec.add_task(TaskSpec::new(
        format!("{}_filter-data", stream),
        TaskAction::FilterOutliers { max_variance },
        products.cleaned(stream),
    ));

    let area = spec.add_task(TaskSpec::new(
        format!("{}_area", stream),
        TaskAction::Integrate,
        products.area(stream),
    ));

    spec.set_upstream(&extract, upstream);
    spec.set_upstream(&filter, &extract);
    spec.set_upstream(&area, &filter);

    area
}

/// Single-branch pipeline: `make-data -> filter-data -> area -> totaliser`
pub fn serial_pipeline(
    products: &ProductStore,
    n_entries: usize,
    max_variance: f64,
    seed: Option<u64>,
) -> PipelineSpec {
    let mut spec = PipelineSpec::default();

    let make_data = spec.add_task(TaskSpec::new(
        MAKE_DATA,
        TaskAction::MakeSingleData { n_entries, seed },
        products.input_data(),
    ));
    let filter = spec.add_task(TaskSpec::new(
        "filter-data",
        TaskAction::FilterOutliers { max_variance },
        products.base_path().join("cleaned.csv"),
    ));
    let area = spec.add_task(TaskSpec::new(
        "area",
        TaskAction::Integrate,
        products.base_path().join("area.csv"),
    ));
    let totaliser = spec.add_task(TaskSpec::new(
        TOTALISER,
        TaskAction::Totalise,
        products.total(),
    ));

    spec.set_upstream(&filter, &make_data);
    spec.set_upstream(&area, &filter);
    spec.set_upstream(&totaliser, &area);

    spec
}

pub mod dag;
pub mod executor;
pub mod pipeline;
pub mod task_executor;

pub use dag::PipelineDag;
pub use executor::{ExecutorMode, PipelineExecutor};
pub use pipeline::{processor_branch, serial_pipeline, ParallelPipelineBuilder, MAKE_DATA, TOTALISER};
pub use task_executor::{TaskExecutor, TaskResult};

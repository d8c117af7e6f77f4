//! Numeric kernels behind the pipeline tasks.
//!
//! These are plain functions over in-memory tables. File IO, events and
//! scheduling live in [`crate::workflow`].

pub mod aggregate;
pub mod filter;
pub mod generate;
pub mod integrate;

pub use aggregate::{format_total, totalise};
pub use filter::{filter_outliers, linregress, FilterOutcome, LinearFit, DEFAULT_MAX_VARIANCE};
pub use generate::{linspace, make_multi_data, make_single_data, make_stream, seeded_rng, stream_name};
pub use integrate::trapezoid;

pub type OpsResult<T> = Result<T, OpsError>;

#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error("linear regression needs at least two points, got {0}")]
    TooFewPoints(usize),

    #[error("cannot fit a line: all t values are identical")]
    DegenerateRegression,

    #[error("t has {t} values but f has {f}")]
    LengthMismatch { t: usize, f: usize },

    #[error(transparent)]
    Table(#[from] crate::table::TableError),
}

//! Statistical reductions of the anomaly series
//!
//! # Organization
//!
//! - [`operations`]: the single-pass series reduction and its result types
//! - [`parallel`]: per-time-step kernels run on the rayon pool

pub mod operations;
pub mod parallel;

pub use operations::{reduce_series, ReducedSeries, Reduction, TimeSeries};
pub use parallel::{parallel_spatial_mean, point_series};

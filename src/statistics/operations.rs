//! Reductions of the anomaly series
//!
//! The series is forced exactly once: every time chunk is evaluated, reduced
//! to its spatial mean and the selected grid point, and then dropped.

use super::parallel::{parallel_spatial_mean, point_series};
use crate::anomaly::AnomalySeries;
use crate::cf::Timestamp;
use crate::config::GridPoint;
use crate::errors::{AnomalyError, Result};
use log::debug;

/// Supported series reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Unweighted mean over (lat, lon), NaN cells skipped
    SpatialMean,
    /// Values at one (lat, lon) grid index
    Point,
}

impl Reduction {
    /// Get the string representation of the reduction
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpatialMean => "spatial mean",
            Self::Point => "grid point",
        }
    }
}

/// One-dimensional time series produced by a reduction
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub times: Vec<Timestamp>,
    pub values: Vec<f32>,
    pub reduction: Reduction,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Finite (min, max) of the values, `None` when every value is NaN
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Both reductions of one forcing pass
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedSeries {
    pub mean: TimeSeries,
    pub point: TimeSeries,
}

/// Compute the spatial mean and the `point` series of `series` in one pass.
///
/// # Errors
///
/// Returns `IndexOutOfBounds` if `point` lies outside the spatial grid, or
/// any error raised while reading a chunk.
pub fn reduce_series(series: &AnomalySeries, point: GridPoint) -> Result<ReducedSeries> {
    if let Some([nlat, nlon]) = series.spatial_shape() {
        if point.lat_index >= nlat || point.lon_index >= nlon {
            return Err(AnomalyError::IndexOutOfBounds(format!(
                "grid point ({}, {}) outside {nlat} x {nlon} grid",
                point.lat_index, point.lon_index
            )));
        }
    }

    let mut mean = Vec::with_capacity(series.len());
    let mut values = Vec::with_capacity(series.len());
    let chunks = series.time_chunks();
    let total = chunks.len();

    for (i, time) in chunks.into_iter().enumerate() {
        debug!("Reducing chunk {}/{total}: steps {time:?}", i + 1);
        let block = series.evaluate(time)?;
        mean.extend(parallel_spatial_mean(block.view()));
        values.extend(point_series(block.view(), point.lat_index, point.lon_index));
    }

    let times = series.times();
    Ok(ReducedSeries {
        mean: TimeSeries {
            times: times.clone(),
            values: mean,
            reduction: Reduction::SpatialMean,
        },
        point: TimeSeries {
            times,
            values,
            reduction: Reduction::Point,
        },
    })
}

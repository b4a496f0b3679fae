//! Per-year subset of the SST grid, ocean-masked and converted to Celsius
//!
//! [`NormalizedSubset::select`] only resolves label windows; nothing is read
//! until [`NormalizedSubset::materialize`] is called for a block of time
//! steps.

use crate::cf::{format_timestamp, label_window, Timestamp};
use crate::config::{BoundingBox, ChunkSpec, PipelineConfig};
use crate::data_source::{GridSource, GridWindow};
use crate::errors::{AnomalyError, Result};
use crate::years::YearRange;
use log::debug;
use ndarray::{Array3, Axis, Zip};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;

/// Land/ice masking and unit conversion applied to every cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Subtracted from the decoded SST (Kelvin to Celsius)
    pub kelvin_offset: f64,
    /// Mask value marking open ocean; every other value becomes NaN
    pub ocean_value: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            kelvin_offset: 273.15,
            ocean_value: 1.0,
        }
    }
}

/// What to select from the grid for each year range
#[derive(Debug, Clone, PartialEq)]
pub struct SubsetOptions {
    pub bbox: BoundingBox,
    pub chunks: ChunkSpec,
    pub sst_variable: String,
    pub mask_variable: String,
    pub normalization: Normalization,
}

impl From<&PipelineConfig> for SubsetOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            bbox: config.bbox,
            chunks: config.chunks,
            sst_variable: config.variables.sst.clone(),
            mask_variable: config.variables.mask.clone(),
            normalization: Normalization {
                kelvin_offset: config.kelvin_offset,
                ocean_value: config.ocean_mask_value,
            },
        }
    }
}

/// Lazy, label-selected window of the grid for one year range
pub struct NormalizedSubset {
    source: Arc<dyn GridSource>,
    range: YearRange,
    window: GridWindow,
    times: Vec<Timestamp>,
    lat: Vec<f64>,
    lon: Vec<f64>,
    options: SubsetOptions,
}

impl NormalizedSubset {
    /// Resolve the time window of `range` and the bounding box to positions.
    ///
    /// Both ends of every window are inclusive. Fails with
    /// `EmptySelection` when any axis matches no labels.
    pub fn select(source: Arc<dyn GridSource>, range: &YearRange, options: &SubsetOptions) -> Result<Self> {
        let coords = source.coordinates();
        let bbox = &options.bbox;

        let time = label_window(&coords.times, range.start, range.end).ok_or_else(|| {
            AnomalyError::EmptySelection(format!(
                "no time steps between {} and {}",
                format_timestamp(&range.start),
                format_timestamp(&range.end)
            ))
        })?;
        let lat = label_window(&coords.lat, bbox.min_lat, bbox.max_lat).ok_or_else(|| {
            AnomalyError::EmptySelection(format!(
                "no latitudes between {} and {}",
                bbox.min_lat, bbox.max_lat
            ))
        })?;
        let lon = label_window(&coords.lon, bbox.min_lon, bbox.max_lon).ok_or_else(|| {
            AnomalyError::EmptySelection(format!(
                "no longitudes between {} and {}",
                bbox.min_lon, bbox.max_lon
            ))
        })?;

        let times = coords.times[time.clone()].to_vec();
        let lat_labels = coords.lat[lat.clone()].to_vec();
        let lon_labels = coords.lon[lon.clone()].to_vec();

        let subset = Self {
            times,
            lat: lat_labels,
            lon: lon_labels,
            window: GridWindow::new(time, lat, lon),
            range: *range,
            options: options.clone(),
            source,
        };
        debug!(
            "Selected {} ({}): window {:?}",
            range.year, range.kind, subset.window
        );
        Ok(subset)
    }

    pub fn range(&self) -> &YearRange {
        &self.range
    }

    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    pub fn chunks(&self) -> ChunkSpec {
        self.options.chunks
    }

    /// (time, lat, lon) shape of the selection
    pub fn shape(&self) -> [usize; 3] {
        self.window.shape()
    }

    /// Local time ranges of the evaluation blocks.
    pub fn time_blocks(&self) -> Vec<Range<usize>> {
        chunk_ranges(self.times.len(), self.options.chunks.time)
    }

    /// Read and normalize the local time steps `time` over the whole
    /// spatial window.
    ///
    /// Each variable is read once per block, so every native chunk behind
    /// the window is fetched and decoded a single time. Masking then runs
    /// over (lat, lon) tiles in parallel.
    pub fn materialize(&self, time: Range<usize>) -> Result<Array3<f32>> {
        let nt = self.times.len();
        if time.end > nt || time.start > time.end {
            return Err(AnomalyError::IndexOutOfBounds(format!(
                "time block {time:?} outside subset of {nt} steps"
            )));
        }

        let window = GridWindow::new(
            offset(&self.window.time, &time),
            self.window.lat.clone(),
            self.window.lon.clone(),
        );
        let (sst, mask) = rayon::join(
            || self.source.read_window(&self.options.sst_variable, &window),
            || self.source.read_window(&self.options.mask_variable, &window),
        );
        let (mut sst, mask) = (sst?, mask?);
        check_same_shape(&sst, &mask)?;

        let ChunkSpec { lat, lon, .. } = self.options.chunks;
        let (lat, lon) = (lat.max(1), lon.max(1));
        let normalization = &self.options.normalization;
        sst.axis_chunks_iter_mut(Axis(1), lat)
            .into_par_iter()
            .zip(mask.axis_chunks_iter(Axis(1), lat))
            .for_each(|(mut band, mask_band)| {
                for (tile, mask_tile) in band
                    .axis_chunks_iter_mut(Axis(2), lon)
                    .zip(mask_band.axis_chunks_iter(Axis(2), lon))
                {
                    Zip::from(tile)
                        .and(mask_tile)
                        .for_each(|value, &flag| *value = normalize_cell(*value, flag, normalization));
                }
            });
        debug!(
            "Materialized {} ({}) steps {time:?}: {:?}",
            self.range.year,
            self.range.kind,
            sst.shape()
        );
        Ok(sst)
    }
}

fn offset(base: &Range<usize>, local: &Range<usize>) -> Range<usize> {
    base.start + local.start..base.start + local.end
}

/// Split `0..len` into consecutive ranges of at most `size` elements.
pub fn chunk_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Mask non-ocean cells to NaN and convert the rest from Kelvin to Celsius.
pub fn normalize(mut sst: Array3<f32>, mask: &Array3<f32>, normalization: &Normalization) -> Result<Array3<f32>> {
    check_same_shape(&sst, mask)?;
    Zip::from(&mut sst)
        .and(mask)
        .par_for_each(|value, &flag| *value = normalize_cell(*value, flag, normalization));
    Ok(sst)
}

fn normalize_cell(value: f32, flag: f32, normalization: &Normalization) -> f32 {
    if f64::from(flag) == normalization.ocean_value {
        #[allow(clippy::cast_possible_truncation)]
        {
            (f64::from(value) - normalization.kelvin_offset) as f32
        }
    } else {
        f32::NAN
    }
}

fn check_same_shape(sst: &Array3<f32>, mask: &Array3<f32>) -> Result<()> {
    if sst.shape() != mask.shape() {
        return Err(AnomalyError::ShapeMismatchError(format!(
            "sst block {:?} vs mask block {:?}",
            sst.shape(),
            mask.shape()
        )));
    }
    Ok(())
}

//! Anomaly blocks and the multi-year anomaly series
//!
//! An [`AnomalyBlock`] pairs one year's subset with its aligned climatology
//! and subtracts them only when evaluated. [`AnomalySeries`] concatenates
//! blocks along time and serves evaluation in fixed-size time chunks that may
//! straddle block boundaries.

use crate::cf::Timestamp;
use crate::climatology::AlignedClimatology;
use crate::config::ChunkSpec;
use crate::errors::{AnomalyError, Result};
use crate::subset::{chunk_ranges, NormalizedSubset};
use crate::years::YearRange;
use log::debug;
use ndarray::{concatenate, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Descriptive attributes attached to every anomaly block and to the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesAttributes {
    pub description: String,
    pub start_date: String,
    pub end_date: String,
    pub units: String,
}

impl Default for SeriesAttributes {
    fn default() -> Self {
        Self {
            description: "Hawaii sea surface temperature anomalies".to_string(),
            start_date: "2002-06-01".to_string(),
            end_date: "2020-01-20".to_string(),
            units: "degC".to_string(),
        }
    }
}

impl SeriesAttributes {
    /// Attribute name/value pairs in output order
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("description", &self.description),
            ("start_date", &self.start_date),
            ("end_date", &self.end_date),
            ("units", &self.units),
        ]
    }
}

/// Lazy difference between one year's subset and its climatology
pub struct AnomalyBlock {
    subset: NormalizedSubset,
    climatology: AlignedClimatology,
    attributes: SeriesAttributes,
}

impl AnomalyBlock {
    /// Pair `subset` with `climatology`; both must cover the same cells and
    /// carry the same time labels.
    pub fn combine(
        subset: NormalizedSubset,
        climatology: AlignedClimatology,
        attributes: SeriesAttributes,
    ) -> Result<Self> {
        if subset.shape() != climatology.shape() {
            return Err(AnomalyError::ShapeMismatchError(format!(
                "{}: subset {:?} vs climatology {:?}",
                subset.range().year,
                subset.shape(),
                climatology.shape()
            )));
        }
        if subset.times() != climatology.times() {
            return Err(AnomalyError::ShapeMismatchError(format!(
                "{}: climatology time labels differ from subset",
                subset.range().year
            )));
        }

        Ok(Self {
            subset,
            climatology,
            attributes,
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.subset.shape()
    }

    pub fn times(&self) -> &[Timestamp] {
        self.subset.times()
    }

    pub fn range(&self) -> &YearRange {
        self.subset.range()
    }

    pub fn attributes(&self) -> &SeriesAttributes {
        &self.attributes
    }

    /// Compute anomalies for local time steps `time`.
    pub fn evaluate(&self, time: Range<usize>) -> Result<Array3<f32>> {
        let climatology = self.climatology.read(time.clone())?;
        let observed = self.subset.materialize(time)?;
        Ok(observed - climatology)
    }
}

/// Time-ordered concatenation of anomaly blocks
pub struct AnomalySeries {
    attributes: SeriesAttributes,
    blocks: Vec<AnomalyBlock>,
    /// Global time offset of each block
    offsets: Vec<usize>,
    len: usize,
    chunks: ChunkSpec,
}

impl AnomalySeries {
    /// Series with no time steps; the identity of [`AnomalySeries::append`].
    pub fn empty(attributes: SeriesAttributes) -> Self {
        Self {
            attributes,
            blocks: Vec::new(),
            offsets: Vec::new(),
            len: 0,
            chunks: ChunkSpec::default(),
        }
    }

    /// Concatenate `block` along time.
    ///
    /// The block must start strictly after the current last time step and
    /// share the spatial shape of the blocks already appended.
    pub fn append(mut self, block: AnomalyBlock) -> Result<Self> {
        let [nt, nlat, nlon] = block.shape();

        if let Some(last_block) = self.blocks.last() {
            let [_, lat, lon] = last_block.shape();
            if (lat, lon) != (nlat, nlon) {
                return Err(AnomalyError::ShapeMismatchError(format!(
                    "{}: spatial shape {nlat} x {nlon} differs from series {lat} x {lon}",
                    block.range().year
                )));
            }

            let (Some(last), Some(first)) = (last_block.times().last(), block.times().first()) else {
                return Err(AnomalyError::EmptySelection(format!(
                    "{}: block has no time steps",
                    block.range().year
                )));
            };
            if first <= last {
                return Err(AnomalyError::ShapeMismatchError(format!(
                    "{}: block starts at {first}, not after series end {last}",
                    block.range().year
                )));
            }
        }

        debug!(
            "Appending {} ({}): {nt} steps at offset {}",
            block.range().year,
            block.range().kind,
            self.len
        );
        self.offsets.push(self.len);
        self.len += nt;
        self.blocks.push(block);
        Ok(self)
    }

    /// Evaluate with time chunks of `chunks.time` steps.
    #[must_use]
    pub fn with_chunks(mut self, chunks: ChunkSpec) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn attributes(&self) -> &SeriesAttributes {
        &self.attributes
    }

    /// Total number of time steps
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn blocks(&self) -> &[AnomalyBlock] {
        &self.blocks
    }

    /// (lat, lon) shape shared by every block
    pub fn spatial_shape(&self) -> Option<[usize; 2]> {
        self.blocks.first().map(|b| {
            let [_, nlat, nlon] = b.shape();
            [nlat, nlon]
        })
    }

    pub fn times(&self) -> Vec<Timestamp> {
        self.blocks
            .iter()
            .flat_map(|b| b.times().iter().copied())
            .collect()
    }

    /// Global time ranges evaluated one at a time during reduction.
    pub fn time_chunks(&self) -> Vec<Range<usize>> {
        chunk_ranges(self.len, self.chunks.time)
    }

    /// Evaluate global time steps `time`, joining pieces of every block it
    /// overlaps.
    pub fn evaluate(&self, time: Range<usize>) -> Result<Array3<f32>> {
        if time.end > self.len || time.start > time.end {
            return Err(AnomalyError::IndexOutOfBounds(format!(
                "time range {time:?} outside series of {} steps",
                self.len
            )));
        }

        let mut pieces = Vec::new();
        for (block, &offset) in self.blocks.iter().zip(&self.offsets) {
            let block_end = offset + block.shape()[0];
            let start = time.start.max(offset);
            let end = time.end.min(block_end);
            if start < end {
                pieces.push(block.evaluate(start - offset..end - offset)?);
            }
        }

        match pieces.len() {
            0 => {
                let [nlat, nlon] = self.spatial_shape().unwrap_or([0, 0]);
                Ok(Array3::zeros((0, nlat, nlon)))
            }
            1 => Ok(pieces.remove(0)),
            _ => {
                let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
                Ok(concatenate(Axis(0), &views)?)
            }
        }
    }
}

//! Data source abstraction for labeled (time, lat, lon) grids
//!
//! The subset stage only needs decoded coordinates and the ability to read a
//! positional window of a named variable. [`GridSource`] captures exactly
//! that, so the Zarr-backed dataset and test fixtures are interchangeable.

use crate::cf::Timestamp;
use crate::errors::Result;
use ndarray::Array3;
use std::ops::Range;

/// Decoded coordinate vectors of a gridded dataset
#[derive(Debug, Clone, PartialEq)]
pub struct GridCoordinates {
    pub times: Vec<Timestamp>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
}

impl GridCoordinates {
    pub fn shape(&self) -> [usize; 3] {
        [self.times.len(), self.lat.len(), self.lon.len()]
    }
}

/// Positional window over (time, lat, lon)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridWindow {
    pub time: Range<usize>,
    pub lat: Range<usize>,
    pub lon: Range<usize>,
}

impl GridWindow {
    pub fn new(time: Range<usize>, lat: Range<usize>, lon: Range<usize>) -> Self {
        Self { time, lat, lon }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.time.len(), self.lat.len(), self.lon.len()]
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty() || self.lat.is_empty() || self.lon.is_empty()
    }
}

/// Read access to a labeled (time, lat, lon) dataset.
///
/// Implementations must be shareable across rayon workers: tile reads for
/// one time block are issued concurrently.
pub trait GridSource: Send + Sync {
    /// Coordinates shared by every data variable
    fn coordinates(&self) -> &GridCoordinates;

    /// Read `window` of `variable`, decoded to physical `f32` values with
    /// missing data as NaN
    fn read_window(&self, variable: &str, window: &GridWindow) -> Result<Array3<f32>>;
}

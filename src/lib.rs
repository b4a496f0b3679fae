//! MUR SST anomaly: regional sea surface temperature anomalies from Zarr
//!
//! Reads the MUR L4 SST dataset (a public, chunked Zarr store), selects a
//! bounding box one calendar year at a time, masks land, converts to
//! Celsius and subtracts a daily climatology. The per-year anomaly blocks are
//! folded into one series that is reduced in a single streaming pass to a
//! regional mean and a single-pixel series, then plotted and saved to NetCDF.
//!
//! ## Key Features
//!
//! - **Lazy evaluation**: per-year stages describe reads; data is only pulled
//!   chunk by chunk while reducing, so the multi-year cube is never resident
//! - **Parallel Processing**: spatial tiles and per-time-step reductions run
//!   on Rayon
//! - **Cloud Storage**: anonymous S3 access through `object_store`, or a
//!   local Zarr directory
//! - **CF conventions**: time units, packed values and fill values are decoded
//!
//! ## Module Organization
//!
//! - [`storage`] / [`zarr_io`]: store access and the lazily read dataset
//! - [`data_source`]: the [`GridSource`] read abstraction
//! - [`years`]: year-range enumeration over the coverage window
//! - [`subset`]: per-year selection, masking and unit conversion
//! - [`climatology`]: climatology loading and alignment
//! - [`anomaly`]: anomaly blocks and the folded series
//! - [`statistics`]: single-pass spatial mean and point reductions
//! - [`plot`] / [`netcdf_io`]: output products
//! - [`pipeline`]: end-to-end orchestration
//! - [`config`], [`parallel`], [`errors`], [`cf`]: shared infrastructure
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mur_sst_anomaly::prelude::*;
//!
//! let config = PipelineConfig::default();
//! let output = run(&config).unwrap();
//! println!("{} time steps", output.reduced.mean.len());
//! ```

// Core modules
pub mod anomaly;
pub mod cf;
pub mod climatology;
pub mod config;
pub mod data_source;
pub mod errors;
pub mod netcdf_io;
pub mod parallel;
pub mod pipeline;
pub mod plot;
pub mod statistics;
pub mod storage;
pub mod subset;
pub mod years;
pub mod zarr_io;

// Direct re-exports for the public API
pub use data_source::{GridCoordinates, GridSource, GridWindow};
pub use errors::{AnomalyError, Result};
pub use pipeline::{run, run_with_source, PipelineOutput};

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::anomaly::{AnomalyBlock, AnomalySeries, SeriesAttributes};
    pub use crate::climatology::{AlignedClimatology, Climatology};
    pub use crate::config::{BoundingBox, ChunkSpec, GridPoint, OutputPaths, PipelineConfig};
    pub use crate::data_source::{GridCoordinates, GridSource, GridWindow};
    pub use crate::errors::{AnomalyError, Result};
    pub use crate::parallel::{get_parallel_info, ParallelConfig};
    pub use crate::pipeline::{run, run_with_source, PipelineOutput};
    pub use crate::statistics::{reduce_series, ReducedSeries, TimeSeries};
    pub use crate::subset::{NormalizedSubset, SubsetOptions};
    pub use crate::years::{year_ranges, year_ranges_between, Coverage, YearKind, YearRange};
    pub use crate::zarr_io::ZarrDataset;
}

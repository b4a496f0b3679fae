//! Pipeline configuration
//!
//! Every default reproduces the fixed parameters of the MUR SST anomaly
//! analysis over Hawaii, so `PipelineConfig::default()` runs the reference
//! workflow. A JSON or YAML file can override any subset of fields.

use crate::anomaly::SeriesAttributes;
use crate::errors::{AnomalyError, Result};
use crate::years::{Coverage, COVERAGE_END, COVERAGE_START};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Geographic bounding box, inclusive on every edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_lat: 18.0,
            max_lat: 25.0,
            min_lon: -160.0,
            max_lon: -150.0,
        }
    }
}

/// Block shape used when evaluating (time, lat, lon) arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub time: usize,
    pub lat: usize,
    pub lon: usize,
}

impl Default for ChunkSpec {
    fn default() -> Self {
        Self {
            time: 30,
            lat: 100,
            lon: 100,
        }
    }
}

impl ChunkSpec {
    fn validate(&self) -> Result<()> {
        if self.time == 0 || self.lat == 0 || self.lon == 0 {
            return Err(AnomalyError::ConfigError(format!(
                "chunk sizes must be positive, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `s3://bucket/prefix` or a local directory holding the Zarr store
    pub url: String,
    pub region: String,
    /// Custom S3-compatible endpoint
    pub endpoint: Option<String>,
    /// Skip request signing (public buckets)
    pub anonymous: bool,
    /// Validate variables against `.zmetadata` before opening arrays
    pub consolidated: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "s3://mur-sst/zarr".to_string(),
            region: "us-west-2".to_string(),
            endpoint: None,
            anonymous: true,
            consolidated: true,
        }
    }
}

/// Variable and coordinate names inside the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableNames {
    pub sst: String,
    pub mask: String,
    pub time: String,
    pub lat: String,
    pub lon: String,
}

impl Default for VariableNames {
    fn default() -> Self {
        Self {
            sst: "analysed_sst".to_string(),
            mask: "mask".to_string(),
            time: "time".to_string(),
            lat: "lat".to_string(),
            lon: "lon".to_string(),
        }
    }
}

/// Positional grid index for the single-location plot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat_index: usize,
    pub lon_index: usize,
}

impl Default for GridPoint {
    fn default() -> Self {
        Self {
            lat_index: 350,
            lon_index: 500,
        }
    }
}

/// Output file locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub mean_plot: PathBuf,
    pub location_plot: PathBuf,
    pub mean_netcdf: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            mean_plot: PathBuf::from("../data/MURSSTAnomalyMeanRegion.png"),
            location_plot: PathBuf::from("../data/MURSSTAnomalyLocation.png"),
            mean_netcdf: PathBuf::from("../data/MURSSTAnomalyMean.nc"),
        }
    }
}

/// Complete configuration of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub variables: VariableNames,
    pub bbox: BoundingBox,
    pub coverage_start: String,
    pub coverage_end: String,
    pub chunks: ChunkSpec,
    /// Subtracted from the decoded SST to convert Kelvin to Celsius
    pub kelvin_offset: f64,
    /// Only cells whose mask equals this value are kept
    pub ocean_mask_value: f64,
    pub climatology_path: PathBuf,
    /// Data variable in the climatology file; first 3-D variable when unset
    pub climatology_variable: Option<String>,
    pub attributes: SeriesAttributes,
    pub point: GridPoint,
    pub outputs: OutputPaths,
    pub plot_width: u32,
    pub plot_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            variables: VariableNames::default(),
            bbox: BoundingBox::default(),
            coverage_start: COVERAGE_START.to_string(),
            coverage_end: COVERAGE_END.to_string(),
            chunks: ChunkSpec::default(),
            kelvin_offset: 273.15,
            ocean_mask_value: 1.0,
            climatology_path: PathBuf::from("../data/MURClimatology.nc"),
            climatology_variable: None,
            attributes: SeriesAttributes::default(),
            point: GridPoint::default(),
            outputs: OutputPaths::default(),
            plot_width: 1200,
            plot_height: 600,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration file; `.yaml`/`.yml` are read as YAML, anything
    /// else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn coverage(&self) -> Result<Coverage> {
        Coverage::parse(&self.coverage_start, &self.coverage_end)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunks.validate()?;
        self.coverage()?;

        if self.bbox.min_lat > self.bbox.max_lat || self.bbox.min_lon > self.bbox.max_lon {
            return Err(AnomalyError::ConfigError(format!(
                "bounding box is inverted: {:?}",
                self.bbox
            )));
        }
        if self.plot_width < 16 || self.plot_height < 16 {
            return Err(AnomalyError::ConfigError(format!(
                "plot size {}x{} is too small",
                self.plot_width, self.plot_height
            )));
        }
        Ok(())
    }
}

//! Centralized error handling for the anomaly pipeline
//!
//! Every stage returns [`Result`], so failures from the object store, the Zarr
//! decoder, the NetCDF layer or the alignment checks propagate unchanged up to
//! the binary, which reports them and exits.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum AnomalyError {
    /// The remote (or local) store could not be reached or read
    #[error("Connectivity error: {0}")]
    ConnectivityError(String),

    /// Store metadata is malformed or a required node is missing
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Subset and climatology do not line up after alignment
    #[error("Shape mismatch: {0}")]
    ShapeMismatchError(String),

    /// The local climatology file does not exist
    #[error("Climatology file not found: {}", .0.display())]
    ClimatologyNotFound(PathBuf),

    /// Variable not found in a dataset or file
    #[error("Variable '{var}' not found")]
    VariableNotFound { var: String },

    /// A label selection matched no coordinate values
    #[error("Empty selection: {0}")]
    EmptySelection(String),

    /// A timestamp or CF time unit string could not be parsed
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A positional index lies outside the array
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDFError(#[from] netcdf::Error),

    /// Zarr chunk retrieval or decoding errors
    #[error("Zarr error: {0}")]
    ZarrError(#[from] zarrs::array::ArrayError),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// Plot encoding errors
    #[error("Plot error: {0}")]
    PlotError(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AnomalyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnomalyError::ShapeMismatchError("214 vs 365".to_string());
        assert_eq!(err.to_string(), "Shape mismatch: 214 vs 365");

        let err = AnomalyError::VariableNotFound {
            var: "analysed_sst".to_string(),
        };
        assert!(err.to_string().contains("'analysed_sst' not found"));

        let err = AnomalyError::ClimatologyNotFound(PathBuf::from("../data/clim.nc"));
        assert!(err.to_string().contains("../data/clim.nc"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AnomalyError = io.into();
        assert!(matches!(err, AnomalyError::IoError(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}

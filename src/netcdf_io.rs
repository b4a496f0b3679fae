//! NetCDF output of reduced series
//!
//! Writes a one-dimensional series along a CF `time` coordinate, with the
//! series attributes on the data variable and a `history` global attribute.

use crate::anomaly::SeriesAttributes;
use crate::cf::TimeUnits;
use crate::errors::Result;
use crate::statistics::TimeSeries;
use chrono::Utc;
use log::info;
use netcdf::create;
use std::{fs, path::Path};

/// Name of the time dimension and coordinate variable
pub const TIME_DIMENSION: &str = "time";

/// Default name of the data variable in the output file
pub const SERIES_VARIABLE: &str = "sst_anomaly";

/// Writer for reduced time series
pub struct NetCDFWriter<'a> {
    output_path: &'a Path,
    attributes: &'a SeriesAttributes,
}

impl<'a> NetCDFWriter<'a> {
    /// Create a new NetCDF writer
    pub fn new(output_path: &'a Path, attributes: &'a SeriesAttributes) -> Self {
        Self {
            output_path,
            attributes,
        }
    }

    /// Write `series` as `var_name(time)`, replacing any existing file.
    pub fn write_series(&self, series: &TimeSeries, var_name: &str) -> Result<()> {
        if self.output_path.exists() {
            fs::remove_file(self.output_path)?;
        }
        if let Some(parent) = self.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = create(self.output_path)?;
        file.add_dimension(TIME_DIMENSION, series.len())?;

        let units = TimeUnits::seconds_since_epoch();
        let offsets: Vec<f64> = series.times.iter().map(|t| units.encode(t)).collect();
        let mut time = file.add_variable::<f64>(TIME_DIMENSION, &[TIME_DIMENSION])?;
        time.put_attribute("units", units.to_cf_string())?;
        time.put_attribute("calendar", "proleptic_gregorian")?;
        time.put_attribute("standard_name", "time")?;
        time.put_values(&offsets, ..)?;

        let mut var = file.add_variable::<f32>(var_name, &[TIME_DIMENSION])?;
        var.put_attribute("_FillValue", f32::NAN)?;
        for (name, value) in self.attributes.pairs() {
            var.put_attribute(name, value)?;
        }
        var.put_attribute("reduction", series.reduction.as_str())?;
        var.put_values(&series.values, ..)?;

        file.add_attribute(
            "history",
            format!("Created by mur-sst-anomaly on {}", Utc::now().to_rfc3339()),
        )?;

        info!(
            "Wrote {} time steps of '{var_name}' to {}",
            series.len(),
            self.output_path.display()
        );
        Ok(())
    }
}

/// Writes a reduced series to a new NetCDF file.
pub fn write_series_to_netcdf(
    series: &TimeSeries,
    attributes: &SeriesAttributes,
    var_name: &str,
    output_path: &Path,
) -> Result<()> {
    NetCDFWriter::new(output_path, attributes).write_series(series, var_name)
}

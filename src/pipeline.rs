//! End-to-end anomaly pipeline
//!
//! Opens the dataset, folds one anomaly block per year range into a series,
//! reduces it in a single pass and writes the plots and the NetCDF file.

use crate::anomaly::{AnomalyBlock, AnomalySeries};
use crate::climatology::Climatology;
use crate::config::PipelineConfig;
use crate::data_source::GridSource;
use crate::errors::{AnomalyError, Result};
use crate::netcdf_io::{write_series_to_netcdf, SERIES_VARIABLE};
use crate::plot::{save_series_plot, PlotSize};
use crate::statistics::{reduce_series, ReducedSeries};
use crate::storage::StoreLocation;
use crate::subset::{NormalizedSubset, SubsetOptions};
use crate::years::year_ranges_between;
use crate::zarr_io::ZarrDataset;
use log::info;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Products of one run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub reduced: ReducedSeries,
    /// Number of year ranges folded into the series
    pub years: usize,
}

/// Run the pipeline against the store configured in `config`.
pub fn run(config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;

    info!("Opening MUR SST zarr data...");
    let location = StoreLocation::parse(&config.store.url)?;
    // Kept alive for the whole run: remote chunk reads block on it.
    let runtime = if location.is_remote() {
        Some(Runtime::new().map_err(|e| {
            AnomalyError::ConnectivityError(format!("Failed to start I/O runtime: {e}"))
        })?)
    } else {
        None
    };

    let dataset = ZarrDataset::open(
        &config.store,
        &config.variables,
        runtime.as_ref().map(|rt| rt.handle().clone()),
    )?;
    dataset.describe();

    run_with_source(Arc::new(dataset), config)
}

/// Run the pipeline on an already opened grid.
pub fn run_with_source(source: Arc<dyn GridSource>, config: &PipelineConfig) -> Result<PipelineOutput> {
    let coverage = config.coverage()?;
    let ranges = year_ranges_between(&coverage)?;
    let options = SubsetOptions::from(config);

    let climatology = Arc::new(Climatology::open(
        &config.climatology_path,
        config.climatology_variable.as_deref(),
    )?);

    info!("Beginning to load dataset");
    let series = ranges
        .iter()
        .try_fold(AnomalySeries::empty(config.attributes.clone()), |series, range| {
            info!("Loading dataset for start date: {}", range.start_string());
            let subset = NormalizedSubset::select(Arc::clone(&source), range, &options)?;
            let aligned = climatology.align(&subset)?;
            let block = AnomalyBlock::combine(subset, aligned, config.attributes.clone())?;
            series.append(block)
        })?;
    info!("Dataset loaded");

    let series = series.with_chunks(config.chunks);
    info!(
        "Reducing {} time steps in {} chunks",
        series.len(),
        series.time_chunks().len()
    );
    let reduced = reduce_series(&series, config.point)?;

    let size = PlotSize {
        width: config.plot_width,
        height: config.plot_height,
    };
    let title = format!("{} ({})", config.attributes.description, config.attributes.units);

    info!("Plotting mean SST Anomaly over region");
    save_series_plot(
        &reduced.mean,
        &format!("Regional mean: {title}"),
        size,
        &config.outputs.mean_plot,
    )?;

    info!("Plotting SST Anomaly at specific location");
    save_series_plot(
        &reduced.point,
        &format!(
            "lat[{}] lon[{}]: {title}",
            config.point.lat_index, config.point.lon_index
        ),
        size,
        &config.outputs.location_plot,
    )?;

    write_series_to_netcdf(
        &reduced.mean,
        series.attributes(),
        SERIES_VARIABLE,
        &config.outputs.mean_netcdf,
    )?;

    Ok(PipelineOutput {
        reduced,
        years: ranges.len(),
    })
}

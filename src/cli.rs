//! Defines command-line interface options using `clap` for the anomaly pipeline.

use clap::Parser;
use std::path::PathBuf;

/// Regional sea surface temperature anomalies from the MUR L4 Zarr store
#[derive(Parser, Debug)]
#[command(
    version,
    name = "mur-sst-anomaly",
    about = "Computes, plots and saves MUR SST anomalies over a region"
)]
pub struct Args {
    /// JSON or YAML file overriding the default analysis parameters
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of threads to use for parallel processing. Defaults to number of CPU cores.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Enable verbose (debug level) logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

//! Entry point for the MUR SST anomaly pipeline.
//! Handles CLI parsing, logging and thread pool setup, then runs the pipeline.

use clap::Parser;
use log::{error, info};
use mur_sst_anomaly::prelude::*;
use std::process::ExitCode;
mod cli;

use cli::Args;

fn main() -> ExitCode {
    // Parse command-line arguments
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    println!(
        r#"
------------------------------------------------------------------
                 MUR SST Anomaly Pipeline
         Hawaii sea surface temperature anomalies
------------------------------------------------------------------
"#
    );

    match execute(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(args: &Args) -> Result<()> {
    let parallel = ParallelConfig::new(args.threads);
    parallel.setup_global_pool()?;
    get_parallel_info().log_info();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PipelineConfig::from_file(path)?
        }
        None => PipelineConfig::default(),
    };

    let output = run(&config)?;
    info!(
        "Finished: {} years, {} time steps",
        output.years,
        output.reduced.mean.len()
    );
    Ok(())
}

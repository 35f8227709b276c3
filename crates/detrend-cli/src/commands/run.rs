use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use detrend_core::io::{ArtifactFrameLoader, FsArtifactStore};
use detrend_core::pipeline::{DayOrchestrator, RunConfig, RunOptions, RunStats};
use detrend_core::science::{AperturePhotometer, DirectoryCatalog, Photometer};
use tracing::warn;

use crate::progress::BarReporter;
use crate::summary::{print_run_header, print_run_summary};

#[derive(Args)]
pub struct RunArgs {
    /// Day to process (YYYY-MM-DD)
    pub day: String,

    /// CCD id in the range 1 to 16
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub ccdid: u8,

    /// Run config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Raw metadata manifest (JSON)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Artifact store root directory
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Path where statistics are stored
    #[arg(long, default_value = ".")]
    pub statsdir: PathBuf,

    /// Suffix for output science files
    #[arg(long)]
    pub suffix: Option<String>,

    /// Smallest aperture radius in pixels
    #[arg(long)]
    pub radius_min: Option<f32>,

    /// Largest aperture radius in pixels
    #[arg(long)]
    pub radius_max: Option<f32>,

    /// Number of aperture radii
    #[arg(long)]
    pub radius_steps: Option<usize>,

    /// Directory of per-quadrant reference catalogs
    #[arg(long)]
    pub catalogs: Option<PathBuf>,

    /// Force reprocessing of all masters
    #[arg(long)]
    pub force: bool,

    /// Process groups and exposures one at a time
    #[arg(long)]
    pub sequential: bool,
}

fn build_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = super::load_config(args.config.as_deref())?;
    super::apply_paths(&mut config, args.store.as_ref(), args.manifest.as_ref());
    if args.suffix.is_some() {
        config.science.suffix = args.suffix.clone();
    }
    let phot = &mut config.photometry;
    if let Some(v) = args.radius_min {
        phot.radius_min = v;
    }
    if let Some(v) = args.radius_max {
        phot.radius_max = v;
    }
    if let Some(v) = args.radius_steps {
        phot.radius_steps = v;
    }
    if args.catalogs.is_some() {
        phot.catalog_dir = args.catalogs.clone();
    }
    Ok(config)
}

pub fn run(args: &RunArgs) -> Result<ExitCode> {
    let config = build_config(args)?;
    let metadata = super::open_manifest(&config)?;
    let store = FsArtifactStore::new(&config.store_root);
    let loader = ArtifactFrameLoader;

    print_run_header(&config, &args.day, args.ccdid);

    let photometer: Option<Box<dyn Photometer>> = match &config.photometry.catalog_dir {
        Some(dir) => Some(Box::new(AperturePhotometer::new(
            Box::new(DirectoryCatalog::new(dir)),
            config.photometry.isolation_radius,
        ))),
        None => {
            warn!("No catalog directory configured, skipping photometry");
            None
        }
    };

    let reporter = Arc::new(BarReporter::new());
    let mut orchestrator =
        DayOrchestrator::new(&config, &metadata, &loader, &store).with_reporter(reporter.clone());
    if let Some(photometer) = photometer.as_deref() {
        orchestrator = orchestrator.with_photometer(photometer);
    }

    let options = RunOptions {
        force: args.force,
        parallel: !args.sequential,
        statsdir: Some(args.statsdir.clone()),
    };
    let stats = orchestrator
        .run(&args.day, args.ccdid as i64, &options)
        .with_context(|| format!("Run failed for day {} ccd {}", args.day, args.ccdid))?;
    reporter.finish();

    print_run_summary(&stats);
    if stats.n_errors > 0 {
        warn!("{} sci files failed", stats.n_errors);
    }
    Ok(ExitCode::from(exit_status(&stats)))
}

/// Process status for a finished run: nonzero when any exposure failed.
pub fn exit_status(stats: &RunStats) -> u8 {
    if stats.is_success() {
        0
    } else {
        1
    }
}

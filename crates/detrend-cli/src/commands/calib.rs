use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use detrend_core::consts::CCD_COUNT;
use detrend_core::io::{ArtifactFrameLoader, FsArtifactStore};
use detrend_core::period::Period;
use detrend_core::pipeline::{CalibStats, DayOrchestrator, RunOptions};
use tracing::warn;

use crate::progress::BarReporter;
use crate::summary::print_calib_summary;

#[derive(Args)]
pub struct CalibArgs {
    /// Period to process: YYYY, YYYYMM, YYYYWWW, YYYY-MM-DD or START..END
    pub period: String,

    /// Only this CCD (default: all 16)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub ccdid: Option<u8>,

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

    /// Rebuild masters even when they already exist
    #[arg(long)]
    pub force: bool,

    /// Build groups one at a time
    #[arg(long)]
    pub sequential: bool,
}

pub fn run(args: &CalibArgs) -> Result<ExitCode> {
    let mut config = super::load_config(args.config.as_deref())?;
    super::apply_paths(&mut config, args.store.as_ref(), args.manifest.as_ref());
    let period = Period::parse(&args.period)
        .with_context(|| format!("Invalid period '{}'", args.period))?;
    let metadata = super::open_manifest(&config)?;
    let store = FsArtifactStore::new(&config.store_root);
    let loader = ArtifactFrameLoader;

    let ccds: Vec<u8> = match args.ccdid {
        Some(ccd) => vec![ccd],
        None => (1..=CCD_COUNT).collect(),
    };

    let reporter = Arc::new(BarReporter::new());
    let orchestrator =
        DayOrchestrator::new(&config, &metadata, &loader, &store).with_reporter(reporter.clone());
    let options = RunOptions {
        force: args.force,
        parallel: !args.sequential,
        statsdir: Some(args.statsdir.clone()),
    };
    let stats = orchestrator
        .run_calibration(&period, &ccds, &options)
        .with_context(|| format!("Calibration failed for period {period}"))?;
    reporter.finish();

    print_calib_summary(&stats);
    if stats.n_errors > 0 {
        warn!("{} ccd(s) failed", stats.n_errors);
    }
    Ok(ExitCode::from(exit_status(&stats)))
}

/// Process status for a calibration run: nonzero when any ccd failed.
pub fn exit_status(stats: &CalibStats) -> u8 {
    if stats.is_success() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use detrend_core::pipeline::{CcdCalibStats, ExposureStatus};

    use super::*;

    fn ccd_stats(ccd: u8, status: ExposureStatus) -> CcdCalibStats {
        CcdCalibStats {
            ccd,
            status,
            error_msg: String::new(),
            bias: Default::default(),
            flat: Default::default(),
        }
    }

    #[test]
    fn test_exit_status_follows_failed_ccds() {
        let mut stats = CalibStats::new("20240115");
        stats.ccds.push(ccd_stats(1, ExposureStatus::Ok));
        assert_eq!(exit_status(&stats), 0);

        stats.ccds.push(ccd_stats(2, ExposureStatus::Error));
        stats.finish(1.0);
        assert_eq!(stats.n_errors, 1);
        assert_eq!(exit_status(&stats), 1);
    }
}

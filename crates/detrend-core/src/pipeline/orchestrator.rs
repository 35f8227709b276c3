use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::calib::{BuildSummary, CalibContext, CalibrationPipeline};
use crate::correct::CorrectionSet;
use crate::error::{DetrendError, Result};
use crate::frame::{CalibrationKind, FilterBand, MasterFrame};
use crate::io::metadata::sort_exposures;
use crate::io::{validate_suffix, ArtifactStore, ExposureRecord, FrameLoader, MetadataSource};
use crate::period::{normalize_day, parse_day, Period};
use crate::quadrant::validate_ccd;
use crate::science::{Photometer, ScienceProcessor};

use super::config::RunConfig;
use super::stats::{
    elapsed_secs, CalibStageStats, CalibStats, CcdCalibStats, ExposureStats, ExposureStatus,
    RunStats, ScienceGroupStats, StageTiming,
};
use super::types::{NoOpReporter, ProgressReporter, RunOptions, RunStage};

/// Masters of one (period, ccd) after the bias and flat stages.
pub struct CalibrationRun {
    pub bias: CalibrationPipeline,
    pub flat: CalibrationPipeline,
    pub bias_summary: BuildSummary,
    pub flat_summary: BuildSummary,
    pub bias_time: f64,
    pub flat_time: f64,
}

/// Drives bias, flat and science for one day and ccd.
pub struct DayOrchestrator<'a> {
    config: &'a RunConfig,
    metadata: &'a dyn MetadataSource,
    loader: &'a dyn FrameLoader,
    store: &'a dyn ArtifactStore,
    photometer: Option<&'a dyn Photometer>,
    corrections: CorrectionSet,
    reporter: Arc<dyn ProgressReporter>,
}

impl<'a> DayOrchestrator<'a> {
    pub fn new(
        config: &'a RunConfig,
        metadata: &'a dyn MetadataSource,
        loader: &'a dyn FrameLoader,
        store: &'a dyn ArtifactStore,
    ) -> Self {
        Self {
            config,
            metadata,
            loader,
            store,
            photometer: None,
            corrections: CorrectionSet::from_config(&config.corrections),
            reporter: Arc::new(NoOpReporter),
        }
    }

    pub fn with_photometer(mut self, photometer: &'a dyn Photometer) -> Self {
        self.photometer = Some(photometer);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the correction set built from the config, e.g. to register
    /// a pocket-effect step.
    pub fn with_corrections(mut self, corrections: CorrectionSet) -> Self {
        self.corrections = corrections;
        self
    }

    fn context(&self) -> CalibContext<'_> {
        CalibContext {
            metadata: self.metadata,
            loader: self.loader,
            store: self.store,
            corrections: &self.corrections,
        }
    }

    /// Bias then flat masters for one period and ccd. Group failures are
    /// left in the summaries; only grouping errors are returned.
    pub fn calibrate(&self, period: &Period, ccd: u8, options: &RunOptions) -> Result<CalibrationRun> {
        let ctx = self.context();

        self.reporter.begin_stage(RunStage::Bias, None);
        let t0 = Instant::now();
        let mut bias = CalibrationPipeline::new(
            CalibrationKind::Bias,
            period.clone(),
            ccd,
            self.config.bias.clone(),
        )
        .with_parallel(options.parallel);
        let bias_summary = bias.build_all(ctx, options.force, None)?;
        let bias_time = elapsed_secs(t0);
        self.reporter.finish_stage();
        info!(ccd, combined = bias_summary.combined, loaded = bias_summary.loaded, "Bias done, {bias_time:.2} sec.");

        self.reporter.begin_stage(RunStage::Flat, None);
        let t0 = Instant::now();
        let mut flat = CalibrationPipeline::new(
            CalibrationKind::Flat,
            period.clone(),
            ccd,
            self.config.flat.clone(),
        )
        .with_parallel(options.parallel);
        let flat_summary = flat.build_all(ctx, options.force, Some(&bias))?;
        let flat_time = elapsed_secs(t0);
        self.reporter.finish_stage();
        info!(ccd, combined = flat_summary.combined, loaded = flat_summary.loaded, "Flat done, {flat_time:.2} sec.");

        Ok(CalibrationRun {
            bias,
            flat,
            bias_summary,
            flat_summary,
            bias_time,
            flat_time,
        })
    }

    /// Full day run: masters, then every science exposure of the day.
    ///
    /// A failed master is fatal and returned as an error before any
    /// science exposure starts. A failed exposure is recorded in the stats
    /// and the run moves on.
    pub fn run(&self, day: &str, ccd: i64, options: &RunOptions) -> Result<RunStats> {
        let ccd = validate_ccd(ccd)?;
        if let Some(suffix) = &self.config.science.suffix {
            validate_suffix(suffix)?;
        }
        let day = normalize_day(day);
        let period = Period::day(parse_day(&day)?);
        let total = Instant::now();
        let mut stats = RunStats::new(&day, ccd);
        info!(day = %day, ccd, "Processing day");

        let CalibrationRun {
            bias,
            flat,
            bias_summary,
            flat_summary,
            bias_time,
            flat_time,
        } = self.calibrate(&period, ccd, options)?;
        bias_summary.into_result()?;
        flat_summary.into_result()?;
        stats.bias = StageTiming { time: bias_time };
        stats.flat = StageTiming { time: flat_time };

        let mut exposures = self.metadata.science_exposures(&period, ccd)?;
        sort_exposures(&mut exposures);
        let groups = group_exposures(exposures);

        // Resolve every master before launching any exposure.
        let bias_master = bias.get_master(&day, ccd, None)?;
        let flats = groups
            .iter()
            .map(|g| flat.get_master(&g.day, g.ccd, Some(g.filter)))
            .collect::<Result<Vec<_>>>()?;

        let radii = self.config.photometry.radii()?;
        let mut processor =
            ScienceProcessor::new(self.store, &self.corrections, self.config.science.clone());
        if let Some(photometer) = self.photometer {
            processor = processor.with_photometry(photometer, radii);
        }

        let n_total: usize = groups.iter().map(|g| g.records.len()).sum();
        self.reporter.begin_stage(RunStage::Science, Some(n_total));
        let done = AtomicUsize::new(0);
        for (group, flat_master) in groups.into_iter().zip(flats) {
            info!(
                day = %group.day,
                filter = %group.filter,
                ccd = group.ccd,
                nfiles = group.records.len(),
                "Processing science exposures"
            );
            let process = |record: &ExposureRecord| {
                let stats =
                    self.process_exposure(&processor, record, &flat_master, &bias_master);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                self.reporter.advance(n);
                stats
            };
            let files: Vec<ExposureStats> = if options.parallel {
                group.records.par_iter().map(process).collect()
            } else {
                group.records.iter().map(process).collect()
            };
            stats.science.push(ScienceGroupStats {
                day: group.day,
                filter: group.filter,
                ccd: group.ccd,
                nfiles: files.len(),
                files,
            });
        }
        self.reporter.finish_stage();

        stats.finish(elapsed_secs(total));
        info!(total_time = stats.total_time, "All done");

        if let Some(dir) = &options.statsdir {
            self.reporter.begin_stage(RunStage::Report, None);
            stats.write_report(dir)?;
            self.reporter.finish_stage();
        }

        if stats.n_errors > 0 {
            warn!(n_errors = stats.n_errors, "Science exposures failed");
        }
        Ok(stats)
    }

    fn process_exposure(
        &self,
        processor: &ScienceProcessor<'_>,
        record: &ExposureRecord,
        flat: &MasterFrame,
        bias: &MasterFrame,
    ) -> ExposureStats {
        let t0 = Instant::now();
        let result = self
            .loader
            .load(&record.path)
            .and_then(|raw| processor.process(record, &raw, flat, bias));
        let time = elapsed_secs(t0);
        match result {
            Ok(outputs) => {
                info!(expid = record.expid, "Sci done, status=ok, {time:.2} sec.");
                ExposureStats::ok(
                    record,
                    time,
                    outputs.into_iter().filter_map(|o| o.photometry),
                )
            }
            Err(e) => {
                let err = DetrendError::exposure(record.path.display().to_string(), &e);
                error!(expid = record.expid, error = %err, "Sci done, status=error, {time:.2} sec.");
                ExposureStats::failed(record, time, &err)
            }
        }
    }

    /// Calibration-only run over several ccds. A failing ccd is recorded
    /// and the next one is attempted.
    pub fn run_calibration(
        &self,
        period: &Period,
        ccds: &[u8],
        options: &RunOptions,
    ) -> Result<CalibStats> {
        let total = Instant::now();
        let mut stats = CalibStats::new(&period.label());
        for &ccd in ccds {
            info!(period = %period, ccd, "Calibrating ccd");
            let entry = match self.calibrate(period, ccd, options) {
                Ok(run) => {
                    let bias = CalibStageStats::from_summary(&run.bias_summary, run.bias_time);
                    let flat = CalibStageStats::from_summary(&run.flat_summary, run.flat_time);
                    let failures: Vec<String> =
                        bias.failed.iter().chain(flat.failed.iter()).cloned().collect();
                    CcdCalibStats {
                        ccd,
                        status: if failures.is_empty() {
                            ExposureStatus::Ok
                        } else {
                            ExposureStatus::Error
                        },
                        error_msg: failures.join("; "),
                        bias,
                        flat,
                    }
                }
                Err(e) => {
                    error!(ccd, error = %e, "Calibration failed");
                    CcdCalibStats {
                        ccd,
                        status: ExposureStatus::Error,
                        error_msg: e.to_string(),
                        bias: CalibStageStats::default(),
                        flat: CalibStageStats::default(),
                    }
                }
            };
            stats.ccds.push(entry);
        }
        stats.finish(elapsed_secs(total));

        if let Some(dir) = &options.statsdir {
            self.reporter.begin_stage(RunStage::Report, None);
            stats.write_report(dir)?;
            self.reporter.finish_stage();
        }
        Ok(stats)
    }
}

/// Science exposures sharing (day, filter, ccd), in processing order.
struct ExposureGroup {
    day: String,
    filter: FilterBand,
    ccd: u8,
    records: Vec<ExposureRecord>,
}

/// Split sorted exposures into consecutive (day, filter, ccd) groups.
fn group_exposures(sorted: Vec<ExposureRecord>) -> Vec<ExposureGroup> {
    let mut groups: Vec<ExposureGroup> = Vec::new();
    for record in sorted {
        let day = normalize_day(&record.day);
        match groups.last_mut() {
            Some(g) if g.day == day && g.filter == record.filter && g.ccd == record.ccd => {
                g.records.push(record)
            }
            _ => groups.push(ExposureGroup {
                day,
                filter: record.filter,
                ccd: record.ccd,
                records: vec![record],
            }),
        }
    }
    groups
}

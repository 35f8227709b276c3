//! Run statistics and the JSON reports written at the end of a run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calib::BuildSummary;
use crate::consts::PIPELINE_VERSION;
use crate::error::{DetrendError, Result};
use crate::frame::FilterBand;
use crate::io::ExposureRecord;
use crate::science::QuadStats;

/// Seconds elapsed since `start`.
pub fn elapsed_secs(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

fn report_stamp(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%S").to_string()
}

fn write_json(dir: &Path, name: &str, value: &impl Serialize) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(value)?)?;
    info!(path = %path.display(), "Report written");
    Ok(path)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub time: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureStatus {
    Ok,
    Error,
}

/// Outcome of one science exposure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExposureStats {
    pub file: String,
    pub expid: i64,
    pub time: f64,
    pub status: ExposureStatus,
    pub error_msg: String,
    /// `quad_<id>` entries, one per quadrant with photometry.
    #[serde(flatten)]
    pub quads: BTreeMap<String, QuadStats>,
}

impl ExposureStats {
    pub fn ok(record: &ExposureRecord, time: f64, quads: impl IntoIterator<Item = QuadStats>) -> Self {
        Self {
            file: record.path.display().to_string(),
            expid: record.expid,
            time,
            status: ExposureStatus::Ok,
            error_msg: String::new(),
            quads: quads
                .into_iter()
                .map(|q| (format!("quad_{}", q.quad), q))
                .collect(),
        }
    }

    pub fn failed(record: &ExposureRecord, time: f64, err: &DetrendError) -> Self {
        let error_msg = match err {
            DetrendError::ExposureProcessing { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            file: record.path.display().to_string(),
            expid: record.expid,
            time,
            status: ExposureStatus::Error,
            error_msg,
            quads: BTreeMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExposureStatus::Ok
    }
}

/// Exposures of one (day, filter, ccd).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScienceGroupStats {
    pub day: String,
    pub filter: FilterBand,
    pub ccd: u8,
    pub nfiles: usize,
    pub files: Vec<ExposureStats>,
}

/// Aggregate of one day/ccd run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// UTC time the run started, RFC 3339.
    pub date: String,
    pub day: String,
    pub ccd: u8,
    pub version: String,
    pub bias: StageTiming,
    pub flat: StageTiming,
    pub science: Vec<ScienceGroupStats>,
    /// Failed exposures, refreshed by [`RunStats::finish`].
    pub n_errors: usize,
    pub total_time: f64,
    /// Report file, once written.
    #[serde(skip)]
    pub report_path: Option<PathBuf>,
    #[serde(skip)]
    started: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn new(day: &str, ccd: u8) -> Self {
        let now = Utc::now();
        Self {
            date: now.to_rfc3339(),
            day: day.to_string(),
            ccd,
            version: PIPELINE_VERSION.to_string(),
            bias: StageTiming::default(),
            flat: StageTiming::default(),
            science: Vec::new(),
            n_errors: 0,
            total_time: 0.0,
            report_path: None,
            started: Some(now),
        }
    }

    pub fn exposures(&self) -> impl Iterator<Item = &ExposureStats> {
        self.science.iter().flat_map(|g| g.files.iter())
    }

    pub fn n_exposures(&self) -> usize {
        self.exposures().count()
    }

    pub fn count_errors(&self) -> usize {
        self.exposures().filter(|e| !e.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.count_errors() == 0
    }

    /// Record the run time and the error tally.
    pub fn finish(&mut self, total_time: f64) {
        self.total_time = total_time;
        self.n_errors = self.count_errors();
    }

    /// `stats_<day>_<ccd>_<timestamp>.json`
    pub fn report_file_name(&self) -> String {
        let stamp = report_stamp(&self.started.unwrap_or_else(Utc::now));
        format!("stats_{}_{}_{}.json", self.day, self.ccd, stamp)
    }

    pub fn write_report(&mut self, dir: &Path) -> Result<PathBuf> {
        self.n_errors = self.count_errors();
        let path = write_json(dir, &self.report_file_name(), self)?;
        self.report_path = Some(path.clone());
        Ok(path)
    }
}

/// Build counts of one calibration stage for one ccd.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibStageStats {
    pub time: f64,
    pub combined: usize,
    pub loaded: usize,
    pub dropped: usize,
    pub failed: Vec<String>,
}

impl CalibStageStats {
    pub fn from_summary(summary: &BuildSummary, time: f64) -> Self {
        Self {
            time,
            combined: summary.combined,
            loaded: summary.loaded,
            dropped: summary.dropped.len(),
            failed: summary
                .failed
                .iter()
                .map(|(key, err)| format!("{key}: {err}"))
                .collect(),
        }
    }
}

/// Calibration outcome of one ccd.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CcdCalibStats {
    pub ccd: u8,
    pub status: ExposureStatus,
    pub error_msg: String,
    #[serde(default)]
    pub bias: CalibStageStats,
    #[serde(default)]
    pub flat: CalibStageStats,
}

impl CcdCalibStats {
    pub fn is_ok(&self) -> bool {
        self.status == ExposureStatus::Ok
    }
}

/// Aggregate of a calibration-only run over several ccds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibStats {
    pub date: String,
    pub period: String,
    pub version: String,
    pub ccds: Vec<CcdCalibStats>,
    /// Failed ccds, refreshed by [`CalibStats::finish`].
    pub n_errors: usize,
    pub total_time: f64,
    #[serde(skip)]
    pub report_path: Option<PathBuf>,
    #[serde(skip)]
    started: Option<DateTime<Utc>>,
}

impl CalibStats {
    pub fn new(period: &str) -> Self {
        let now = Utc::now();
        Self {
            date: now.to_rfc3339(),
            period: period.to_string(),
            version: PIPELINE_VERSION.to_string(),
            ccds: Vec::new(),
            n_errors: 0,
            total_time: 0.0,
            report_path: None,
            started: Some(now),
        }
    }

    pub fn count_errors(&self) -> usize {
        self.ccds.iter().filter(|c| !c.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.count_errors() == 0
    }

    pub fn finish(&mut self, total_time: f64) {
        self.total_time = total_time;
        self.n_errors = self.count_errors();
    }

    /// `calib_stats_<period>_<timestamp>.json`
    pub fn report_file_name(&self) -> String {
        let stamp = report_stamp(&self.started.unwrap_or_else(Utc::now));
        format!("calib_stats_{}_{}.json", self.period, stamp)
    }

    pub fn write_report(&mut self, dir: &Path) -> Result<PathBuf> {
        self.n_errors = self.count_errors();
        let path = write_json(dir, &self.report_file_name(), self)?;
        self.report_path = Some(path.clone());
        Ok(path)
    }
}

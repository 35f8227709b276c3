//! Raw-exposure metadata: what exists for a period and CCD.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::frame::{CalibrationKind, FilterBand};
use crate::period::Period;

/// One raw calibration exposure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Observation time as a fractional Julian day.
    pub obsjd: f64,
    /// Night of observation, `YYYYMMDD`.
    pub day: String,
    pub ccd: u8,
    /// Illumination source (flat LED). Absent for biases.
    #[serde(default)]
    pub led: Option<i64>,
    pub path: PathBuf,
}

/// One raw science exposure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub obsjd: f64,
    pub day: String,
    pub filter: FilterBand,
    pub ccd: u8,
    pub expid: i64,
    pub path: PathBuf,
}

/// Deterministic processing order: day, filter code (alphabetical, so
/// zg, zi, zr), ccd, then exposure time and id.
pub fn sort_exposures(records: &mut [ExposureRecord]) {
    records.sort_by(|a, b| {
        a.day
            .cmp(&b.day)
            .then(a.filter.code().cmp(b.filter.code()))
            .then(a.ccd.cmp(&b.ccd))
            .then(a.obsjd.total_cmp(&b.obsjd))
            .then(a.expid.cmp(&b.expid))
    });
}

/// Source of raw metadata. Implementations talk to the archive; the
/// pipeline only ever reads from them.
pub trait MetadataSource: Send + Sync {
    /// Raw calibration frames of `kind` for `ccd` within `period`, in
    /// acquisition order.
    fn calibration_frames(
        &self,
        kind: CalibrationKind,
        period: &Period,
        ccd: u8,
    ) -> Result<Vec<CalibrationRecord>>;

    /// Raw science exposures for `ccd` within `period`.
    fn science_exposures(&self, period: &Period, ccd: u8) -> Result<Vec<ExposureRecord>>;
}

/// Metadata read from a JSON manifest:
///
/// ```json
/// { "bias": [ {..}, .. ], "flat": [ {..}, .. ], "science": [ {..}, .. ] }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ManifestSource {
    #[serde(default)]
    pub bias: Vec<CalibrationRecord>,
    #[serde(default)]
    pub flat: Vec<CalibrationRecord>,
    #[serde(default)]
    pub science: Vec<ExposureRecord>,
}

impl ManifestSource {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&contents)?;
        debug!(
            path = %path.display(),
            bias = manifest.bias.len(),
            flat = manifest.flat.len(),
            science = manifest.science.len(),
            "loaded metadata manifest"
        );
        Ok(manifest)
    }
}

impl MetadataSource for ManifestSource {
    fn calibration_frames(
        &self,
        kind: CalibrationKind,
        period: &Period,
        ccd: u8,
    ) -> Result<Vec<CalibrationRecord>> {
        let records = match kind {
            CalibrationKind::Bias => &self.bias,
            CalibrationKind::Flat => &self.flat,
        };
        let mut selected: Vec<CalibrationRecord> = records
            .iter()
            .filter(|r| r.ccd == ccd && period.contains_day(&r.day))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.obsjd.total_cmp(&b.obsjd));
        Ok(selected)
    }

    fn science_exposures(&self, period: &Period, ccd: u8) -> Result<Vec<ExposureRecord>> {
        Ok(self
            .science
            .iter()
            .filter(|r| r.ccd == ccd && period.contains_day(&r.day))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure(day: &str, filter: FilterBand, ccd: u8, obsjd: f64, expid: i64) -> ExposureRecord {
        ExposureRecord {
            obsjd,
            day: day.into(),
            filter,
            ccd,
            expid,
            path: PathBuf::from(format!("raw/{expid}.dtr")),
        }
    }

    #[test]
    fn test_sort_exposures_order() {
        let mut records = vec![
            exposure("20240116", FilterBand::Zg, 1, 1.0, 9),
            exposure("20240115", FilterBand::Zr, 2, 3.0, 5),
            exposure("20240115", FilterBand::Zi, 2, 4.0, 4),
            exposure("20240115", FilterBand::Zr, 1, 5.0, 3),
            exposure("20240115", FilterBand::Zg, 2, 2.0, 2),
            exposure("20240115", FilterBand::Zr, 2, 3.0, 1),
        ];
        sort_exposures(&mut records);
        let expids: Vec<i64> = records.iter().map(|r| r.expid).collect();
        assert_eq!(expids, vec![2, 4, 3, 1, 5, 9]);
    }
}

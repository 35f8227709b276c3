//! Calibrate one science exposure and split it into quadrant products.

use std::path::PathBuf;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calib::builder::pipeline_time;
use crate::consts::{EPSILON, PIPELINE_NAME, PIPELINE_VERSION};
use crate::correct::CorrectionSet;
use crate::error::{DetrendError, Result};
use crate::frame::{file_name_of, Header, MasterFrame, RawFrame};
use crate::io::artifact::MASK_PLANE;
use crate::io::{Artifact, ArtifactKey, ArtifactStore, ExposureRecord, PlaneData, QuadrantTarget};
use crate::quadrant::{all_quadrants, ccd_quadrant_to_rawcell, QuadrantId};

use super::photometry::Photometer;

/// Photometry outcome of one quadrant, as reported per exposure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuadStats {
    pub quad: u8,
    pub naper: usize,
    /// Photometry table written for the quadrant.
    pub file: String,
}

/// Everything written for one quadrant.
#[derive(Clone, Debug)]
pub struct QuadrantOutput {
    pub qid: QuadrantId,
    pub image: PathBuf,
    pub photometry: Option<QuadStats>,
}

/// Knobs of the science stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScienceParams {
    /// Appended to science and photometry file names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

pub struct ScienceProcessor<'a> {
    store: &'a dyn ArtifactStore,
    corrections: &'a CorrectionSet,
    photometer: Option<&'a dyn Photometer>,
    radii: Vec<f32>,
    params: ScienceParams,
}

impl<'a> ScienceProcessor<'a> {
    pub fn new(
        store: &'a dyn ArtifactStore,
        corrections: &'a CorrectionSet,
        params: ScienceParams,
    ) -> Self {
        Self {
            store,
            corrections,
            photometer: None,
            radii: Vec::new(),
            params,
        }
    }

    /// Run photometry on every quadrant at the given radii.
    pub fn with_photometry(mut self, photometer: &'a dyn Photometer, radii: Vec<f32>) -> Self {
        self.photometer = Some(photometer);
        self.radii = radii;
        self
    }

    /// Correct `raw`, subtract `bias`, divide by `flat`, and persist the
    /// four quadrants (plus their photometry tables).
    pub fn process(
        &self,
        exposure: &ExposureRecord,
        raw: &RawFrame,
        flat: &MasterFrame,
        bias: &MasterFrame,
    ) -> Result<Vec<QuadrantOutput>> {
        let calibrated = self.calibrate(raw, flat, bias)?;
        let view = calibrated.view();
        let quads = all_quadrants(&view)?;

        let mut outputs = Vec::with_capacity(quads.len());
        for (qid, quad) in quads {
            let target = QuadrantTarget {
                day: exposure.day.clone(),
                expid: exposure.expid,
                filter: exposure.filter,
                ccd: exposure.ccd,
                qid,
            };
            let header = quadrant_header(raw, flat, bias, &target)?;
            let key = ArtifactKey::Science {
                target: target.clone(),
                suffix: self.params.suffix.clone(),
            };
            let image = self
                .store
                .write(&key, &Artifact::image(quad.to_owned(), header), true)?;
            debug!(expid = exposure.expid, qid = %qid, path = %image.display(), "Quadrant written");

            let photometry = match self.photometer {
                Some(photometer) => Some(self.photometry(photometer, quad, &target)?),
                None => None,
            };
            outputs.push(QuadrantOutput {
                qid,
                image,
                photometry,
            });
        }
        info!(expid = exposure.expid, ccd = exposure.ccd, filter = %exposure.filter, "Exposure calibrated");
        Ok(outputs)
    }

    /// Corrections, then bias subtraction, then flat division.
    pub fn calibrate(
        &self,
        raw: &RawFrame,
        flat: &MasterFrame,
        bias: &MasterFrame,
    ) -> Result<Array2<f32>> {
        for master in [bias, flat] {
            if master.shape() != raw.shape() {
                return Err(DetrendError::Configuration(format!(
                    "{} master {} has shape {:?}, exposure {} has {:?}",
                    master.kind,
                    master.key,
                    master.shape(),
                    raw.path.display(),
                    raw.shape()
                )));
            }
        }

        let mut data = self.corrections.apply(raw)?;
        data -= &bias.data;
        Zip::from(&mut data).and(&flat.data).for_each(|v, &f| {
            *v = if f.abs() < EPSILON { f32::NAN } else { *v / f };
        });
        Ok(data)
    }

    fn photometry(
        &self,
        photometer: &dyn Photometer,
        quad: ndarray::ArrayView2<'_, f32>,
        target: &QuadrantTarget,
    ) -> Result<QuadStats> {
        let mask = self.load_mask(target)?;
        let table = photometer.measure(quad, mask.as_ref().map(|m| m.view()), target, &self.radii)?;

        let key = ArtifactKey::Photometry {
            target: target.clone(),
            suffix: self.params.suffix.clone(),
        };
        let bytes = serde_json::to_vec(&table)?;
        let path = self.store.write_bytes(&key, &bytes, true)?;
        debug!(qid = %target.qid, naper = table.len(), "Photometry written");
        Ok(QuadStats {
            quad: target.qid.get(),
            naper: table.len(),
            file: path.display().to_string(),
        })
    }

    /// Mask artifact sitting next to the quadrant image, if there is one.
    fn load_mask(&self, target: &QuadrantTarget) -> Result<Option<Array2<u8>>> {
        let key = ArtifactKey::Mask {
            target: target.clone(),
        };
        if !self.store.exists(&key)? {
            warn!(expid = target.expid, qid = %target.qid, "No mask for quadrant, using all pixels");
            return Ok(None);
        }
        let artifact = self.store.read(&key)?;
        match artifact.plane(MASK_PLANE) {
            Some(PlaneData::U8(mask)) => Ok(Some(mask.clone())),
            _ => Err(DetrendError::InvalidArtifact(format!(
                "mask for {key} has no u8 '{MASK_PLANE}' plane"
            ))),
        }
    }
}

/// Raw header plus calibration and geometry cards.
fn quadrant_header(
    raw: &RawFrame,
    flat: &MasterFrame,
    bias: &MasterFrame,
    target: &QuadrantTarget,
) -> Result<Header> {
    let mut header = raw.header.clone();
    let master_name = |m: &MasterFrame| {
        m.path
            .as_deref()
            .map(file_name_of)
            .unwrap_or_else(|| m.key.to_string())
    };
    header.set_with_comment("BIASFILE", master_name(bias), "master bias");
    header.set_with_comment("FLATFILE", master_name(flat), "master flat");
    header.set("CCDID", target.ccd);
    header.set("QID", target.qid.get());
    header.set_with_comment(
        "RCID",
        ccd_quadrant_to_rawcell(target.ccd as i64, target.qid.get() as i64)?,
        "readout channel",
    );
    header.set("EXPID", target.expid);
    header.set("FILTER", target.filter.code());
    header.set_with_comment("PIPELINE", PIPELINE_NAME, "image processing pipeline");
    header.set_with_comment("PIPEV", PIPELINE_VERSION, "pipeline version");
    header.set_with_comment("PIPETIME", pipeline_time(), "file creation");
    Ok(header)
}

//! One calibration master: combine a collection, stamp the header, persist.

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::{
    BIAS_HEADER_KEYS, DEFAULT_BIAS_SKIP, EPSILON, FLAT_HEADER_KEYS, PIPELINE_NAME,
    PIPELINE_VERSION,
};
use crate::correct::CorrectionSet;
use crate::error::{DetrendError, Result};
use crate::frame::{CalibrationKind, FrameCollection, GroupKey, Header, MasterFrame};
use crate::io::{Artifact, ArtifactKey, ArtifactStore};
use crate::stack::combine::combine_with;
use crate::stack::median::nanmedian;
use crate::stack::{Combined, ProvenanceSpec, SigmaClipParams};

/// Per-kind knobs of a calibration build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibParams {
    #[serde(default)]
    pub clip: SigmaClipParams,
    /// Leading raw frames dropped from every group (detector warm-up).
    #[serde(default)]
    pub skip_first: usize,
    /// Record one `INPUTnn` card per raw file.
    #[serde(default)]
    pub include_inputs: bool,
}

impl CalibParams {
    pub fn bias() -> Self {
        Self {
            skip_first: DEFAULT_BIAS_SKIP,
            ..Self::flat()
        }
    }

    pub fn flat() -> Self {
        Self {
            clip: SigmaClipParams::default(),
            skip_first: 0,
            include_inputs: false,
        }
    }

    pub fn for_kind(kind: CalibrationKind) -> Self {
        match kind {
            CalibrationKind::Bias => Self::bias(),
            CalibrationKind::Flat => Self::flat(),
        }
    }
}

/// What distinguishes one calibration kind from another at build time.
#[derive(Clone, Debug, PartialEq)]
pub struct KindProfile {
    pub kind: CalibrationKind,
    /// Header keys copied from the reference raw frame.
    pub header_keys: Vec<String>,
    /// The group key must name a filter band.
    pub require_filter: bool,
}

impl KindProfile {
    pub fn for_kind(kind: CalibrationKind) -> Self {
        let (keys, require_filter) = match kind {
            CalibrationKind::Bias => (BIAS_HEADER_KEYS, false),
            CalibrationKind::Flat => (FLAT_HEADER_KEYS, true),
        };
        Self {
            kind,
            header_keys: keys.iter().map(|k| k.to_string()).collect(),
            require_filter,
        }
    }
}

/// Kind-specific pixel and header rules plugged into the builder.
pub trait KindRules: Send + Sync {
    /// Per-frame step run after the corrections, before stacking.
    fn prepare(&self, data: Array2<f32>) -> Result<Array2<f32>> {
        Ok(data)
    }

    /// Adjust the combined image and its header.
    fn finish(&self, _combined: &mut Combined) -> Result<()> {
        Ok(())
    }
}

/// Biases need nothing beyond the generic build.
pub struct BiasRules;

impl KindRules for BiasRules {}

/// Flats are bias-subtracted frame by frame, then normalised by their median.
pub struct FlatRules<'a> {
    bias: Option<&'a MasterFrame>,
    leds: Vec<i64>,
}

impl<'a> FlatRules<'a> {
    pub fn new(bias: Option<&'a MasterFrame>, leds: Vec<i64>) -> Self {
        Self { bias, leds }
    }
}

impl KindRules for FlatRules<'_> {
    fn prepare(&self, data: Array2<f32>) -> Result<Array2<f32>> {
        match self.bias {
            Some(bias) if bias.shape() != data.dim() => Err(DetrendError::Configuration(format!(
                "bias master {} has shape {:?}, flat frame has {:?}",
                bias.key,
                bias.shape(),
                data.dim()
            ))),
            Some(bias) => Ok(data - &bias.data),
            None => Ok(data),
        }
    }

    fn finish(&self, combined: &mut Combined) -> Result<()> {
        let norm = nanmedian(combined.data.iter());
        if !norm.is_finite() || norm.abs() < EPSILON {
            return Err(DetrendError::Configuration(format!(
                "cannot normalise flat by median {norm}"
            )));
        }
        combined.data.mapv_inplace(|v| v / norm);
        combined
            .header
            .set_with_comment("FLTNORM", norm as f64, "median used to normalise the flat");
        if let Some(bias) = self.bias {
            if let Some(path) = &bias.path {
                combined
                    .header
                    .set("BIASFILE", crate::frame::file_name_of(path));
            }
        }
        let leds: Vec<String> = self.leds.iter().map(|l| l.to_string()).collect();
        combined.header.set_with_comment("ILUM_LED", leds.join(","), "LED ids combined");
        Ok(())
    }
}

/// Builds and persists masters of one kind.
pub struct CalibrationBuilder<'a> {
    profile: &'a KindProfile,
    corrections: &'a CorrectionSet,
    params: &'a CalibParams,
}

impl<'a> CalibrationBuilder<'a> {
    pub fn new(
        profile: &'a KindProfile,
        corrections: &'a CorrectionSet,
        params: &'a CalibParams,
    ) -> Self {
        Self {
            profile,
            corrections,
            params,
        }
    }

    /// Combine a collection into a master with its full provenance header.
    pub fn build(&self, collection: &FrameCollection, rules: &dyn KindRules) -> Result<MasterFrame> {
        let key = collection.key().clone();
        if self.profile.require_filter && key.filter.is_none() {
            return Err(DetrendError::Configuration(format!(
                "{} group {key} has no filter band",
                self.profile.kind
            )));
        }

        let provenance = ProvenanceSpec {
            keys: self.profile.header_keys.clone(),
            reference: 0,
            include_inputs: self.params.include_inputs,
        };
        let mut combined = combine_with(
            collection,
            self.corrections,
            &self.params.clip,
            &provenance,
            |data| rules.prepare(data),
        )?;
        rules.finish(&mut combined)?;
        stamp_pipeline_cards(&mut combined.header, self.profile.kind, &key, collection.len());

        debug!(kind = %self.profile.kind, key = %key, frames = collection.len(), "Master combined");
        Ok(MasterFrame {
            kind: self.profile.kind,
            key,
            data: combined.data,
            header: combined.header,
            path: None,
        })
    }

    /// Write a master to the store. Without `overwrite` an existing
    /// artifact is never replaced.
    pub fn persist(
        &self,
        store: &dyn ArtifactStore,
        master: MasterFrame,
        overwrite: bool,
    ) -> Result<MasterFrame> {
        let key = ArtifactKey::master(master.kind, master.key.clone());
        let MasterFrame {
            kind,
            key: group,
            data,
            header,
            ..
        } = master;

        let mut artifact = Artifact::image(data, header);
        let path = store.write(&key, &artifact, overwrite)?;
        info!(kind = %kind, key = %group, path = %path.display(), "Master written");

        let data = artifact.take_image()?;
        Ok(MasterFrame {
            kind,
            key: group,
            data,
            header: artifact.header,
            path: Some(path),
        })
    }
}

/// Load a previously persisted master.
pub fn load_master(
    store: &dyn ArtifactStore,
    kind: CalibrationKind,
    group: &GroupKey,
) -> Result<MasterFrame> {
    let key = ArtifactKey::master(kind, group.clone());
    let path: PathBuf = store.path_for(&key)?;
    let mut artifact = store.read(&key)?;
    let data = artifact.take_image()?;
    Ok(MasterFrame {
        kind,
        key: group.clone(),
        data,
        header: artifact.header,
        path: Some(path),
    })
}

/// Cards every master carries regardless of kind.
fn stamp_pipeline_cards(header: &mut Header, kind: CalibrationKind, key: &GroupKey, nframes: usize) {
    header.set("IMGTYPE", kind.as_str());
    header.set("NFRAMES", nframes);
    header.set("NDAYS", 1i64);
    header.set("PTYPE", "daily");
    header.set("PERIOD", key.period.as_str());
    header.set("CCDID", key.ccd);
    if let Some(filter) = key.filter {
        header.set("FILTER", filter.code());
    }
    header.set_with_comment("PIPELINE", PIPELINE_NAME, "image processing pipeline");
    header.set_with_comment("PIPEV", PIPELINE_VERSION, "pipeline version");
    header.set_with_comment("PIPETIME", pipeline_time(), "file creation");
}

/// Local wall-clock timestamp in ISO 8601 form.
pub(crate) fn pipeline_time() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

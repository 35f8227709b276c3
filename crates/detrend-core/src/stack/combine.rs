//! Reduce a [`FrameCollection`] to one master array plus provenance header.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::correct::CorrectionSet;
use crate::error::{DetrendError, Result};
use crate::frame::{FrameCollection, Header};

use super::sigma_clip::{sigma_clip_stack, SigmaClipParams};

/// Which header cards survive combination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceSpec {
    /// Keys copied from the reference frame. Every key is required.
    pub keys: Vec<String>,
    /// Index of the reference frame within the collection.
    #[serde(default)]
    pub reference: usize,
    /// Add one `INPUTnn` card per input file.
    #[serde(default)]
    pub include_inputs: bool,
}

impl ProvenanceSpec {
    pub fn from_keys(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            reference: 0,
            include_inputs: false,
        }
    }
}

/// Output of one combination.
#[derive(Clone, Debug)]
pub struct Combined {
    pub data: Array2<f32>,
    pub header: Header,
}

/// Build the provenance header from the reference frame of a collection.
pub fn provenance_header(collection: &FrameCollection, provenance: &ProvenanceSpec) -> Result<Header> {
    let reference = collection.frames().get(provenance.reference).ok_or_else(|| {
        DetrendError::Configuration(format!(
            "reference frame {} out of range (collection has {})",
            provenance.reference,
            collection.len()
        ))
    })?;
    let source_name = reference.path.display().to_string();

    let mut header = Header::new();
    for key in &provenance.keys {
        let card = reference
            .header
            .card(key)
            .ok_or_else(|| DetrendError::MissingHeaderKey {
                key: key.clone(),
                source_name: source_name.clone(),
            })?;
        match &card.comment {
            Some(comment) => header.set_with_comment(key, card.value.clone(), comment),
            None => header.set(key, card.value.clone()),
        }
    }

    header.set_with_comment("NINPUTS", collection.len(), "num. input images");
    if provenance.include_inputs {
        for (i, frame) in collection.frames().iter().enumerate() {
            header.set_with_comment(&format!("INPUT{i:02}"), frame.file_name(), "input image");
        }
    }
    Ok(header)
}

/// Correct every frame and reduce the stack with a sigma-clipped mean.
pub fn combine(
    collection: &FrameCollection,
    corrections: &CorrectionSet,
    clip: &SigmaClipParams,
    provenance: &ProvenanceSpec,
) -> Result<Combined> {
    combine_with(collection, corrections, clip, provenance, Ok)
}

/// Like [`combine`], with an extra per-frame step applied after the
/// corrections (flats use it to subtract the master bias).
pub fn combine_with<F>(
    collection: &FrameCollection,
    corrections: &CorrectionSet,
    clip: &SigmaClipParams,
    provenance: &ProvenanceSpec,
    prepare: F,
) -> Result<Combined>
where
    F: Fn(Array2<f32>) -> Result<Array2<f32>> + Sync,
{
    // Header first: a missing provenance key should fail before any pixel work.
    let header = provenance_header(collection, provenance)?;
    corrections.validate()?;

    let frames = collection.frames();
    debug!(
        key = %collection.key(),
        frames = frames.len(),
        steps = ?corrections.step_names(),
        "correcting frames"
    );
    let corrected: Vec<Array2<f32>> = if frames.len() >= PARALLEL_FRAME_THRESHOLD {
        frames
            .par_iter()
            .map(|f| corrections.apply(f).and_then(&prepare))
            .collect::<Result<_>>()?
    } else {
        frames
            .iter()
            .map(|f| corrections.apply(f).and_then(&prepare))
            .collect::<Result<_>>()?
    };

    let data = sigma_clip_stack(&corrected, clip)?;
    Ok(Combined { data, header })
}

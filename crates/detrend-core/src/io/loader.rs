use std::path::Path;

use crate::error::Result;
use crate::frame::RawFrame;

use super::artifact::{read_artifact, OVERSCAN_PLANE};

/// Loads one raw exposure from wherever the metadata says it lives.
pub trait FrameLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<RawFrame>;
}

/// Reads raw frames stored as artifacts: the `data` plane is the image,
/// an optional `overscan` plane carries the overscan strip.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArtifactFrameLoader;

impl FrameLoader for ArtifactFrameLoader {
    fn load(&self, path: &Path) -> Result<RawFrame> {
        let mut artifact = read_artifact(path)?;
        let data = artifact.take_image()?;
        let overscan = artifact.take_f32(OVERSCAN_PLANE);
        let mut frame = RawFrame::new(data, artifact.header, path);
        frame.overscan = overscan;
        Ok(frame)
    }
}

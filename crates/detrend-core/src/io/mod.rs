pub mod artifact;
pub mod loader;
pub mod metadata;
pub mod store;

pub use artifact::{read_artifact, save_artifact, Artifact, PlaneData};
pub use loader::{ArtifactFrameLoader, FrameLoader};
pub use metadata::{CalibrationRecord, ExposureRecord, ManifestSource, MetadataSource};
pub use store::{validate_suffix, ArtifactKey, ArtifactStore, FsArtifactStore, QuadrantTarget};

//! Science exposure calibration and per-quadrant photometry.

pub mod photometry;
pub mod processor;

pub use photometry::{
    AperturePhotometer, CatalogEntry, CatalogSource, DirectoryCatalog, Photometer,
    PhotometryParams, PhotometryTable,
};
pub use processor::{QuadStats, QuadrantOutput, ScienceParams, ScienceProcessor};

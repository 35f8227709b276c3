pub mod combine;
pub mod mean;
pub mod median;
pub mod sigma_clip;

pub use combine::{combine, combine_with, Combined, ProvenanceSpec};
pub use sigma_clip::{sigma_clip_stack, CenterFunc, SigmaClipParams, StdFunc};

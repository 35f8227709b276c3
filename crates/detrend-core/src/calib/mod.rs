//! Master bias and flat production.

pub mod builder;
pub mod illumination;
pub mod pipeline;

pub use builder::{
    load_master, BiasRules, CalibParams, CalibrationBuilder, FlatRules, KindProfile, KindRules,
};
pub use illumination::{group_by_filter, led_to_filter};
pub use pipeline::{BuildOutcome, BuildSummary, CalibContext, CalibrationPipeline, GroupState};

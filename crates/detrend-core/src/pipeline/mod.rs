pub mod config;
mod orchestrator;
pub mod stats;
mod types;

pub use config::RunConfig;
pub use orchestrator::{CalibrationRun, DayOrchestrator};
pub use stats::{
    CalibStats, CcdCalibStats, ExposureStats, ExposureStatus, RunStats, ScienceGroupStats,
};
pub use types::{NoOpReporter, ProgressReporter, RunOptions, RunStage};

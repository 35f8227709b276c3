use std::path::PathBuf;

/// Run stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStage {
    Bias,
    Flat,
    Science,
    Report,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bias => write!(f, "Building bias"),
            Self::Flat => write!(f, "Building flats"),
            Self::Science => write!(f, "Science exposures"),
            Self::Report => write!(f, "Writing report"),
        }
    }
}

/// Per-run switches, usually straight from the command line.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Rebuild masters and overwrite existing ones.
    pub force: bool,
    /// Build groups and process exposures on the rayon pool.
    pub parallel: bool,
    /// Where to write the run report. `None` skips the report.
    pub statsdir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            parallel: true,
            statsdir: None,
        }
    }
}

/// Thread-safe progress reporting for a run.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items
    /// in this stage (e.g., exposure count), if known.
    fn begin_stage(&self, _stage: RunStage, _total_items: Option<usize>) {}

    /// `items_done` work items of the current stage have completed so far.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// Reporter that ignores everything.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

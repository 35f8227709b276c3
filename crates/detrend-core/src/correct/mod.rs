//! Per-frame pixel corrections applied before combination and before
//! science calibration.
//!
//! Steps are pure functions of `(data, frame)`; which ones run is decided
//! by one [`CorrectionConfig`] built once per run and shared by the bias,
//! flat and science paths, so masters and science frames always see the
//! same corrections with the same parameters.

pub mod nonlinearity;
pub mod overscan;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DetrendError, Result};
use crate::frame::RawFrame;

pub use nonlinearity::{NonLinearityCorrection, NonLinearityParams};
pub use overscan::{OverscanCorrection, OverscanParams};

/// Which corrections run, and with which parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Non-linearity correction (applied first).
    pub corr_nl: bool,
    /// Overscan subtraction.
    pub corr_overscan: bool,
    /// Pocket-effect correction. Needs a step registered with
    /// [`CorrectionSet::with_pocket_step`].
    pub corr_pocket: bool,
    #[serde(default)]
    pub overscan: OverscanParams,
    #[serde(default)]
    pub nonlinearity: NonLinearityParams,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            corr_nl: true,
            corr_overscan: true,
            corr_pocket: false,
            overscan: OverscanParams::default(),
            nonlinearity: NonLinearityParams::default(),
        }
    }
}

impl CorrectionConfig {
    /// Every step disabled.
    pub fn none() -> Self {
        Self {
            corr_nl: false,
            corr_overscan: false,
            corr_pocket: false,
            ..Self::default()
        }
    }
}

/// A single named correction.
pub trait CorrectionStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the corrected pixels. `data` already carries the output of
    /// earlier steps; `frame` is the untouched raw frame (header, overscan).
    fn apply(&self, data: Array2<f32>, frame: &RawFrame) -> Result<Array2<f32>>;
}

/// The ordered, resolved list of steps for one run.
pub struct CorrectionSet {
    config: CorrectionConfig,
    steps: Vec<Box<dyn CorrectionStep>>,
    pocket: Option<Box<dyn CorrectionStep>>,
}

impl CorrectionSet {
    pub fn from_config(config: &CorrectionConfig) -> Self {
        let mut steps: Vec<Box<dyn CorrectionStep>> = Vec::new();
        if config.corr_nl {
            steps.push(Box::new(NonLinearityCorrection::new(
                config.nonlinearity.clone(),
            )));
        }
        if config.corr_overscan {
            steps.push(Box::new(OverscanCorrection::new(config.overscan.clone())));
        }
        Self {
            config: config.clone(),
            steps,
            pocket: None,
        }
    }

    /// Register the pocket-effect model. It runs last.
    pub fn with_pocket_step(mut self, step: Box<dyn CorrectionStep>) -> Self {
        self.pocket = Some(step);
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Names of the steps that will run, in order.
    pub fn step_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.steps.iter().map(|s| s.name()).collect();
        if self.config.corr_pocket {
            if let Some(p) = &self.pocket {
                names.push(p.name());
            }
        }
        names
    }

    /// Check that every enabled step can actually run.
    pub fn validate(&self) -> Result<()> {
        if self.config.corr_pocket && self.pocket.is_none() {
            return Err(DetrendError::Configuration(
                "pocket-effect correction enabled but no pocket step registered".into(),
            ));
        }
        Ok(())
    }

    /// Apply every enabled step to one frame, in order.
    pub fn apply(&self, frame: &RawFrame) -> Result<Array2<f32>> {
        self.validate()?;
        let mut data = frame.data.clone();
        for step in &self.steps {
            debug!(step = step.name(), file = %frame.path.display(), "applying correction");
            data = step.apply(data, frame)?;
        }
        if self.config.corr_pocket {
            if let Some(pocket) = &self.pocket {
                data = pocket.apply(data, frame)?;
            }
        }
        Ok(data)
    }
}

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{DetrendError, Result};
use crate::frame::RawFrame;

use super::CorrectionStep;

/// Polynomial response model: `corrected = sum_i coefficients[i] * raw^i`.
/// The default `[0, 1]` is the identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NonLinearityParams {
    pub coefficients: Vec<f32>,
}

impl Default for NonLinearityParams {
    fn default() -> Self {
        Self {
            coefficients: vec![0.0, 1.0],
        }
    }
}

pub struct NonLinearityCorrection {
    params: NonLinearityParams,
}

impl NonLinearityCorrection {
    pub fn new(params: NonLinearityParams) -> Self {
        Self { params }
    }
}

impl CorrectionStep for NonLinearityCorrection {
    fn name(&self) -> &'static str {
        "nonlinearity"
    }

    fn apply(&self, mut data: Array2<f32>, _frame: &RawFrame) -> Result<Array2<f32>> {
        let coeffs = &self.params.coefficients;
        if coeffs.is_empty() {
            return Err(DetrendError::Configuration(
                "non-linearity model has no coefficients".into(),
            ));
        }
        // Horner evaluation, highest order first.
        data.mapv_inplace(|x| coeffs.iter().rev().fold(0.0f32, |acc, &c| acc * x + c));
        Ok(data)
    }
}

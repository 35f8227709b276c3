use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_OVERSCAN_RANGE;
use crate::error::{DetrendError, Result};
use crate::frame::RawFrame;
use crate::stack::median::compute_median;

use super::CorrectionStep;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverscanParams {
    /// Overscan columns `[start, end)` used for the per-row level.
    pub userange: (usize, usize),
}

impl Default for OverscanParams {
    fn default() -> Self {
        Self {
            userange: DEFAULT_OVERSCAN_RANGE,
        }
    }
}

/// Subtract, row by row, the median of the overscan strip over `userange`.
pub struct OverscanCorrection {
    params: OverscanParams,
}

impl OverscanCorrection {
    pub fn new(params: OverscanParams) -> Self {
        Self { params }
    }
}

impl CorrectionStep for OverscanCorrection {
    fn name(&self) -> &'static str {
        "overscan"
    }

    fn apply(&self, mut data: Array2<f32>, frame: &RawFrame) -> Result<Array2<f32>> {
        let overscan = frame.overscan.as_ref().ok_or_else(|| {
            DetrendError::Configuration(format!(
                "overscan correction requested but {} has no overscan plane",
                frame.path.display()
            ))
        })?;

        let (start, end) = self.params.userange;
        if start >= end || end > overscan.ncols() {
            return Err(DetrendError::Configuration(format!(
                "overscan range {start}..{end} outside {} overscan columns",
                overscan.ncols()
            )));
        }
        if overscan.nrows() != data.nrows() {
            return Err(DetrendError::Configuration(format!(
                "overscan has {} rows, image has {}",
                overscan.nrows(),
                data.nrows()
            )));
        }

        let mut values = vec![0.0f32; end - start];
        for (mut row, os_row) in data.axis_iter_mut(Axis(0)).zip(overscan.axis_iter(Axis(0))) {
            for (v, &o) in values.iter_mut().zip(os_row.iter().skip(start).take(end - start)) {
                *v = o;
            }
            let n = values.len();
            let level = compute_median(&mut values, n);
            row -= level;
        }
        Ok(data)
    }
}

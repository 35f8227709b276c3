use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_MAX_ITERS, DEFAULT_SIGMA_CLIP, EPSILON, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{DetrendError, Result};

use super::mean::{mean_stack, nanmean};
use super::median::compute_median;

/// Central estimate used when clipping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CenterFunc {
    #[default]
    Median,
    Mean,
}

/// Spread estimate used when clipping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdFunc {
    /// Population standard deviation.
    #[default]
    Std,
    /// Median absolute deviation scaled to a Gaussian sigma (x 1.4826).
    MadStd,
}

/// Parameters for sigma-clipped mean stacking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Sigma threshold: values beyond center +/- sigma*spread are rejected (default: 3).
    pub sigma: f32,
    /// Maximum number of rejection iterations (default: 1).
    pub maxiters: usize,
    #[serde(default)]
    pub cenfunc: CenterFunc,
    #[serde(default)]
    pub stdfunc: StdFunc,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA_CLIP,
            maxiters: DEFAULT_MAX_ITERS,
            cenfunc: CenterFunc::Median,
            stdfunc: StdFunc::Std,
        }
    }
}

/// Stack frames using a sigma-clipped, NaN-aware mean.
///
/// Per pixel: compute the center and spread of the surviving samples,
/// reject samples more than `sigma` spreads from the center, and repeat up
/// to `maxiters` times or until nothing more is rejected. The output is the
/// mean of the survivors. NaN samples never survive. A pixel that loses
/// every sample falls back to the unclipped mean.
///
/// With the population std as spread, a single outlier among `n` samples
/// lies at most `n / sqrt(n - 1)` spreads from the median, so at the
/// default `sigma = 3` it can only be rejected when `n >= 8`. Smaller
/// stacks need a lower `sigma` or [`StdFunc::MadStd`].
///
/// `maxiters == 0` is a plain NaN-aware mean.
///
/// Parallelizes at the row level for images >= 256x256.
pub fn sigma_clip_stack(frames: &[Array2<f32>], params: &SigmaClipParams) -> Result<Array2<f32>> {
    let first = frames
        .first()
        .ok_or_else(|| DetrendError::Configuration("empty frame stack".into()))?;
    let (h, w) = first.dim();
    if let Some(bad) = frames.iter().find(|f| f.dim() != (h, w)) {
        return Err(DetrendError::Configuration(format!(
            "frame shape {:?} differs from {:?}",
            bad.dim(),
            (h, w)
        )));
    }
    if params.sigma.is_nan() || params.sigma <= 0.0 {
        return Err(DetrendError::Configuration(format!(
            "sigma must be positive, got {}",
            params.sigma
        )));
    }

    if params.maxiters == 0 {
        return mean_stack(frames);
    }

    let n = frames.len();
    let mut result = Array2::<f32>::zeros((h, w));

    let fill_row = |row: usize, out: &mut [f32]| {
        let mut pixel_values = vec![0.0f32; n];
        let mut mask = vec![true; n];
        let mut scratch = vec![0.0f32; n];
        for (col, value) in out.iter_mut().enumerate() {
            for (i, frame) in frames.iter().enumerate() {
                pixel_values[i] = frame[[row, col]];
            }
            *value = clip_pixel(&pixel_values, &mut mask, &mut scratch, params);
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut out)| {
                if let Some(slice) = out.as_slice_mut() {
                    fill_row(row, slice);
                }
            });
    } else {
        for (row, mut out) in result.axis_iter_mut(Axis(0)).enumerate() {
            if let Some(slice) = out.as_slice_mut() {
                fill_row(row, slice);
            }
        }
    }

    Ok(result)
}

/// Clip one pixel's samples and return the mean of the survivors.
fn clip_pixel(
    values: &[f32],
    mask: &mut [bool],
    scratch: &mut [f32],
    params: &SigmaClipParams,
) -> f32 {
    for (m, v) in mask.iter_mut().zip(values) {
        *m = !v.is_nan();
    }

    for _ in 0..params.maxiters {
        let Some((center, spread)) = center_spread(values, mask, scratch, params) else {
            break;
        };
        if spread < EPSILON {
            break;
        }
        let lo = center - params.sigma * spread;
        let hi = center + params.sigma * spread;
        let mut rejected = 0usize;
        for (m, &v) in mask.iter_mut().zip(values) {
            if *m && (v < lo || v > hi) {
                *m = false;
                rejected += 1;
            }
        }
        if rejected == 0 {
            break;
        }
    }

    let mut sum = 0.0f32;
    let mut count = 0u32;
    for (&m, &v) in mask.iter().zip(values) {
        if m {
            sum += v;
            count += 1;
        }
    }

    if count > 0 {
        sum / count as f32
    } else {
        // If all values rejected, fall back to full mean
        nanmean(values)
    }
}

/// Center and spread of the unmasked samples; `None` when none are left.
fn center_spread(
    values: &[f32],
    mask: &[bool],
    scratch: &mut [f32],
    params: &SigmaClipParams,
) -> Option<(f32, f32)> {
    let mut k = 0usize;
    for (&m, &v) in mask.iter().zip(values) {
        if m {
            scratch[k] = v;
            k += 1;
        }
    }
    if k == 0 {
        return None;
    }

    let mean = scratch[..k].iter().sum::<f32>() / k as f32;
    let center = match params.cenfunc {
        CenterFunc::Mean => mean,
        CenterFunc::Median => compute_median(scratch, k),
    };

    let spread = match params.stdfunc {
        StdFunc::Std => {
            let var = scratch[..k].iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / k as f32;
            var.sqrt()
        }
        StdFunc::MadStd => {
            let median = compute_median(scratch, k);
            for v in scratch[..k].iter_mut() {
                *v = (*v - median).abs();
            }
            compute_median(scratch, k) * 1.482_602_2
        }
    };
    Some((center, spread))
}

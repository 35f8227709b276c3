use ndarray::{Array2, Zip};

use crate::error::{DetrendError, Result};

/// Stack frames by computing the NaN-aware mean at each pixel.
///
/// Pixels that are NaN in every frame stay NaN.
pub fn mean_stack(frames: &[Array2<f32>]) -> Result<Array2<f32>> {
    let first = frames
        .first()
        .ok_or_else(|| DetrendError::Configuration("empty frame stack".into()))?;
    let shape = first.dim();

    let mut sum = Array2::<f32>::zeros(shape);
    let mut count = Array2::<u32>::zeros(shape);

    for frame in frames {
        if frame.dim() != shape {
            return Err(DetrendError::Configuration(format!(
                "frame shape {:?} differs from {:?}",
                frame.dim(),
                shape
            )));
        }
        Zip::from(&mut sum)
            .and(&mut count)
            .and(frame)
            .for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += v;
                    *c += 1;
                }
            });
    }

    Zip::from(&mut sum).and(&count).for_each(|s, &c| {
        *s = if c > 0 { *s / c as f32 } else { f32::NAN };
    });
    Ok(sum)
}

/// NaN-aware mean of a slice of samples.
pub fn nanmean(values: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0u32;
    for &v in values {
        if !v.is_nan() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        f32::NAN
    } else {
        sum / count as f32
    }
}

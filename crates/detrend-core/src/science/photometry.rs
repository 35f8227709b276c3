//! Circular-aperture photometry of catalog sources on one science quadrant.

use std::fs;
use std::path::PathBuf;

use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{
    DEFAULT_APERTURE_MAX, DEFAULT_APERTURE_MIN, DEFAULT_APERTURE_STEPS, DEFAULT_ISOLATION_RADIUS,
};
use crate::error::{DetrendError, Result};
use crate::io::QuadrantTarget;
use crate::stack::median::compute_median;

/// Aperture touches the quadrant edge.
pub const FLAG_EDGE: u8 = 1;
/// Aperture contains masked pixels, which were left out of the sum.
pub const FLAG_MASKED: u8 = 2;
/// Aperture contains non-finite pixels, which were left out of the sum.
pub const FLAG_NAN: u8 = 4;

/// Scale from median absolute deviation to a Gaussian sigma.
const MAD_TO_SIGMA: f32 = 1.4826;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhotometryParams {
    /// Smallest aperture radius in pixels.
    pub radius_min: f32,
    /// Largest aperture radius in pixels.
    pub radius_max: f32,
    /// Number of radii, evenly spaced and including both ends.
    pub radius_steps: usize,
    /// Neighbour distance (pixels) under which a source is not isolated.
    pub isolation_radius: f32,
    /// Directory of per-quadrant reference catalogs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_dir: Option<PathBuf>,
}

impl Default for PhotometryParams {
    fn default() -> Self {
        Self {
            radius_min: DEFAULT_APERTURE_MIN,
            radius_max: DEFAULT_APERTURE_MAX,
            radius_steps: DEFAULT_APERTURE_STEPS,
            isolation_radius: DEFAULT_ISOLATION_RADIUS,
            catalog_dir: None,
        }
    }
}

impl PhotometryParams {
    /// Evenly spaced radii from `radius_min` to `radius_max` inclusive.
    pub fn radii(&self) -> Result<Vec<f32>> {
        if self.radius_steps == 0
            || self.radius_min <= 0.0
            || self.radius_max < self.radius_min
        {
            return Err(DetrendError::Configuration(format!(
                "invalid aperture radii: {}..{} in {} steps",
                self.radius_min, self.radius_max, self.radius_steps
            )));
        }
        Ok(linspace(self.radius_min, self.radius_max, self.radius_steps))
    }
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f32, stop: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f32;
            (0..n).map(|i| start + step * i as f32).collect()
        }
    }
}

/// One reference source, in quadrant pixel coordinates (x = column, y = row).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub source_id: i64,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mag: Option<f64>,
}

/// Supplies the reference sources falling on a quadrant.
pub trait CatalogSource: Send + Sync {
    fn sources(&self, target: &QuadrantTarget) -> Result<Vec<CatalogEntry>>;
}

/// Catalogs stored as JSON arrays, one file per CCD quadrant:
/// `<root>/catalog_cNN_oQ.json`. A missing file means no sources.
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, ccd: u8, qid: u8) -> PathBuf {
        self.root.join(format!("catalog_c{ccd:02}_o{qid}.json"))
    }
}

impl CatalogSource for DirectoryCatalog {
    fn sources(&self, target: &QuadrantTarget) -> Result<Vec<CatalogEntry>> {
        let path = self.path_for(target.ccd, target.qid.get());
        if !path.is_file() {
            debug!(path = %path.display(), "No catalog for quadrant");
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Photometry of one source at every radius.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApertureRow {
    pub source_id: i64,
    pub x: f64,
    pub y: f64,
    pub isolated: bool,
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
    pub flag: Vec<u8>,
}

/// Photometry table for one quadrant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotometryTable {
    pub radii: Vec<f32>,
    pub rows: Vec<ApertureRow>,
}

impl PhotometryTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Measures sources on a calibrated quadrant.
pub trait Photometer: Send + Sync {
    /// `mask` pixels that are non-zero are excluded from every sum.
    fn measure(
        &self,
        image: ArrayView2<'_, f32>,
        mask: Option<ArrayView2<'_, u8>>,
        target: &QuadrantTarget,
        radii: &[f32],
    ) -> Result<PhotometryTable>;
}

/// Background-subtracted circular apertures around catalog positions.
///
/// The background level and per-pixel noise are global to the quadrant:
/// the median and MAD-based sigma of the unmasked, finite pixels.
pub struct AperturePhotometer {
    catalog: Box<dyn CatalogSource>,
    isolation_radius: f32,
}

impl AperturePhotometer {
    pub fn new(catalog: Box<dyn CatalogSource>, isolation_radius: f32) -> Self {
        Self {
            catalog,
            isolation_radius,
        }
    }
}

impl Photometer for AperturePhotometer {
    fn measure(
        &self,
        image: ArrayView2<'_, f32>,
        mask: Option<ArrayView2<'_, u8>>,
        target: &QuadrantTarget,
        radii: &[f32],
    ) -> Result<PhotometryTable> {
        if let Some(m) = &mask {
            if m.dim() != image.dim() {
                return Err(DetrendError::Configuration(format!(
                    "mask shape {:?} differs from quadrant shape {:?}",
                    m.dim(),
                    image.dim()
                )));
            }
        }

        let sources = self.catalog.sources(target)?;
        let (background, noise) = background_stats(&image, mask.as_ref());
        let isolated = isolation_flags(&sources, self.isolation_radius);

        let rows = sources
            .par_iter()
            .zip(isolated.par_iter())
            .map(|(src, &isolated)| {
                let mut row = ApertureRow {
                    source_id: src.source_id,
                    x: src.x,
                    y: src.y,
                    isolated,
                    flux: Vec::with_capacity(radii.len()),
                    flux_err: Vec::with_capacity(radii.len()),
                    flag: Vec::with_capacity(radii.len()),
                };
                for &r in radii {
                    let m = aperture_sum(&image, mask.as_ref(), src.x, src.y, r, background);
                    row.flux.push(m.flux);
                    row.flux_err
                        .push((m.flux.max(0.0) + m.npix as f64 * (noise as f64).powi(2)).sqrt());
                    row.flag.push(m.flag);
                }
                row
            })
            .collect::<Vec<_>>();

        debug!(
            ccd = target.ccd,
            qid = target.qid.get(),
            sources = rows.len(),
            background,
            noise,
            "Aperture photometry done"
        );
        Ok(PhotometryTable {
            radii: radii.to_vec(),
            rows,
        })
    }
}

struct ApertureSum {
    flux: f64,
    npix: usize,
    flag: u8,
}

fn aperture_sum(
    image: &ArrayView2<'_, f32>,
    mask: Option<&ArrayView2<'_, u8>>,
    x: f64,
    y: f64,
    radius: f32,
    background: f32,
) -> ApertureSum {
    let (h, w) = image.dim();
    let r = radius as f64;
    let mut sum = ApertureSum {
        flux: 0.0,
        npix: 0,
        flag: 0,
    };

    let row_lo = (y - r).floor();
    let row_hi = (y + r).ceil();
    let col_lo = (x - r).floor();
    let col_hi = (x + r).ceil();
    if row_lo < 0.0 || col_lo < 0.0 || row_hi >= h as f64 || col_hi >= w as f64 {
        sum.flag |= FLAG_EDGE;
    }

    let r0 = row_lo.max(0.0) as usize;
    let r1 = (row_hi.max(-1.0) as isize).min(h as isize - 1);
    let c0 = col_lo.max(0.0) as usize;
    let c1 = (col_hi.max(-1.0) as isize).min(w as isize - 1);
    if r1 < 0 || c1 < 0 {
        return sum;
    }

    for row in r0..=r1 as usize {
        for col in c0..=c1 as usize {
            let dx = col as f64 - x;
            let dy = row as f64 - y;
            if dx * dx + dy * dy > r * r {
                continue;
            }
            if mask.is_some_and(|m| m[[row, col]] != 0) {
                sum.flag |= FLAG_MASKED;
                continue;
            }
            let v = image[[row, col]];
            if !v.is_finite() {
                sum.flag |= FLAG_NAN;
                continue;
            }
            sum.flux += (v - background) as f64;
            sum.npix += 1;
        }
    }
    sum
}

/// Median and MAD sigma of the usable pixels.
fn background_stats(image: &ArrayView2<'_, f32>, mask: Option<&ArrayView2<'_, u8>>) -> (f32, f32) {
    let mut values: Vec<f32> = match mask {
        Some(m) => image
            .iter()
            .zip(m.iter())
            .filter(|(v, mk)| **mk == 0 && v.is_finite())
            .map(|(&v, _)| v)
            .collect(),
        None => image.iter().copied().filter(|v| v.is_finite()).collect(),
    };
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let median = compute_median(&mut values, n);
    let mut deviations: Vec<f32> = values.iter().map(|v| (v - median).abs()).collect();
    let mad = compute_median(&mut deviations, n);
    (median, mad * MAD_TO_SIGMA)
}

/// A source is isolated when no other source lies within `radius`.
fn isolation_flags(sources: &[CatalogEntry], radius: f32) -> Vec<bool> {
    let r2 = (radius as f64).powi(2);
    sources
        .iter()
        .enumerate()
        .map(|(i, a)| {
            !sources.iter().enumerate().any(|(j, b)| {
                i != j && (a.x - b.x).powi(2) + (a.y - b.y).powi(2) < r2
            })
        })
        .collect()
}

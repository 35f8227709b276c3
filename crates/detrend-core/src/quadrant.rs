//! CCD quadrant geometry.
//!
//! A CCD array is split into four readout quadrants by halving both axes.
//! Row 0 is the bottom of the CCD, so the upper half of the row range is
//! the "top" of the detector:
//!
//! ```text
//!   +------+------+
//!   |  q2  |  q1  |   rows h/2..h
//!   +------+------+
//!   |  q3  |  q4  |   rows 0..h/2
//!   +------+------+
//!    cols    cols
//!    0..w/2  w/2..w
//! ```
//!
//! The same table is used for calibration masters and science frames, so a
//! master quadrant lines up pixel-for-pixel with its science counterpart.

use std::fmt;

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::consts::{CCD_COUNT, QUADRANTS_PER_CCD};
use crate::error::{DetrendError, Result};

/// Quadrant id, 1..=4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct QuadrantId(u8);

impl QuadrantId {
    pub const ALL: [QuadrantId; 4] = [QuadrantId(1), QuadrantId(2), QuadrantId(3), QuadrantId(4)];

    pub fn new(id: i64) -> Result<Self> {
        if (1..=QUADRANTS_PER_CCD as i64).contains(&id) {
            Ok(Self(id as u8))
        } else {
            Err(DetrendError::InvalidId {
                what: "quadrant",
                id,
            })
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for QuadrantId {
    type Error = DetrendError;

    fn try_from(id: i64) -> Result<Self> {
        Self::new(id)
    }
}

impl From<QuadrantId> for u8 {
    fn from(q: QuadrantId) -> u8 {
        q.0
    }
}

impl fmt::Display for QuadrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate a CCD id (1..=16).
pub fn validate_ccd(ccd: i64) -> Result<u8> {
    if (1..=CCD_COUNT as i64).contains(&ccd) {
        Ok(ccd as u8)
    } else {
        Err(DetrendError::InvalidId { what: "ccd", id: ccd })
    }
}

fn check_even(rows: usize, cols: usize) -> Result<(usize, usize)> {
    if rows % 2 != 0 || cols % 2 != 0 {
        return Err(DetrendError::Configuration(format!(
            "cannot split a {rows}x{cols} array into quadrants"
        )));
    }
    Ok((rows / 2, cols / 2))
}

/// Row and column ranges of quadrant `qid` in an array of shape `(rows, cols)`.
pub fn quadrant_bounds(
    (rows, cols): (usize, usize),
    qid: QuadrantId,
) -> Result<((usize, usize), (usize, usize))> {
    let (hr, hc) = check_even(rows, cols)?;
    Ok(match qid.get() {
        1 => ((hr, rows), (hc, cols)),
        2 => ((hr, rows), (0, hc)),
        3 => ((0, hr), (0, hc)),
        _ => ((0, hr), (hc, cols)),
    })
}

/// Borrow one quadrant of a full-CCD array.
pub fn quadrant<'a>(array: &ArrayView2<'a, f32>, qid: QuadrantId) -> Result<ArrayView2<'a, f32>> {
    let ((r0, r1), (c0, c1)) = quadrant_bounds(array.dim(), qid)?;
    Ok(array.clone().slice_move(s![r0..r1, c0..c1]))
}

/// All four quadrants, in id order 1..=4.
pub fn all_quadrants<'a>(array: &ArrayView2<'a, f32>) -> Result<Vec<(QuadrantId, ArrayView2<'a, f32>)>> {
    QuadrantId::ALL
        .iter()
        .map(|&qid| quadrant(array, qid).map(|view| (qid, view)))
        .collect()
}

/// Inverse of [`all_quadrants`]: place four equally-shaped quadrants back
/// into a full-CCD array.
pub fn reassemble(quads: &[(QuadrantId, ArrayView2<'_, f32>)]) -> Result<Array2<f32>> {
    if quads.len() != QUADRANTS_PER_CCD as usize {
        return Err(DetrendError::Configuration(format!(
            "expected 4 quadrants, got {}",
            quads.len()
        )));
    }
    let (hr, hc) = quads[0].1.dim();
    if quads.iter().any(|(_, q)| q.dim() != (hr, hc)) {
        return Err(DetrendError::Configuration(
            "quadrants have mismatched shapes".into(),
        ));
    }

    let shape = (hr * 2, hc * 2);
    let mut full = Array2::<f32>::zeros(shape);
    for (qid, view) in quads {
        let ((r0, r1), (c0, c1)) = quadrant_bounds(shape, *qid)?;
        full.slice_mut(s![r0..r1, c0..c1]).assign(view);
    }
    Ok(full)
}

/// Map a camera-wide raw cell id to `(ccd, quadrant)`.
///
/// Cell ids are one-based and enumerate quadrants CCD by CCD:
/// cell 1 = (ccd 1, q1), cell 4 = (ccd 1, q4), cell 5 = (ccd 2, q1), ...,
/// cell 64 = (ccd 16, q4).
///
/// The valid range is 1..=64 (16 ccds x 4 quadrants), so 17 is a valid
/// cell id (ccd 5, q1) even though it is not a valid ccd id; 0, 65 and
/// negative ids are rejected.
pub fn rawcell_to_ccd_quadrant(cell_id: i64) -> Result<(u8, QuadrantId)> {
    let n_cells = CCD_COUNT as i64 * QUADRANTS_PER_CCD as i64;
    if !(1..=n_cells).contains(&cell_id) {
        return Err(DetrendError::InvalidId {
            what: "raw cell",
            id: cell_id,
        });
    }
    let zero_based = cell_id - 1;
    let ccd = (zero_based / QUADRANTS_PER_CCD as i64) as u8 + 1;
    let qid = QuadrantId((zero_based % QUADRANTS_PER_CCD as i64) as u8 + 1);
    Ok((ccd, qid))
}

/// Inverse of [`rawcell_to_ccd_quadrant`].
pub fn ccd_quadrant_to_rawcell(ccd: i64, qid: i64) -> Result<i64> {
    let ccd = validate_ccd(ccd)?;
    let qid = QuadrantId::new(qid)?;
    Ok((ccd as i64 - 1) * QUADRANTS_PER_CCD as i64 + qid.get() as i64)
}

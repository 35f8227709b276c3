use ndarray::Array2;

use detrend_core::error::DetrendError;
use detrend_core::quadrant::{
    all_quadrants, ccd_quadrant_to_rawcell, quadrant, rawcell_to_ccd_quadrant, reassemble,
    validate_ccd, QuadrantId,
};

fn gradient(h: usize, w: usize) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(r, c)| (r * w + c) as f32)
}

#[test]
fn test_split_and_reassemble() {
    let full = gradient(6, 8);
    let view = full.view();
    let quads = all_quadrants(&view).unwrap();
    assert_eq!(quads.len(), 4);
    for (_, q) in &quads {
        assert_eq!(q.dim(), (3, 4));
    }
    let back = reassemble(&quads).unwrap();
    assert_eq!(back, full);
}

#[test]
fn test_quadrant_layout() {
    let full = gradient(4, 4);
    let view = full.view();
    // Row 0 is the bottom of the CCD.
    let q1 = quadrant(&view, QuadrantId::new(1).unwrap()).unwrap();
    let q2 = quadrant(&view, QuadrantId::new(2).unwrap()).unwrap();
    let q3 = quadrant(&view, QuadrantId::new(3).unwrap()).unwrap();
    let q4 = quadrant(&view, QuadrantId::new(4).unwrap()).unwrap();
    assert_eq!(q1[[0, 0]], full[[2, 2]]);
    assert_eq!(q2[[0, 0]], full[[2, 0]]);
    assert_eq!(q3[[0, 0]], full[[0, 0]]);
    assert_eq!(q4[[0, 0]], full[[0, 2]]);
}

#[test]
fn test_odd_dimensions_rejected() {
    let full = gradient(5, 4);
    let err = all_quadrants(&full.view()).unwrap_err();
    assert!(matches!(err, DetrendError::Configuration(_)));
}

#[test]
fn test_reassemble_needs_four_quadrants() {
    let full = gradient(4, 4);
    let view = full.view();
    let mut quads = all_quadrants(&view).unwrap();
    quads.pop();
    assert!(reassemble(&quads).is_err());
}

#[test]
fn test_rawcell_bijection() {
    for cell in 1..=64 {
        let (ccd, qid) = rawcell_to_ccd_quadrant(cell).unwrap();
        assert!((1..=16).contains(&ccd));
        assert_eq!(ccd_quadrant_to_rawcell(ccd as i64, qid.get() as i64).unwrap(), cell);
    }
    assert_eq!(rawcell_to_ccd_quadrant(1).unwrap(), (1, QuadrantId::new(1).unwrap()));
    assert_eq!(rawcell_to_ccd_quadrant(64).unwrap(), (16, QuadrantId::new(4).unwrap()));
    // A valid cell even though 17 is out of range as a ccd id.
    assert_eq!(rawcell_to_ccd_quadrant(17).unwrap(), (5, QuadrantId::new(1).unwrap()));
}

#[test]
fn test_invalid_ids() {
    for cell in [0, 65, -1] {
        assert!(matches!(
            rawcell_to_ccd_quadrant(cell),
            Err(DetrendError::InvalidId { what: "raw cell", .. })
        ));
    }
    for ccd in [0, 17, -1] {
        assert!(matches!(
            validate_ccd(ccd),
            Err(DetrendError::InvalidId { what: "ccd", .. })
        ));
    }
    assert!(matches!(
        ccd_quadrant_to_rawcell(3, 5),
        Err(DetrendError::InvalidId { what: "quadrant", id: 5 })
    ));
    assert!(QuadrantId::new(0).is_err());
}

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};

use detrend_core::consts::FLAT_HEADER_KEYS;
use detrend_core::error::{DetrendError, Result};
use detrend_core::frame::{FilterBand, Header, RawFrame};
use detrend_core::io::{
    CalibrationRecord, ExposureRecord, FrameLoader, ManifestSource, QuadrantTarget,
};
use detrend_core::science::{Photometer, PhotometryTable};

/// Header carrying every key any master copies from its reference frame.
pub fn full_header() -> Header {
    let mut header = Header::new();
    for key in FLAT_HEADER_KEYS {
        header.set(key, format!("{}-value", key.to_lowercase()));
    }
    header.set_with_comment("EXPTIME", 30.0, "exposure time");
    header
}

/// Header missing one key.
pub fn header_without(key: &str) -> Header {
    let mut header = Header::new();
    for card in full_header().iter().filter(|c| c.key != key) {
        header.set(&card.key, card.value.clone());
    }
    header
}

pub fn raw_frame(data: Array2<f32>, path: &str) -> RawFrame {
    RawFrame::new(data, full_header(), path)
}

pub fn const_frame(h: usize, w: usize, value: f32, path: &str) -> RawFrame {
    raw_frame(Array2::from_elem((h, w), value), path)
}

/// Deterministic pseudo-noise around `base` with amplitude `amp`.
pub fn noisy_array(h: usize, w: usize, base: f32, amp: f32, seed: u64) -> Array2<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Array2::from_shape_fn((h, w), |_| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (state >> 33) as f32 / (1u64 << 31) as f32;
        base + amp * (unit * 2.0 - 1.0)
    })
}

pub fn bias_record(day: &str, ccd: u8, n: usize) -> CalibrationRecord {
    CalibrationRecord {
        obsjd: 2_460_000.0 + n as f64 * 0.001,
        day: day.to_string(),
        ccd,
        led: None,
        path: PathBuf::from(format!("raw/bias_{day}_c{ccd:02}_{n:03}.dtr")),
    }
}

pub fn flat_record(day: &str, ccd: u8, led: i64, n: usize) -> CalibrationRecord {
    CalibrationRecord {
        obsjd: 2_460_000.5 + n as f64 * 0.001,
        day: day.to_string(),
        ccd,
        led: Some(led),
        path: PathBuf::from(format!("raw/flat_{day}_c{ccd:02}_l{led:02}_{n:03}.dtr")),
    }
}

pub fn science_record(day: &str, ccd: u8, filter: FilterBand, expid: i64) -> ExposureRecord {
    ExposureRecord {
        obsjd: 2_460_000.7 + expid as f64 * 0.001,
        day: day.to_string(),
        filter,
        ccd,
        expid,
        path: PathBuf::from(format!("raw/sci_{expid}_c{ccd:02}.dtr")),
    }
}

pub const DAY: &str = "20240115";
pub const CCD: u8 = 3;
pub const SHAPE: (usize, usize) = (8, 8);
pub const BIAS_LEVEL: f32 = 100.0;
pub const FLAT_LEVEL: f32 = 1100.0;
pub const SCIENCE_LEVEL: f32 = 600.0;
pub const EXPIDS: [i64; 3] = [1001, 1002, 1003];

pub fn add_biases(
    manifest: &mut ManifestSource,
    loader: &mut MemoryLoader,
    day: &str,
    n: usize,
    value: f32,
) {
    for i in 0..n {
        let record = bias_record(day, CCD, i);
        loader.insert(&record.path, Array2::from_elem(SHAPE, value));
        manifest.bias.push(record);
    }
}

pub fn add_flats(
    manifest: &mut ManifestSource,
    loader: &mut MemoryLoader,
    day: &str,
    led: i64,
    n: usize,
    value: f32,
) {
    for i in 0..n {
        let record = flat_record(day, CCD, led, i);
        loader.insert(&record.path, Array2::from_elem(SHAPE, value));
        manifest.flat.push(record);
    }
}

pub fn add_science(
    manifest: &mut ManifestSource,
    loader: &mut MemoryLoader,
    day: &str,
    filter: FilterBand,
    expid: i64,
    value: f32,
) {
    let record = science_record(day, CCD, filter, expid);
    loader.insert(&record.path, Array2::from_elem(SHAPE, value));
    manifest.science.push(record);
}

/// One night on one CCD: 13 biases (10 skipped), 5 zr flats, 3 zr exposures.
pub fn standard_night() -> (ManifestSource, MemoryLoader) {
    let mut manifest = ManifestSource::default();
    let mut loader = MemoryLoader::default();
    add_biases(&mut manifest, &mut loader, DAY, 13, BIAS_LEVEL);
    add_flats(&mut manifest, &mut loader, DAY, 7, 5, FLAT_LEVEL);
    for expid in EXPIDS {
        add_science(&mut manifest, &mut loader, DAY, FilterBand::Zr, expid, SCIENCE_LEVEL);
    }
    (manifest, loader)
}

/// Frame loader backed by a map, so no raw files need to exist.
#[derive(Default)]
pub struct MemoryLoader {
    frames: HashMap<PathBuf, RawFrame>,
}

impl MemoryLoader {
    pub fn insert(&mut self, path: &Path, data: Array2<f32>) {
        self.insert_frame(RawFrame::new(data, full_header(), path));
    }

    pub fn insert_frame(&mut self, frame: RawFrame) {
        self.frames.insert(frame.path.clone(), frame);
    }
}

impl FrameLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<RawFrame> {
        self.frames.get(path).cloned().ok_or_else(|| {
            DetrendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such raw frame: {}", path.display()),
            ))
        })
    }
}

/// Photometer returning `rows` empty rows per quadrant, and failing for
/// the listed exposure ids.
pub struct ScriptedPhotometer {
    pub rows: usize,
    pub fail_expids: HashSet<i64>,
}

impl ScriptedPhotometer {
    pub fn new(rows: usize, fail_expids: &[i64]) -> Self {
        Self {
            rows,
            fail_expids: fail_expids.iter().copied().collect(),
        }
    }
}

impl Photometer for ScriptedPhotometer {
    fn measure(
        &self,
        _image: ArrayView2<'_, f32>,
        _mask: Option<ArrayView2<'_, u8>>,
        target: &QuadrantTarget,
        radii: &[f32],
    ) -> Result<PhotometryTable> {
        if self.fail_expids.contains(&target.expid) {
            return Err(DetrendError::Configuration(format!(
                "catalog query failed for exposure {}",
                target.expid
            )));
        }
        let rows = (0..self.rows)
            .map(|i| detrend_core::science::photometry::ApertureRow {
                source_id: i as i64,
                x: 1.0,
                y: 1.0,
                isolated: true,
                flux: vec![0.0; radii.len()],
                flux_err: vec![0.0; radii.len()],
                flag: vec![0; radii.len()],
            })
            .collect();
        Ok(PhotometryTable {
            radii: radii.to_vec(),
            rows,
        })
    }
}

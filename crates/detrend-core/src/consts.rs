/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Standard deviations below this are treated as zero during clipping.
pub const EPSILON: f32 = 1e-10;

/// Number of CCDs on the focal plane.
pub const CCD_COUNT: u8 = 16;

/// Readout quadrants per CCD.
pub const QUADRANTS_PER_CCD: u8 = 4;

/// Default sigma threshold for master-frame combination.
pub const DEFAULT_SIGMA_CLIP: f32 = 3.0;

/// Default number of clipping iterations.
pub const DEFAULT_MAX_ITERS: usize = 1;

/// Leading raw bias frames discarded before combination (readout settling).
pub const DEFAULT_BIAS_SKIP: usize = 10;

/// Groups with this many frames or fewer (after skipping) are dropped.
pub const MIN_GROUP_FRAMES: usize = 2;

/// Overscan columns used for the per-row overscan level.
pub const DEFAULT_OVERSCAN_RANGE: (usize, usize) = (25, 30);

/// Aperture radius range in pixels, matching `linspace(3, 13, 50)`.
pub const DEFAULT_APERTURE_MIN: f32 = 3.0;
pub const DEFAULT_APERTURE_MAX: f32 = 13.0;
pub const DEFAULT_APERTURE_STEPS: usize = 50;

/// Sources with a neighbour closer than this (pixels) are flagged as not isolated.
pub const DEFAULT_ISOLATION_RADIUS: f32 = 20.0;

/// Name stamped into the `PIPELINE` header card.
pub const PIPELINE_NAME: &str = "DETREND";

/// Crate version stamped into `PIPEV` and run reports.
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header keys copied from the reference raw frame into a master bias.
pub const BIAS_HEADER_KEYS: &[&str] = &[
    "ORIGIN", "OBSERVER", "INSTRUME", "IMGTYPE", "EXPTIME", "CCDSUM", "CCD_ID", "CCDNAME",
    "PIXSCALE", "PIXSCALX", "PIXSCALY", "FRAMENUM", "PROGRMID", "OBSERVAT",
];

/// Header keys copied from the reference raw frame into a master flat.
pub const FLAT_HEADER_KEYS: &[&str] = &[
    "ORIGIN", "OBSERVER", "INSTRUME", "IMGTYPE", "EXPTIME", "CCDSUM", "CCD_ID", "CCDNAME",
    "PIXSCALE", "PIXSCALX", "PIXSCALY", "FRAMENUM", "ILUM_LED", "ILUMWAVE", "PROGRMID",
    "FILTERID", "FILTER", "FILTPOS", "RA", "DEC", "OBSERVAT",
];

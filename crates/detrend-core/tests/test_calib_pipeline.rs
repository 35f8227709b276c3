#[allow(dead_code)]
mod common;

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use detrend_core::calib::{CalibContext, CalibParams, CalibrationPipeline, GroupState};
use detrend_core::correct::{CorrectionConfig, CorrectionSet};
use detrend_core::error::DetrendError;
use detrend_core::frame::{CalibrationKind, FilterBand, GroupKey, RawFrame};
use detrend_core::io::{FsArtifactStore, ManifestSource};
use detrend_core::period::Period;

use common::*;

struct Fixture {
    _dir: TempDir,
    store: FsArtifactStore,
    manifest: ManifestSource,
    loader: MemoryLoader,
    corrections: CorrectionSet,
}

impl Fixture {
    fn new(manifest: ManifestSource, loader: MemoryLoader) -> Self {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());
        Self {
            _dir: dir,
            store,
            manifest,
            loader,
            corrections: CorrectionSet::from_config(&CorrectionConfig::none()),
        }
    }

    fn ctx(&self) -> CalibContext<'_> {
        CalibContext {
            metadata: &self.manifest,
            loader: &self.loader,
            store: &self.store,
            corrections: &self.corrections,
        }
    }
}

fn bias_pipeline(period: &str) -> CalibrationPipeline {
    CalibrationPipeline::new(
        CalibrationKind::Bias,
        Period::parse(period).unwrap(),
        CCD,
        CalibParams::bias(),
    )
}

fn flat_pipeline(period: &str) -> CalibrationPipeline {
    CalibrationPipeline::new(
        CalibrationKind::Flat,
        Period::parse(period).unwrap(),
        CCD,
        CalibParams::flat(),
    )
}

#[test]
fn test_bias_build_then_reuse() {
    let (manifest, loader) = standard_night();
    let fx = Fixture::new(manifest, loader);

    let mut first = bias_pipeline(DAY);
    let summary = first.build_all(fx.ctx(), false, None).unwrap();
    assert_eq!(summary.combined, 1);
    assert_eq!(summary.loaded, 0);
    assert_eq!(first.combinations(), 1);

    let master = first.get_master(DAY, CCD, None).unwrap();
    assert_abs_diff_eq!(master.data[[3, 3]], BIAS_LEVEL, epsilon = 1e-4);
    assert_eq!(master.header.get("NFRAMES").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(master.header.get("IMGTYPE").and_then(|v| v.as_str()), Some("bias"));
    assert_eq!(master.header.get("PERIOD").and_then(|v| v.as_str()), Some(DAY));
    assert_eq!(master.header.get("PTYPE").and_then(|v| v.as_str()), Some("daily"));
    assert_eq!(master.header.get("CCDID").and_then(|v| v.as_i64()), Some(CCD as i64));
    assert_eq!(master.header.get("PIPELINE").and_then(|v| v.as_str()), Some("DETREND"));
    assert!(master.path.as_ref().unwrap().is_file());

    // A second pipeline finds the artifact and never runs the engine.
    let mut second = bias_pipeline(DAY);
    let summary = second.build_all(fx.ctx(), false, None).unwrap();
    assert_eq!(summary.combined, 0);
    assert_eq!(summary.loaded, 1);
    assert_eq!(second.combinations(), 0);
    let reloaded = second.get_master(DAY, CCD, None).unwrap();
    assert_eq!(reloaded.data, master.data);
    assert_eq!(reloaded.header.get("NFRAMES"), master.header.get("NFRAMES"));
}

#[test]
fn test_reprocess_rebuilds() {
    let (manifest, loader) = standard_night();
    let mut fx = Fixture::new(manifest, loader);

    let mut first = bias_pipeline(DAY);
    first.build_all(fx.ctx(), false, None).unwrap();

    // Raw data changes; only a reprocess picks it up.
    fx.loader = MemoryLoader::default();
    fx.manifest = ManifestSource::default();
    add_biases(&mut fx.manifest, &mut fx.loader, DAY, 13, 120.0);

    let mut stale = bias_pipeline(DAY);
    stale.build_all(fx.ctx(), false, None).unwrap();
    assert_abs_diff_eq!(
        stale.get_master(DAY, CCD, None).unwrap().data[[0, 0]],
        BIAS_LEVEL,
        epsilon = 1e-4
    );

    let mut fresh = bias_pipeline(DAY);
    let summary = fresh.build_all(fx.ctx(), true, None).unwrap();
    assert_eq!(summary.combined, 1);
    assert_eq!(fresh.combinations(), 1);
    assert_abs_diff_eq!(
        fresh.get_master(DAY, CCD, None).unwrap().data[[0, 0]],
        120.0,
        epsilon = 1e-4
    );
}

#[test]
fn test_master_not_built() {
    let pipeline = bias_pipeline(DAY);
    let err = pipeline.get_master(DAY, CCD, None).unwrap_err();
    match err {
        DetrendError::NotBuilt { key } => assert_eq!(key, "bias 20240115/c03"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        pipeline.state(&GroupKey::new(DAY, CCD)),
        GroupState::Unbuilt
    ));
}

#[test]
fn test_flat_normalised_and_bias_subtracted() {
    let (manifest, loader) = standard_night();
    let fx = Fixture::new(manifest, loader);

    let mut bias = bias_pipeline(DAY);
    bias.build_all(fx.ctx(), false, None).unwrap();
    let mut flat = flat_pipeline(DAY);
    let summary = flat.build_all(fx.ctx(), false, Some(&bias)).unwrap();
    assert!(summary.is_success());
    assert_eq!(flat.built_filters(), vec![FilterBand::Zr]);

    let master = flat.get_master("2024-01-15", CCD, Some(FilterBand::Zr)).unwrap();
    for &v in master.data.iter() {
        assert_abs_diff_eq!(v, 1.0, epsilon = 1e-5);
    }
    let header = &master.header;
    let norm = header.get("FLTNORM").and_then(|v| v.as_f64()).unwrap();
    assert!((norm - (FLAT_LEVEL - BIAS_LEVEL) as f64).abs() < 1e-2);
    assert_eq!(header.get("ILUM_LED").and_then(|v| v.as_str()), Some("7"));
    assert_eq!(header.get("FILTER").and_then(|v| v.as_str()), Some("zr"));
    assert_eq!(header.get("IMGTYPE").and_then(|v| v.as_str()), Some("flat"));
    assert_eq!(
        header.get("BIASFILE").and_then(|v| v.as_str()),
        Some("detrend_20240115_000000_bi_c03_bias.dtr")
    );

    assert!(matches!(
        flat.get_master(DAY, CCD, Some(FilterBand::Zg)),
        Err(DetrendError::NotBuilt { .. })
    ));
}

#[test]
fn test_flat_without_bias_master_fails_group() {
    let (manifest, loader) = standard_night();
    let fx = Fixture::new(manifest, loader);

    let bias = bias_pipeline(DAY);
    let mut flat = flat_pipeline(DAY);
    let summary = flat.build_all(fx.ctx(), false, Some(&bias)).unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert!(matches!(summary.failed[0].1, DetrendError::NotBuilt { .. }));
    assert!(matches!(
        flat.state(&GroupKey::new(DAY, CCD).with_filter(FilterBand::Zr)),
        GroupState::Failed(_)
    ));
}

#[test]
fn test_unknown_led_rejected() {
    let (mut manifest, mut loader) = standard_night();
    add_flats(&mut manifest, &mut loader, DAY, 99, 3, FLAT_LEVEL);
    let fx = Fixture::new(manifest, loader);

    let mut flat = flat_pipeline(DAY);
    let err = flat.build_all(fx.ctx(), false, None).unwrap_err();
    assert!(matches!(err, DetrendError::UnknownIllumination(99)));
}

#[test]
fn test_failed_group_is_isolated() {
    let (mut manifest, mut loader) = standard_night();
    // Second night: every frame lacks a provenance key.
    for i in 0..13 {
        let record = bias_record("20240116", CCD, i);
        loader.insert_frame(RawFrame::new(
            ndarray::Array2::from_elem(SHAPE, BIAS_LEVEL),
            header_without("CCDNAME"),
            record.path.clone(),
        ));
        manifest.bias.push(record);
    }
    let fx = Fixture::new(manifest, loader);

    let mut bias = bias_pipeline("20240115..20240117");
    let summary = bias.build_all(fx.ctx(), false, None).unwrap();
    assert_eq!(summary.combined, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, GroupKey::new("20240116", CCD));
    assert!(matches!(
        summary.failed[0].1,
        DetrendError::MissingHeaderKey { ref key, .. } if key == "CCDNAME"
    ));

    assert!(bias.get_master(DAY, CCD, None).is_ok());
    assert!(matches!(
        bias.state(&GroupKey::new("20240116", CCD)),
        GroupState::Failed(_)
    ));
    assert!(summary.into_result().is_err());
}

#[test]
fn test_small_groups_dropped() {
    let mut manifest = ManifestSource::default();
    let mut loader = MemoryLoader::default();
    // 12 raw frames leave 2 after the warm-up skip.
    add_biases(&mut manifest, &mut loader, DAY, 12, BIAS_LEVEL);
    let fx = Fixture::new(manifest, loader);

    let mut bias = bias_pipeline(DAY);
    let summary = bias.build_all(fx.ctx(), false, None).unwrap();
    assert_eq!(summary.dropped, vec![GroupKey::new(DAY, CCD)]);
    assert_eq!(summary.combined, 0);
    assert!(summary.is_success());
    assert_eq!(bias.combinations(), 0);
    assert!(bias.get_master(DAY, CCD, None).is_err());
}

#[test]
fn test_sequential_matches_parallel() {
    let (manifest, loader) = standard_night();
    let fx = Fixture::new(manifest, loader);

    let mut bias = bias_pipeline(DAY).with_parallel(false);
    let summary = bias.build_all(fx.ctx(), false, None).unwrap();
    assert_eq!(summary.combined, 1);
    assert_eq!(bias.kind(), CalibrationKind::Bias);
    assert_eq!(bias.ccd(), CCD);
}

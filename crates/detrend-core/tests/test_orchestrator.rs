#[allow(dead_code)]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use detrend_core::correct::CorrectionConfig;
use detrend_core::error::DetrendError;
use detrend_core::io::{FsArtifactStore, ManifestSource};
use detrend_core::period::Period;
use detrend_core::pipeline::{
    DayOrchestrator, ExposureStatus, ProgressReporter, RunConfig, RunOptions, RunStage,
};

use common::*;

fn test_config(store: &TempDir) -> RunConfig {
    RunConfig {
        store_root: store.path().to_path_buf(),
        corrections: CorrectionConfig::none(),
        ..RunConfig::default()
    }
}

#[derive(Default)]
struct CountingReporter {
    science_total: AtomicUsize,
    last_done: AtomicUsize,
}

impl ProgressReporter for CountingReporter {
    fn begin_stage(&self, stage: RunStage, total_items: Option<usize>) {
        if stage == RunStage::Science {
            self.science_total.store(total_items.unwrap_or(0), Ordering::SeqCst);
        }
    }

    fn advance(&self, items_done: usize) {
        self.last_done.fetch_max(items_done, Ordering::SeqCst);
    }
}

fn run_with_failure(parallel: bool) {
    let store_dir = TempDir::new().unwrap();
    let stats_dir = TempDir::new().unwrap();
    let config = test_config(&store_dir);
    let store = FsArtifactStore::new(&config.store_root);
    let (manifest, loader) = standard_night();
    let photometer = ScriptedPhotometer::new(2, &[EXPIDS[1]]);
    let reporter = Arc::new(CountingReporter::default());

    let orchestrator = DayOrchestrator::new(&config, &manifest, &loader, &store)
        .with_photometer(&photometer)
        .with_reporter(reporter.clone());
    let options = RunOptions {
        parallel,
        statsdir: Some(stats_dir.path().to_path_buf()),
        ..RunOptions::default()
    };
    let stats = orchestrator.run("2024-01-15", CCD as i64, &options).unwrap();

    assert_eq!(stats.day, DAY);
    assert_eq!(stats.science.len(), 1);
    let group = &stats.science[0];
    assert_eq!(group.nfiles, 3);
    let statuses: Vec<_> = group.files.iter().map(|f| (f.expid, f.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (EXPIDS[0], ExposureStatus::Ok),
            (EXPIDS[1], ExposureStatus::Error),
            (EXPIDS[2], ExposureStatus::Ok),
        ]
    );
    assert_eq!(stats.n_exposures(), 3);
    assert_eq!(stats.n_errors, 1);
    assert_eq!(stats.count_errors(), 1);
    assert!(!stats.is_success());

    let failed = &group.files[1];
    assert!(failed.error_msg.contains("catalog query failed for exposure 1002"));
    assert!(failed.quads.is_empty());
    let ok = &group.files[0];
    assert_eq!(ok.quads.len(), 4);
    assert_eq!(ok.quads["quad_2"].naper, 2);
    assert!(ok.quads["quad_2"].file.ends_with("detrend_1001_zr_c03_o2_aper.json"));

    assert_eq!(reporter.science_total.load(Ordering::SeqCst), 3);
    assert_eq!(reporter.last_done.load(Ordering::SeqCst), 3);

    let report_path = stats.report_path.clone().unwrap();
    let name = report_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("stats_20240115_3_"));
    assert!(name.ends_with(".json"));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["day"], "20240115");
    assert_eq!(report["ccd"], 3);
    assert_eq!(report["n_errors"], 1);
    let files = report["science"][0]["files"].as_array().unwrap();
    assert_eq!(files[1]["status"], "error");
    assert!(files[1]["error_msg"].as_str().unwrap().contains("1002"));
    assert_eq!(files[0]["status"], "ok");
    assert_eq!(files[0]["error_msg"], "");
    assert_eq!(files[0]["quad_1"]["quad"], 1);
    assert!(report["total_time"].as_f64().unwrap() >= 0.0);
}

#[test]
fn test_failed_exposure_isolated_sequential() {
    run_with_failure(false);
}

#[test]
fn test_failed_exposure_isolated_parallel() {
    run_with_failure(true);
}

#[test]
fn test_science_output_values() {
    let store_dir = TempDir::new().unwrap();
    let config = test_config(&store_dir);
    let store = FsArtifactStore::new(&config.store_root);
    let (manifest, loader) = standard_night();

    let orchestrator = DayOrchestrator::new(&config, &manifest, &loader, &store);
    let stats = orchestrator.run(DAY, CCD as i64, &RunOptions::default()).unwrap();
    assert!(stats.is_success());
    assert_eq!(stats.n_errors, 0);
    assert!(stats.report_path.is_none());

    let path = store_dir
        .path()
        .join("sci/2024/0115/detrend_1003_zr_c03_o4_sciimg.dtr");
    let mut artifact = detrend_core::io::read_artifact(&path).unwrap();
    let image = artifact.take_image().unwrap();
    assert!(image.iter().all(|&v| (v - (SCIENCE_LEVEL - BIAS_LEVEL)).abs() < 1e-3));
}

#[test]
fn test_rerun_reuses_masters() {
    let store_dir = TempDir::new().unwrap();
    let config = test_config(&store_dir);
    let store = FsArtifactStore::new(&config.store_root);
    let (manifest, loader) = standard_night();
    let orchestrator = DayOrchestrator::new(&config, &manifest, &loader, &store);
    let period = Period::parse(DAY).unwrap();

    let first = orchestrator.calibrate(&period, CCD, &RunOptions::default()).unwrap();
    assert_eq!(first.bias_summary.combined, 1);
    assert_eq!(first.flat_summary.combined, 1);

    let second = orchestrator.calibrate(&period, CCD, &RunOptions::default()).unwrap();
    assert_eq!(second.bias_summary.loaded, 1);
    assert_eq!(second.flat_summary.loaded, 1);
    assert_eq!(second.bias.combinations() + second.flat.combinations(), 0);

    let forced = RunOptions {
        force: true,
        ..RunOptions::default()
    };
    let third = orchestrator.calibrate(&period, CCD, &forced).unwrap();
    assert_eq!(third.bias_summary.combined, 1);
    assert_eq!(third.flat_summary.combined, 1);
}

#[test]
fn test_missing_flat_is_fatal() {
    let store_dir = TempDir::new().unwrap();
    let config = test_config(&store_dir);
    let store = FsArtifactStore::new(&config.store_root);
    let mut manifest = ManifestSource::default();
    let mut loader = MemoryLoader::default();
    add_biases(&mut manifest, &mut loader, DAY, 13, BIAS_LEVEL);
    add_science(
        &mut manifest,
        &mut loader,
        DAY,
        detrend_core::frame::FilterBand::Zg,
        2001,
        SCIENCE_LEVEL,
    );

    let photometer = ScriptedPhotometer::new(0, &[]);
    let orchestrator =
        DayOrchestrator::new(&config, &manifest, &loader, &store).with_photometer(&photometer);
    let err = orchestrator.run(DAY, CCD as i64, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, DetrendError::NotBuilt { ref key } if key.starts_with("flat")));
    // Nothing reached the science stage.
    assert!(!store_dir.path().join("sci").exists());
}

#[test]
fn test_invalid_ccd_rejected() {
    let store_dir = TempDir::new().unwrap();
    let config = test_config(&store_dir);
    let store = FsArtifactStore::new(&config.store_root);
    let (manifest, loader) = standard_night();
    let orchestrator = DayOrchestrator::new(&config, &manifest, &loader, &store);

    for ccd in [0, 17] {
        let err = orchestrator.run(DAY, ccd, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, DetrendError::InvalidId { what: "ccd", .. }));
    }
}

#[test]
fn test_calibration_run_isolates_ccds() {
    let store_dir = TempDir::new().unwrap();
    let stats_dir = TempDir::new().unwrap();
    let config = test_config(&store_dir);
    let store = FsArtifactStore::new(&config.store_root);
    let (mut manifest, mut loader) = standard_night();
    // ccd 5 has a flat lit by an LED no filter owns.
    for i in 0..3 {
        let record = flat_record(DAY, 5, 99, i);
        loader.insert(&record.path, ndarray::Array2::from_elem(SHAPE, FLAT_LEVEL));
        manifest.flat.push(record);
    }

    let orchestrator = DayOrchestrator::new(&config, &manifest, &loader, &store);
    let options = RunOptions {
        statsdir: Some(stats_dir.path().to_path_buf()),
        ..RunOptions::default()
    };
    let stats = orchestrator
        .run_calibration(&Period::parse(DAY).unwrap(), &[5, CCD], &options)
        .unwrap();

    assert_eq!(stats.ccds.len(), 2);
    assert!(!stats.ccds[0].is_ok());
    assert!(stats.ccds[0].error_msg.contains("99"));
    assert!(stats.ccds[1].is_ok());
    assert_eq!(stats.ccds[1].bias.combined, 1);
    assert_eq!(stats.ccds[1].flat.combined, 1);
    assert_eq!(stats.n_errors, 1);
    assert!(!stats.is_success());

    let report_path = stats.report_path.as_ref().unwrap();
    let name = report_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("calib_stats_20240115_"));
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["n_errors"], 1);
    assert_eq!(report["ccds"][1]["status"], "ok");
}

#[test]
fn test_unsafe_suffix_rejected_before_processing() {
    let store_dir = TempDir::new().unwrap();
    let mut config = test_config(&store_dir);
    config.science.suffix = Some("../escape".into());
    let store = FsArtifactStore::new(&config.store_root);
    let (manifest, loader) = standard_night();

    let orchestrator = DayOrchestrator::new(&config, &manifest, &loader, &store);
    let err = orchestrator.run(DAY, CCD as i64, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, DetrendError::Configuration(_)));
    assert!(!store_dir.path().join("cal").exists());
}

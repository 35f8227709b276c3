pub mod calib;
pub mod config;
pub mod info;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use detrend_core::io::ManifestSource;
use detrend_core::pipeline::RunConfig;

/// Load the run config, falling back to defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

/// Apply the store and manifest overrides shared by `run` and `calib`.
pub fn apply_paths(config: &mut RunConfig, store: Option<&PathBuf>, manifest: Option<&PathBuf>) {
    if let Some(store) = store {
        config.store_root = store.clone();
    }
    if let Some(manifest) = manifest {
        config.manifest = Some(manifest.clone());
    }
}

pub fn open_manifest(config: &RunConfig) -> Result<ManifestSource> {
    let path = config
        .manifest
        .as_ref()
        .context("No raw metadata manifest: pass --manifest or set `manifest` in the config")?;
    ManifestSource::from_file(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))
}

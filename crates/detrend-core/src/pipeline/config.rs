use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::calib::CalibParams;
use crate::correct::CorrectionConfig;
use crate::error::{DetrendError, Result};
use crate::science::{PhotometryParams, ScienceParams};

/// Everything a run needs, loadable from TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root directory of the artifact store.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    /// JSON manifest describing the raw exposures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(default = "CalibParams::bias")]
    pub bias: CalibParams,
    #[serde(default = "CalibParams::flat")]
    pub flat: CalibParams,
    /// Shared by bias, flat and science so all three see identical corrections.
    #[serde(default)]
    pub corrections: CorrectionConfig,
    #[serde(default)]
    pub science: ScienceParams,
    #[serde(default)]
    pub photometry: PhotometryParams,
}

fn default_store_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            manifest: None,
            bias: CalibParams::bias(),
            flat: CalibParams::flat(),
            corrections: CorrectionConfig::default(),
            science: ScienceParams::default(),
            photometry: PhotometryParams::default(),
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DetrendError::Configuration(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DetrendError::Configuration(e.to_string()))
    }
}

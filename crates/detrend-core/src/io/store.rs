//! Artifact store: maps logical artifact keys to files and hands out
//! per-key build locks.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{DetrendError, Result};
use crate::frame::{CalibrationKind, FilterBand, GroupKey};
use crate::quadrant::QuadrantId;

use super::artifact::{read_artifact, save_artifact, Artifact};

/// One science quadrant: the unit of science output and photometry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuadrantTarget {
    pub day: String,
    pub expid: i64,
    pub filter: FilterBand,
    pub ccd: u8,
    pub qid: QuadrantId,
}

/// Logical name of anything the pipeline persists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    Master {
        kind: CalibrationKind,
        group: GroupKey,
    },
    Science {
        target: QuadrantTarget,
        suffix: Option<String>,
    },
    /// Externally produced quadrant mask living next to the science image.
    Mask { target: QuadrantTarget },
    Photometry {
        target: QuadrantTarget,
        suffix: Option<String>,
    },
}

impl ArtifactKey {
    pub fn master(kind: CalibrationKind, group: GroupKey) -> Self {
        Self::Master { kind, group }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master { kind, group } => write!(f, "{kind} {group}"),
            Self::Science { target, .. } => {
                write!(f, "science {} c{:02} q{}", target.expid, target.ccd, target.qid)
            }
            Self::Mask { target } => {
                write!(f, "mask {} c{:02} q{}", target.expid, target.ccd, target.qid)
            }
            Self::Photometry { target, .. } => {
                write!(f, "photometry {} c{:02} q{}", target.expid, target.ccd, target.qid)
            }
        }
    }
}

/// Persistence boundary for masters, science quadrants, masks and tables.
pub trait ArtifactStore: Send + Sync {
    /// Deterministic location of an artifact.
    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf>;

    /// Lock held by whoever decides to build an artifact, so at most one
    /// builder runs per key. [`ArtifactStore::write`] does not take it.
    fn key_lock(&self, key: &ArtifactKey) -> Result<Arc<Mutex<()>>>;

    fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn read(&self, key: &ArtifactKey) -> Result<Artifact> {
        let path = self.path_for(key)?;
        read_artifact(&path)
    }

    /// Write an artifact, refusing to replace an existing one unless
    /// `overwrite` is set. Returns the final path.
    fn write(&self, key: &ArtifactKey, artifact: &Artifact, overwrite: bool) -> Result<PathBuf> {
        let path = self.path_for(key)?;
        save_artifact(&path, artifact, overwrite)?;
        debug!(key = %key, path = %path.display(), "artifact written");
        Ok(path)
    }

    /// Write an opaque byte payload (photometry tables), with the same
    /// atomic create semantics as [`ArtifactStore::write`].
    fn write_bytes(&self, key: &ArtifactKey, bytes: &[u8], overwrite: bool) -> Result<PathBuf> {
        let path = self.path_for(key)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        if overwrite {
            tmp.persist(&path).map_err(|e| DetrendError::Io(e.error))?;
        } else {
            tmp.persist_noclobber(&path).map_err(|e| {
                if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    DetrendError::ArtifactExists(path.clone())
                } else {
                    DetrendError::Io(e.error)
                }
            })?;
        }
        Ok(path)
    }
}

/// Directory-tree store rooted at `root`.
pub struct FsArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of per-key locks currently tracked.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Split a compact period label into the directory levels used on disk:
/// `YYYYMMDD` -> `YYYY/MMDD`, `YYYYWWW` -> `YYYY/WWW`, `YYYYMM` -> `YYYY/MM`.
fn period_dirs(label: &str) -> Result<PathBuf> {
    if label.is_empty() || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(DetrendError::InvalidPeriod(label.to_string()));
    }
    let all_digits = label.chars().all(|c| c.is_ascii_digit());
    Ok(match label.len() {
        6..=8 if all_digits => Path::new(&label[..4]).join(&label[4..]),
        _ => PathBuf::from(label),
    })
}

/// Output suffixes end up in file names: ASCII letters, digits, `-`, `_`
/// and `.` only.
pub fn validate_suffix(suffix: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if suffix.chars().all(allowed) {
        Ok(())
    } else {
        Err(DetrendError::Configuration(format!(
            "invalid output suffix '{suffix}'"
        )))
    }
}

fn suffix_part(suffix: &Option<String>) -> Result<String> {
    match suffix.as_deref() {
        Some(s) if !s.is_empty() => {
            validate_suffix(s)?;
            Ok(format!("_{s}"))
        }
        _ => Ok(String::new()),
    }
}

fn quadrant_stem(t: &QuadrantTarget) -> String {
    format!(
        "detrend_{}_{}_c{:02}_o{}",
        t.expid,
        t.filter.code(),
        t.ccd,
        t.qid.get()
    )
}

impl ArtifactStore for FsArtifactStore {
    fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf> {
        Ok(match key {
            ArtifactKey::Master { kind, group } => {
                let dir = self
                    .root
                    .join("cal")
                    .join(kind.as_str())
                    .join(period_dirs(&group.period)?);
                let name = match (kind, group.filter) {
                    (CalibrationKind::Bias, _) => format!(
                        "detrend_{}_000000_bi_c{:02}_bias.dtr",
                        group.period, group.ccd
                    ),
                    (CalibrationKind::Flat, Some(filter)) => format!(
                        "detrend_{}_000000_{}_c{:02}_l00_flat.dtr",
                        group.period,
                        filter.code(),
                        group.ccd
                    ),
                    (CalibrationKind::Flat, None) => {
                        return Err(DetrendError::Configuration(format!(
                            "flat artifact key {group} has no filter"
                        )))
                    }
                };
                dir.join(name)
            }
            ArtifactKey::Science { target, suffix } => self
                .root
                .join("sci")
                .join(period_dirs(&target.day)?)
                .join(format!("{}_sciimg{}.dtr", quadrant_stem(target), suffix_part(suffix)?)),
            ArtifactKey::Mask { target } => self
                .root
                .join("sci")
                .join(period_dirs(&target.day)?)
                .join(format!("{}_mskimg.dtr", quadrant_stem(target))),
            ArtifactKey::Photometry { target, suffix } => self
                .root
                .join("sci")
                .join(period_dirs(&target.day)?)
                .join(format!("{}_aper{}.json", quadrant_stem(target), suffix_part(suffix)?)),
        })
    }

    fn key_lock(&self, key: &ArtifactKey) -> Result<Arc<Mutex<()>>> {
        let path = self.path_for(key)?;
        let mut locks = self.locks.lock();
        // Entries only the map still references are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks.entry(path).or_default().clone())
    }
}

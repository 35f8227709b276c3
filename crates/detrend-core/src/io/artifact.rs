//! Self-describing binary artifact: a header plus one or more named 2D planes.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic        8 bytes  "DTRNDART"
//! version      u16
//! header_len   u32      followed by header_len bytes of JSON cards
//! plane_count  u16
//! per plane:
//!   name_len   u16      followed by name_len bytes of UTF-8
//!   dtype      u8       1 = f32, 2 = u8
//!   rows       u32
//!   cols       u32
//!   data       rows * cols * sizeof(dtype) bytes, row-major
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;
use tempfile::NamedTempFile;

use crate::error::{DetrendError, Result};
use crate::frame::Header;

pub const ARTIFACT_MAGIC: &[u8; 8] = b"DTRNDART";
pub const ARTIFACT_VERSION: u16 = 1;

/// Smallest possible artifact: magic, version, empty header length, plane count.
const MIN_ARTIFACT_SIZE: usize = 8 + 2 + 4 + 2;

const DTYPE_F32: u8 = 1;
const DTYPE_U8: u8 = 2;

/// Name of the main image plane.
pub const DATA_PLANE: &str = "data";
/// Name of the optional overscan plane of raw frames.
pub const OVERSCAN_PLANE: &str = "overscan";
/// Name of the plane holding a quadrant mask.
pub const MASK_PLANE: &str = "mask";

#[derive(Clone, Debug, PartialEq)]
pub enum PlaneData {
    F32(Array2<f32>),
    U8(Array2<u8>),
}

impl PlaneData {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::F32(a) => a.dim(),
            Self::U8(a) => a.dim(),
        }
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Self::F32(_) => "f32",
            Self::U8(_) => "u8",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Plane {
    pub name: String,
    pub data: PlaneData,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Artifact {
    pub header: Header,
    pub planes: Vec<Plane>,
}

impl Artifact {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            planes: Vec::new(),
        }
    }

    /// Single-plane artifact holding an image under [`DATA_PLANE`].
    pub fn image(data: Array2<f32>, header: Header) -> Self {
        Self::new(header).with_f32(DATA_PLANE, data)
    }

    pub fn with_f32(mut self, name: &str, data: Array2<f32>) -> Self {
        self.planes.push(Plane {
            name: name.to_string(),
            data: PlaneData::F32(data),
        });
        self
    }

    pub fn with_u8(mut self, name: &str, data: Array2<u8>) -> Self {
        self.planes.push(Plane {
            name: name.to_string(),
            data: PlaneData::U8(data),
        });
        self
    }

    pub fn plane(&self, name: &str) -> Option<&PlaneData> {
        self.planes.iter().find(|p| p.name == name).map(|p| &p.data)
    }

    /// Remove and return a float plane.
    pub fn take_f32(&mut self, name: &str) -> Option<Array2<f32>> {
        let idx = self
            .planes
            .iter()
            .position(|p| p.name == name && matches!(p.data, PlaneData::F32(_)))?;
        match self.planes.remove(idx).data {
            PlaneData::F32(a) => Some(a),
            PlaneData::U8(_) => None,
        }
    }

    /// Remove and return the main image plane, failing if it is absent.
    pub fn take_image(&mut self) -> Result<Array2<f32>> {
        self.take_f32(DATA_PLANE).ok_or_else(|| {
            DetrendError::InvalidArtifact(format!("no f32 '{DATA_PLANE}' plane"))
        })
    }
}

/// Encode an artifact into any writer.
pub fn write_artifact(w: &mut impl Write, artifact: &Artifact) -> Result<()> {
    w.write_all(ARTIFACT_MAGIC)?;
    w.write_u16::<LittleEndian>(ARTIFACT_VERSION)?;

    let header_json = serde_json::to_vec(&artifact.header)?;
    w.write_u32::<LittleEndian>(header_json.len() as u32)?;
    w.write_all(&header_json)?;

    w.write_u16::<LittleEndian>(artifact.planes.len() as u16)?;
    for plane in &artifact.planes {
        let name = plane.name.as_bytes();
        w.write_u16::<LittleEndian>(name.len() as u16)?;
        w.write_all(name)?;
        let (rows, cols) = plane.data.dim();
        match &plane.data {
            PlaneData::F32(a) => {
                w.write_u8(DTYPE_F32)?;
                w.write_u32::<LittleEndian>(rows as u32)?;
                w.write_u32::<LittleEndian>(cols as u32)?;
                for &v in a.iter() {
                    w.write_f32::<LittleEndian>(v)?;
                }
            }
            PlaneData::U8(a) => {
                w.write_u8(DTYPE_U8)?;
                w.write_u32::<LittleEndian>(rows as u32)?;
                w.write_u32::<LittleEndian>(cols as u32)?;
                for &v in a.iter() {
                    w.write_u8(v)?;
                }
            }
        }
    }
    Ok(())
}

fn truncated(what: &str) -> DetrendError {
    DetrendError::InvalidArtifact(format!("truncated while reading {what}"))
}

/// Fail unless `len` items of `item_size` bytes remain after the cursor.
fn ensure_remaining(cur: &Cursor<&[u8]>, len: usize, item_size: usize, what: &str) -> Result<()> {
    let remaining = (cur.get_ref().len() as u64).saturating_sub(cur.position());
    match len.checked_mul(item_size) {
        Some(needed) if needed as u64 <= remaining => Ok(()),
        _ => Err(truncated(what)),
    }
}

/// Decode an artifact from an in-memory buffer.
pub fn decode_artifact(bytes: &[u8]) -> Result<Artifact> {
    if bytes.len() < MIN_ARTIFACT_SIZE {
        return Err(DetrendError::InvalidArtifact(
            "file too small for artifact header".into(),
        ));
    }
    if &bytes[..8] != ARTIFACT_MAGIC {
        return Err(DetrendError::InvalidArtifact("missing DTRNDART magic".into()));
    }

    let mut cur = Cursor::new(&bytes[8..]);
    let version = cur.read_u16::<LittleEndian>().map_err(|_| truncated("version"))?;
    if version != ARTIFACT_VERSION {
        return Err(DetrendError::InvalidArtifact(format!(
            "unsupported artifact version {version}"
        )));
    }

    let header_len = cur.read_u32::<LittleEndian>().map_err(|_| truncated("header"))? as usize;
    ensure_remaining(&cur, header_len, 1, "header")?;
    let mut header_json = vec![0u8; header_len];
    cur.read_exact(&mut header_json)
        .map_err(|_| truncated("header"))?;
    let header: Header = serde_json::from_slice(&header_json)?;

    let plane_count = cur.read_u16::<LittleEndian>().map_err(|_| truncated("planes"))?;
    let mut planes = Vec::new();
    for _ in 0..plane_count {
        let name_len = cur.read_u16::<LittleEndian>().map_err(|_| truncated("plane name"))?;
        ensure_remaining(&cur, name_len as usize, 1, "plane name")?;
        let mut name = vec![0u8; name_len as usize];
        cur.read_exact(&mut name).map_err(|_| truncated("plane name"))?;
        let name = String::from_utf8(name)
            .map_err(|_| DetrendError::InvalidArtifact("plane name is not UTF-8".into()))?;

        let dtype = cur.read_u8().map_err(|_| truncated("plane dtype"))?;
        let rows = cur.read_u32::<LittleEndian>().map_err(|_| truncated("plane shape"))? as usize;
        let cols = cur.read_u32::<LittleEndian>().map_err(|_| truncated("plane shape"))? as usize;
        let count = rows
            .checked_mul(cols)
            .ok_or_else(|| DetrendError::InvalidArtifact("plane shape overflow".into()))?;

        let data = match dtype {
            DTYPE_F32 => {
                ensure_remaining(&cur, count, std::mem::size_of::<f32>(), &name)?;
                let mut values = vec![0.0f32; count];
                cur.read_f32_into::<LittleEndian>(&mut values)
                    .map_err(|_| truncated(&name))?;
                PlaneData::F32(
                    Array2::from_shape_vec((rows, cols), values)
                        .map_err(|e| DetrendError::InvalidArtifact(e.to_string()))?,
                )
            }
            DTYPE_U8 => {
                ensure_remaining(&cur, count, 1, &name)?;
                let mut values = vec![0u8; count];
                cur.read_exact(&mut values).map_err(|_| truncated(&name))?;
                PlaneData::U8(
                    Array2::from_shape_vec((rows, cols), values)
                        .map_err(|e| DetrendError::InvalidArtifact(e.to_string()))?,
                )
            }
            other => {
                return Err(DetrendError::InvalidArtifact(format!(
                    "unknown dtype code {other} for plane '{name}'"
                )))
            }
        };
        planes.push(Plane { name, data });
    }

    Ok(Artifact { header, planes })
}

/// Memory-map and decode an artifact file.
pub fn read_artifact(path: &Path) -> Result<Artifact> {
    let file = File::open(path)?;
    if (file.metadata()?.len() as usize) < MIN_ARTIFACT_SIZE {
        return Err(DetrendError::InvalidArtifact(format!(
            "{} is too small to be an artifact",
            path.display()
        )));
    }
    let mmap = unsafe { Mmap::map(&file)? };
    decode_artifact(&mmap)
}

/// Write an artifact atomically.
///
/// The bytes go to a temporary file in the destination directory which is
/// then renamed into place. With `overwrite == false` the rename refuses to
/// replace an existing file, so the existence check and the create are one
/// atomic step.
pub fn save_artifact(path: &Path, artifact: &Artifact, overwrite: bool) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write_artifact(&mut writer, artifact)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;

    if overwrite {
        tmp.persist(path).map_err(|e| DetrendError::Io(e.error))?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                DetrendError::ArtifactExists(path.to_path_buf())
            } else {
                DetrendError::Io(e.error)
            }
        })?;
    }
    Ok(())
}

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DetrendError, Result};

/// A single header value. Serialized untagged so headers read naturally as
/// JSON; non-finite floats, which JSON cannot hold, become `{"float": "nan"}`.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Serialize, Deserialize)]
struct NonFiniteFloat {
    float: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValueRepr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    NonFinite(NonFiniteFloat),
}

impl Serialize for HeaderValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(f) => {
                let name = if f.is_nan() {
                    "nan"
                } else if *f > 0.0 {
                    "inf"
                } else {
                    "-inf"
                };
                NonFiniteFloat { float: name.into() }.serialize(serializer)
            }
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for HeaderValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match HeaderValueRepr::deserialize(deserializer)? {
            HeaderValueRepr::Bool(b) => Self::Bool(b),
            HeaderValueRepr::Int(i) => Self::Int(i),
            HeaderValueRepr::Float(f) => Self::Float(f),
            HeaderValueRepr::Str(s) => Self::Str(s),
            HeaderValueRepr::NonFinite(nf) => Self::Float(match nf.float.as_str() {
                "nan" => f64::NAN,
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => {
                    return Err(D::Error::custom(format!(
                        "unknown non-finite float '{other}'"
                    )))
                }
            }),
        })
    }
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for HeaderValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u8> for HeaderValue {
    fn from(v: u8) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// One keyword record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub key: String,
    pub value: HeaderValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Ordered key/value header. Keys are unique; setting an existing key
/// replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.card(key).map(|c| &c.value)
    }

    pub fn card(&self, key: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.card(key).is_some()
    }

    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.set_card(key, value.into(), None);
    }

    pub fn set_with_comment(&mut self, key: &str, value: impl Into<HeaderValue>, comment: &str) {
        self.set_card(key, value.into(), Some(comment.to_string()));
    }

    fn set_card(&mut self, key: &str, value: HeaderValue, comment: Option<String>) {
        match self.cards.iter_mut().find(|c| c.key == key) {
            Some(card) => {
                card.value = value;
                if comment.is_some() {
                    card.comment = comment;
                }
            }
            None => self.cards.push(Card {
                key: key.to_string(),
                value,
                comment,
            }),
        }
    }

    /// Look up a key that must be present.
    pub fn require(&self, key: &str, source_name: &str) -> Result<&HeaderValue> {
        self.get(key).ok_or_else(|| DetrendError::MissingHeaderKey {
            key: key.to_string(),
            source_name: source_name.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter()
    }
}

/// Calibration frame kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    Bias,
    Flat,
}

impl CalibrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bias => "bias",
            Self::Flat => "flat",
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Photometric filter band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterBand {
    #[serde(rename = "zg")]
    Zg,
    #[serde(rename = "zr")]
    Zr,
    #[serde(rename = "zi")]
    Zi,
}

impl FilterBand {
    pub const ALL: [FilterBand; 3] = [Self::Zg, Self::Zr, Self::Zi];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Zg => "zg",
            Self::Zr => "zr",
            Self::Zi => "zi",
        }
    }

    /// Parse a filter code (`zg`, `zr`, `zi`).
    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "zg" => Ok(Self::Zg),
            "zr" => Ok(Self::Zr),
            "zi" => Ok(Self::Zi),
            other => Err(DetrendError::Configuration(format!(
                "unknown filter code '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FilterBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identifies one calibration artifact: (period, ccd, [filter]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub period: String,
    pub ccd: u8,
    pub filter: Option<FilterBand>,
}

impl GroupKey {
    pub fn new(period: impl Into<String>, ccd: u8) -> Self {
        Self {
            period: period.into(),
            ccd,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterBand) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/c{:02}", self.period, self.ccd)?;
        if let Some(filter) = self.filter {
            write!(f, "/{filter}")?;
        }
        Ok(())
    }
}

/// One raw exposure as loaded from disk. Immutable once constructed.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Pixel data, row-major, shape = (height, width). Row 0 is the bottom of the CCD.
    pub data: Array2<f32>,
    /// Overscan strip read out alongside the image, when the file carries one.
    pub overscan: Option<Array2<f32>>,
    pub header: Header,
    pub path: PathBuf,
}

impl RawFrame {
    pub fn new(data: Array2<f32>, header: Header, path: impl Into<PathBuf>) -> Self {
        Self {
            data,
            overscan: None,
            header,
            path: path.into(),
        }
    }

    pub fn with_overscan(mut self, overscan: Array2<f32>) -> Self {
        self.overscan = Some(overscan);
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// File name without directories, used for `INPUTnn` provenance cards.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Ordered raw frames sharing one grouping key and one pixel shape.
#[derive(Clone, Debug)]
pub struct FrameCollection {
    key: GroupKey,
    frames: Vec<RawFrame>,
}

impl FrameCollection {
    /// Build a collection, rejecting empty input and mismatched shapes.
    pub fn new(key: GroupKey, frames: Vec<RawFrame>) -> Result<Self> {
        let first = frames.first().ok_or_else(|| {
            DetrendError::Configuration(format!("empty frame collection for {key}"))
        })?;
        let shape = first.shape();
        if let Some(bad) = frames.iter().find(|f| f.shape() != shape) {
            return Err(DetrendError::Configuration(format!(
                "frame {} has shape {:?}, expected {:?}",
                bad.path.display(),
                bad.shape(),
                shape
            )));
        }
        Ok(Self { key, frames })
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn frames(&self) -> &[RawFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.frames[0].shape()
    }
}

/// A combined calibration image with its provenance header.
#[derive(Clone, Debug)]
pub struct MasterFrame {
    pub kind: CalibrationKind,
    pub key: GroupKey,
    pub data: Array2<f32>,
    pub header: Header,
    /// Where the artifact lives on disk, once persisted or loaded.
    pub path: Option<PathBuf>,
}

impl MasterFrame {
    pub fn filter(&self) -> Option<FilterBand> {
        self.key.filter
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

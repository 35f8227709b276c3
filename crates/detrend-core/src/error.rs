use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetrendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing header key {key} in {source_name}")]
    MissingHeaderKey { key: String, source_name: String },

    #[error("Master frame not built: {key}")]
    NotBuilt { key: String },

    #[error("Invalid {what} id: {id}")]
    InvalidId { what: &'static str, id: i64 },

    #[error("Unknown illumination (LED) id: {0}")]
    UnknownIllumination(i64),

    #[error("Processing of exposure {file} failed: {message}")]
    ExposureProcessing { file: String, message: String },

    #[error("Artifact already exists: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),
}

impl DetrendError {
    /// Wrap any failure that happened while processing one science exposure.
    pub fn exposure(file: impl Into<String>, cause: &DetrendError) -> Self {
        Self::ExposureProcessing {
            file: file.into(),
            message: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DetrendError>;

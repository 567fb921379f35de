//! Error types for the detection core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for the detection core
pub type Result<T> = std::result::Result<T, DetectionError>;

/// Errors surfaced by the bridge, pipeline and validation engine.
///
/// A missing ground-truth record is not an error: the pipeline records it as a
/// skipped validation instead.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Inference execution failed: {0}")]
    Execution(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DetectionError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::Execution(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether this error aborts only the current image and leaves the bridge usable.
    pub fn is_per_image(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

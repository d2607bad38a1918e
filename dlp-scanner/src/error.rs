//! Error types for the scan pipeline.

use crate::camera::CameraError;
use crate::projector::DisplayError;
use std::path::PathBuf;

/// Which physical camera a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraSide {
    First,
    Second,
}

impl CameraSide {
    /// File name prefix used by the frame cache (`cam1`, `cam2`).
    pub fn prefix(&self) -> &'static str {
        match self {
            CameraSide::First => "cam1",
            CameraSide::Second => "cam2",
        }
    }
}

impl std::fmt::Display for CameraSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSide::First => write!(f, "camera 1"),
            CameraSide::Second => write!(f, "camera 2"),
        }
    }
}

/// A single failed camera read during a capture run.
#[derive(Debug, Clone)]
pub struct CaptureFailure {
    /// Index into the projected sequence.
    pub index: usize,
    pub camera: CameraSide,
    pub reason: String,
}

impl std::fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} frame {}: {}", self.camera, self.index, self.reason)
    }
}

/// Errors surfaced by the scanner core.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("capture failed for {} frame(s)", .0.len())]
    Capture(Vec<CaptureFailure>),

    #[error("projector display failed: {0}")]
    Display(#[from] DisplayError),

    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("no usable points: {0}")]
    EmptyResult(String),

    #[error("malformed point cloud data: {0}")]
    Format(String),

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame cache at {path:?} is incomplete: {reason}")]
    Cache { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;

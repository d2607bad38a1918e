//! DLP Structured Light Scanner
//!
//! Core of a two-camera structured light 3D scanner:
//! - Gray code pattern generation and synchronized capture
//! - Per-pixel code decoding with direct/ambient light separation
//! - Stereo ray triangulation
//! - Point cloud outlier filtering and PCD export

pub mod calibration;
pub mod camera;
pub mod cloud;
pub mod config;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod projector;
pub mod stereo;
pub mod structured_light;
pub mod synthetic;

pub use error::{Result, ScanError};

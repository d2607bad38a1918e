//! Scanner configuration and serialization.

use crate::error::{Result, ScanError};
use crate::export::PcdEncoding;
use crate::stereo::ReconstructionConfig;
use crate::structured_light::{DecoderConfig, SequencerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What plays the part of view 2 during triangulation.
///
/// Defaults to the second camera of the two-camera scanner head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondViewKind {
    /// Projector as an inverse camera; calibration relates camera 1 and the projector.
    Projector,
    /// Second camera; calibration relates the two cameras.
    #[default]
    Camera,
}

/// Shape of the reconstructed cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudLayout {
    /// One point per projector coordinate.
    #[default]
    Sparse,
    /// One point per camera 1 pixel, on the camera grid.
    Dense,
}

/// Outlier filter settings. Only dense clouds are filtered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Allowed deviation, in standard deviations.
    pub deviation: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deviation: 2.0,
        }
    }
}

/// Full scanner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_camera_width")]
    pub camera_width: u32,
    #[serde(default = "default_camera_height")]
    pub camera_height: u32,
    #[serde(default = "default_projector_width")]
    pub projector_width: u32,
    #[serde(default = "default_projector_height")]
    pub projector_height: u32,
    /// Settle time after a pattern is shown, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub pre_delay_ms: u64,
    /// Pause after both cameras fired, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub post_delay_ms: u64,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub second_view: SecondViewKind,
    #[serde(default)]
    pub layout: CloudLayout,
    #[serde(default)]
    pub pcd_encoding: PcdEncoding,
    /// Write every capture run to `cache_dir`.
    #[serde(default)]
    pub cache_frames: bool,
    /// Decode frames from `cache_dir` instead of capturing.
    #[serde(default)]
    pub reuse_cached_frames: bool,
    /// Where capture runs are cached.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_camera_width() -> u32 {
    640
}

fn default_camera_height() -> u32 {
    400
}

fn default_projector_width() -> u32 {
    320
}

fn default_projector_height() -> u32 {
    200
}

fn default_delay_ms() -> u64 {
    100
}

fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dlp-scanner")
        .join("captures")
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            camera_width: default_camera_width(),
            camera_height: default_camera_height(),
            projector_width: default_projector_width(),
            projector_height: default_projector_height(),
            pre_delay_ms: default_delay_ms(),
            post_delay_ms: default_delay_ms(),
            decoder: DecoderConfig::default(),
            reconstruction: ReconstructionConfig::default(),
            filter: FilterConfig::default(),
            second_view: SecondViewKind::default(),
            layout: CloudLayout::default(),
            pcd_encoding: PcdEncoding::default(),
            cache_frames: false,
            reuse_cached_frames: false,
            cache_dir: default_cache_dir(),
        }
    }
}

impl ScannerConfig {
    /// Load from JSON; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!("Loaded scanner config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(ScanError::InvalidConfig("camera size must be non-zero".to_string()));
        }
        if self.projector_width == 0 || self.projector_height == 0 {
            return Err(ScanError::InvalidConfig("projector size must be non-zero".to_string()));
        }
        let b = self.decoder.light_separation;
        if !(0.0..1.0).contains(&b) {
            return Err(ScanError::InvalidConfig(format!(
                "light separation must be in [0, 1), got {}",
                b
            )));
        }
        if !(self.reconstruction.max_distance > 0.0) {
            return Err(ScanError::InvalidConfig("max_distance must be positive".to_string()));
        }
        if !(self.filter.deviation > 0.0) {
            return Err(ScanError::InvalidConfig("filter deviation must be positive".to_string()));
        }
        Ok(())
    }

    pub fn sequencer(&self) -> SequencerConfig {
        SequencerConfig {
            pre_delay: Duration::from_millis(self.pre_delay_ms),
            post_delay: Duration::from_millis(self.post_delay_ms),
            camera_width: self.camera_width,
            camera_height: self.camera_height,
        }
    }
}

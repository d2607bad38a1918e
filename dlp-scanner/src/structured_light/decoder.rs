//! Gray code pattern decoder.
//!
//! Turns the frames of one camera into a per-pixel projector coordinate.
//! Bits are only trusted where the direct component of the light (estimated
//! from the min/max over several mid-frequency patterns) dominates the
//! ambient component.

use super::gray_code::{GrayCodeGenerator, PatternConfig, PatternDirection, PatternSpec, Polarity};
use crate::error::{Result, ScanError};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Result of decoding Gray code patterns for one camera.
#[derive(Debug, Clone)]
pub struct DecodedCode {
    /// Camera image dimensions.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Projector dimensions.
    pub projector_width: u32,
    pub projector_height: u32,
    /// Per-pixel decoded projector column (-1 = invalid).
    pub projector_x: Vec<i32>,
    /// Per-pixel decoded projector row (-1 = invalid).
    pub projector_y: Vec<i32>,
    /// Validity mask (true = valid pixel).
    pub valid_mask: Vec<bool>,
}

impl DecodedCode {
    pub fn new(camera_width: u32, camera_height: u32, projector_width: u32, projector_height: u32) -> Self {
        let size = (camera_width * camera_height) as usize;
        Self {
            camera_width,
            camera_height,
            projector_width,
            projector_height,
            projector_x: vec![-1; size],
            projector_y: vec![-1; size],
            valid_mask: vec![false; size],
        }
    }

    pub fn len(&self) -> usize {
        self.valid_mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_mask.is_empty()
    }

    /// Get projector coordinate (column, row) at camera pixel (x, y).
    pub fn get(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        self.get_index((y * self.camera_width + x) as usize)
    }

    pub fn get_index(&self, idx: usize) -> Option<(u32, u32)> {
        if self.valid_mask[idx] {
            Some((self.projector_x[idx] as u32, self.projector_y[idx] as u32))
        } else {
            None
        }
    }

    /// Mark a pixel invalid in both channels.
    pub fn invalidate(&mut self, idx: usize) {
        self.valid_mask[idx] = false;
        self.projector_x[idx] = -1;
        self.projector_y[idx] = -1;
    }

    /// Invalidate every pixel where `keep` is false.
    pub fn retain_mask(&mut self, keep: &[bool]) {
        for idx in 0..self.len() {
            if !keep.get(idx).copied().unwrap_or(false) {
                self.invalidate(idx);
            }
        }
    }

    /// Count valid correspondences.
    pub fn valid_count(&self) -> usize {
        self.valid_mask.iter().filter(|&&v| v).count()
    }
}

/// Thresholds for robust bit decoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Direct/global separation constant `b`, in `[0, 1)`.
    pub light_separation: f32,
    /// Minimum direct light for a bit to be trusted.
    pub direct_threshold: f32,
    /// Minimum white-minus-black difference; 0 disables the shadow mask.
    pub shadow_threshold: u8,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            light_separation: 0.3,
            direct_threshold: 5.0,
            shadow_threshold: 40,
        }
    }
}

/// Decodes captured Gray code frames into projector coordinates.
#[derive(Debug, Clone)]
pub struct CodeDecoder {
    patterns: PatternConfig,
    config: DecoderConfig,
}

impl CodeDecoder {
    pub fn new(patterns: PatternConfig, config: DecoderConfig) -> Result<Self> {
        let b = config.light_separation;
        if !(0.0..1.0).contains(&b) {
            return Err(ScanError::InvalidConfig(format!(
                "light separation must be in [0, 1), got {}",
                b
            )));
        }
        Ok(Self { patterns, config })
    }

    pub fn patterns(&self) -> &PatternConfig {
        &self.patterns
    }

    /// Bits whose frames feed the direct/ambient estimate: the ones just
    /// coarser than the finest bit.
    pub fn light_estimation_bits(&self) -> std::ops::Range<u32> {
        let bits = self.patterns.bits;
        let hi = bits.saturating_sub(1);
        let lo = bits.saturating_sub(3);
        if lo == hi {
            lo..hi + 1
        } else {
            lo..hi
        }
    }

    /// Decode the frames of one camera.
    ///
    /// `frames` is indexed by sequence position; `None` marks a frame that
    /// was never captured. Every pixel that depends on a missing frame comes
    /// out invalid.
    pub fn decode(&self, frames: &[Option<&GrayImage>], width: u32, height: u32) -> Result<DecodedCode> {
        let expected = self.patterns.total_patterns();
        if frames.len() != expected {
            return Err(ScanError::InvalidConfig(format!(
                "Expected {} frames, got {}",
                expected,
                frames.len()
            )));
        }
        if let Some(frame) = frames.iter().flatten().find(|f| f.dimensions() != (width, height)) {
            return Err(ScanError::InvalidConfig(format!(
                "frame is {}x{}, camera is {}x{}",
                frame.width(),
                frame.height(),
                width,
                height
            )));
        }

        let pixel_count = (width * height) as usize;
        let mut decoded = DecodedCode::new(
            width,
            height,
            self.patterns.projector_width,
            self.patterns.projector_height,
        );

        let decodable = self.decodable_mask(frames, pixel_count);

        let columns = self.decode_direction(frames, &decodable, PatternDirection::Vertical, pixel_count);
        let rows = self.decode_direction(frames, &decodable, PatternDirection::Horizontal, pixel_count);

        for i in 0..pixel_count {
            if let (Some(x), Some(y)) = (columns[i], rows[i]) {
                decoded.projector_x[i] = x as i32;
                decoded.projector_y[i] = y as i32;
                decoded.valid_mask[i] = true;
            }
        }

        log::info!(
            "Decoded {} of {} pixels ({} bits)",
            decoded.valid_count(),
            pixel_count,
            self.patterns.bits
        );
        Ok(decoded)
    }

    /// Per-pixel direct/ambient test plus the white/black shadow mask.
    fn decodable_mask(&self, frames: &[Option<&GrayImage>], pixel_count: usize) -> Vec<bool> {
        let b = self.config.light_separation;

        let mut stack: Vec<&[u8]> = Vec::new();
        for direction in [PatternDirection::Vertical, PatternDirection::Horizontal] {
            for bit in self.light_estimation_bits() {
                for polarity in [Polarity::Normal, Polarity::Inverted] {
                    let spec = PatternSpec {
                        bit_index: bit,
                        direction,
                        polarity,
                    };
                    if let Some(frame) = frames[self.patterns.index_of(&spec)] {
                        stack.push(frame.as_raw());
                    }
                }
            }
        }

        if stack.is_empty() {
            log::warn!("No frames available for light estimation, every pixel is undecodable");
            return vec![false; pixel_count];
        }

        let mut mask: Vec<bool> = (0..pixel_count)
            .map(|i| {
                let (min, max) = stack.iter().fold((u8::MAX, u8::MIN), |(lo, hi), frame| {
                    (lo.min(frame[i]), hi.max(frame[i]))
                });
                let (min, max) = (min as f32, max as f32);
                let direct = (max - min) / (1.0 - b);
                let ambient = 2.0 * (min - b * max) / (1.0 - b * b);
                direct > ambient && direct >= self.config.direct_threshold
            })
            .collect();

        let white = frames[self.patterns.white_index()];
        let black = frames[self.patterns.black_index()];
        if let (Some(white), Some(black), true) = (white, black, self.config.shadow_threshold > 0) {
            let threshold = self.config.shadow_threshold as i16;
            let mut shadowed = 0usize;
            for (i, ok) in mask.iter_mut().enumerate() {
                if (white.as_raw()[i] as i16 - black.as_raw()[i] as i16) < threshold {
                    shadowed += usize::from(*ok);
                    *ok = false;
                }
            }
            log::debug!("Shadow mask removed {} pixels", shadowed);
        }

        mask
    }

    /// Decode one coordinate (column or row) for every pixel.
    fn decode_direction(
        &self,
        frames: &[Option<&GrayImage>],
        decodable: &[bool],
        direction: PatternDirection,
        pixel_count: usize,
    ) -> Vec<Option<u32>> {
        let bits = self.patterns.bits;
        let sentinel = 1u32 << (bits + 1);
        let mut codes = vec![0u32; pixel_count];

        for bit in 0..bits {
            let pair = [Polarity::Normal, Polarity::Inverted].map(|polarity| {
                frames[self.patterns.index_of(&PatternSpec {
                    bit_index: bit,
                    direction,
                    polarity,
                })]
            });
            let bit_value = 1u32 << (bits - 1 - bit);

            match pair {
                [Some(normal), Some(inverted)] => {
                    let (normal, inverted) = (normal.as_raw(), inverted.as_raw());
                    for i in 0..pixel_count {
                        if !decodable[i] {
                            codes[i] |= sentinel;
                        } else if normal[i] > inverted[i] {
                            codes[i] |= bit_value;
                        }
                    }
                }
                _ => {
                    log::warn!("Missing frame for {:?} bit {}, pixels relying on it are invalid", direction, bit);
                    codes.iter_mut().for_each(|code| *code |= sentinel);
                }
            }
        }

        let offset = self.patterns.offset(direction) as i64;
        let max_coord = self.patterns.extent(direction) as i64 - 1;

        codes
            .into_iter()
            .map(|code| {
                if code >= sentinel {
                    return None;
                }
                let binary = GrayCodeGenerator::gray_to_binary(code) as i64;
                Some((binary - offset).clamp(0, max_coord) as u32)
            })
            .collect()
    }
}

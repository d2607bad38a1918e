//! Gray code pattern generation for structured light scanning.

use crate::error::Result;
use image::{GrayImage, Luma};
use std::path::Path;

/// Direction of pattern stripes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternDirection {
    /// Stripes run horizontally, decode the projector row.
    Horizontal,
    /// Stripes run vertically, decode the projector column.
    Vertical,
}

/// Whether a pattern shows the code bit or its complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Normal,
    Inverted,
}

/// A single Gray code pattern specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternSpec {
    /// Which bit of the Gray code this pattern encodes (0 = most significant).
    pub bit_index: u32,
    /// Pattern direction.
    pub direction: PatternDirection,
    pub polarity: Polarity,
}

/// What the projector shows for one step of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Stripe(PatternSpec),
    /// All-white reference, used for the shadow mask.
    White,
    /// All-black reference.
    Black,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Stripe(spec) => {
                let dir = match spec.direction {
                    PatternDirection::Horizontal => "horizontal",
                    PatternDirection::Vertical => "vertical",
                };
                let inv = if spec.polarity == Polarity::Inverted { " inverted" } else { "" };
                write!(f, "{} bit {}{}", dir, spec.bit_index, inv)
            }
            FrameKind::White => write!(f, "white"),
            FrameKind::Black => write!(f, "black"),
        }
    }
}

/// A rendered pattern, ready for display.
#[derive(Debug, Clone)]
pub struct ProjectedFrame {
    pub kind: FrameKind,
    pub image: GrayImage,
}

/// Configuration for pattern generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternConfig {
    /// Projector resolution width.
    pub projector_width: u32,
    /// Projector resolution height.
    pub projector_height: u32,
    /// Code width shared by both directions.
    pub bits: u32,
}

impl PatternConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            projector_width: width,
            projector_height: height,
            bits: bits_for(width.max(height)),
        }
    }

    /// Number of Gray codes available, `2^bits`.
    pub fn code_space(&self) -> u32 {
        1 << self.bits
    }

    /// Offset that centers the column range in the code space.
    pub fn column_offset(&self) -> u32 {
        (self.code_space() - self.projector_width) / 2
    }

    /// Offset that centers the row range in the code space.
    pub fn row_offset(&self) -> u32 {
        (self.code_space() - self.projector_height) / 2
    }

    pub fn offset(&self, direction: PatternDirection) -> u32 {
        match direction {
            PatternDirection::Horizontal => self.row_offset(),
            PatternDirection::Vertical => self.column_offset(),
        }
    }

    pub fn extent(&self, direction: PatternDirection) -> u32 {
        match direction {
            PatternDirection::Horizontal => self.projector_height,
            PatternDirection::Vertical => self.projector_width,
        }
    }

    /// Total number of frames projected (including inverted pairs and references).
    pub fn total_patterns(&self) -> usize {
        // Each direction: bits * 2 (normal + inverted), then white and black.
        (self.bits * 4 + 2) as usize
    }

    /// Sequence position of a stripe pattern.
    pub fn index_of(&self, spec: &PatternSpec) -> usize {
        let base = match spec.direction {
            PatternDirection::Vertical => 0,
            PatternDirection::Horizontal => self.bits * 2,
        };
        let inv = match spec.polarity {
            Polarity::Normal => 0,
            Polarity::Inverted => 1,
        };
        (base + spec.bit_index * 2 + inv) as usize
    }

    pub fn white_index(&self) -> usize {
        (self.bits * 4) as usize
    }

    pub fn black_index(&self) -> usize {
        self.white_index() + 1
    }

    /// Generate the ordered sequence of everything to project.
    ///
    /// Vertical bits first, then horizontal, each bit followed by its
    /// complement, with the white and black references last.
    pub fn pattern_sequence(&self) -> Vec<FrameKind> {
        let mut patterns = Vec::with_capacity(self.total_patterns());

        for direction in [PatternDirection::Vertical, PatternDirection::Horizontal] {
            for bit in 0..self.bits {
                for polarity in [Polarity::Normal, Polarity::Inverted] {
                    patterns.push(FrameKind::Stripe(PatternSpec {
                        bit_index: bit,
                        direction,
                        polarity,
                    }));
                }
            }
        }

        patterns.push(FrameKind::White);
        patterns.push(FrameKind::Black);
        patterns
    }
}

/// `ceil(log2(n))`, at least 1.
fn bits_for(n: u32) -> u32 {
    if n <= 2 {
        1
    } else {
        u32::BITS - (n - 1).leading_zeros()
    }
}

/// Gray code pattern generator.
#[derive(Debug, Clone)]
pub struct GrayCodeGenerator {
    config: PatternConfig,
}

impl GrayCodeGenerator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            config: PatternConfig::new(width, height),
        }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Convert binary value to Gray code.
    pub fn binary_to_gray(binary: u32) -> u32 {
        binary ^ (binary >> 1)
    }

    /// Convert Gray code back to binary.
    pub fn gray_to_binary(gray: u32) -> u32 {
        let mut binary = gray;
        let mut shift = 1;
        while shift < 32 {
            binary ^= binary >> shift;
            shift *= 2;
        }
        binary
    }

    /// Bit value (0 or 1) shown at projector coordinate `coord` for a pattern.
    pub fn bit_at(&self, spec: &PatternSpec, coord: u32) -> u8 {
        let gray = Self::binary_to_gray(coord + self.config.offset(spec.direction));
        let bit_position = self.config.bits - 1 - spec.bit_index;
        let bit_value = ((gray >> bit_position) & 1) as u8;
        match spec.polarity {
            Polarity::Normal => bit_value,
            Polarity::Inverted => 1 - bit_value,
        }
    }

    /// Render a stripe pattern at projector resolution.
    pub fn generate_pattern(&self, spec: &PatternSpec) -> GrayImage {
        let width = self.config.projector_width;
        let height = self.config.projector_height;

        // One lookup per stripe instead of per pixel.
        let stripes: Vec<u8> = (0..self.config.extent(spec.direction))
            .map(|coord| if self.bit_at(spec, coord) == 1 { 255u8 } else { 0u8 })
            .collect();

        GrayImage::from_fn(width, height, |x, y| {
            let coord = match spec.direction {
                PatternDirection::Horizontal => y,
                PatternDirection::Vertical => x,
            };
            Luma([stripes[coord as usize]])
        })
    }

    /// Generate all-white reference pattern.
    pub fn generate_white(&self) -> GrayImage {
        GrayImage::from_pixel(
            self.config.projector_width,
            self.config.projector_height,
            Luma([255u8]),
        )
    }

    /// Generate all-black reference pattern.
    pub fn generate_black(&self) -> GrayImage {
        GrayImage::new(self.config.projector_width, self.config.projector_height)
    }

    pub fn render(&self, kind: &FrameKind) -> GrayImage {
        match kind {
            FrameKind::Stripe(spec) => self.generate_pattern(spec),
            FrameKind::White => self.generate_white(),
            FrameKind::Black => self.generate_black(),
        }
    }

    /// Render the full projection sequence.
    pub fn sequence(&self) -> Vec<ProjectedFrame> {
        self.config
            .pattern_sequence()
            .into_iter()
            .map(|kind| ProjectedFrame {
                image: self.render(&kind),
                kind,
            })
            .collect()
    }

    /// Write the sequence as `pattern_NN.png` files.
    pub fn write_sequence(&self, output_dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(output_dir)?;

        let sequence = self.sequence();
        for (i, frame) in sequence.iter().enumerate() {
            let path = output_dir.join(format!("pattern_{:02}.png", i));
            frame.image.save(&path)?;
            log::debug!("Wrote {} pattern to {:?}", frame.kind, path);
        }

        log::info!("Wrote {} patterns to {:?}", sequence.len(), output_dir);
        Ok(sequence.len())
    }
}

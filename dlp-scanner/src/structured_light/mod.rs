//! Structured light pattern generation, capture sequencing and decoding.

mod decoder;
mod gray_code;
mod session;

pub use decoder::{CodeDecoder, DecodedCode, DecoderConfig};
pub use gray_code::{
    FrameKind, GrayCodeGenerator, PatternConfig, PatternDirection, PatternSpec, Polarity, ProjectedFrame,
};
pub use session::{frames_for, CaptureRun, CaptureSequencer, FramePair, SequencerConfig, SequencerState};

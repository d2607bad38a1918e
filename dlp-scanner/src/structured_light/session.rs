//! Capture sequencer: projects each pattern and triggers both cameras.

use super::gray_code::{FrameKind, ProjectedFrame};
use crate::camera::{to_grayscale, Camera};
use crate::error::{CameraSide, CaptureFailure, Result, ScanError};
use crate::projector::{present, Projector};
use image::GrayImage;
use std::time::Duration;

/// State of the capture sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// Nothing projected.
    Idle,
    /// Putting pattern `index` on the projector.
    Displaying { index: usize },
    /// Waiting for the projector image to settle.
    PreDelay { index: usize },
    /// Triggering both cameras.
    Capturing { index: usize },
    /// Waiting before the next pattern.
    PostDelay { index: usize },
}

impl SequencerState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SequencerState::Idle)
    }

    pub fn index(&self) -> Option<usize> {
        match *self {
            SequencerState::Idle => None,
            SequencerState::Displaying { index }
            | SequencerState::PreDelay { index }
            | SequencerState::Capturing { index }
            | SequencerState::PostDelay { index } => Some(index),
        }
    }
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::Displaying { index } => write!(f, "Displaying {}", index),
            SequencerState::PreDelay { index } => write!(f, "Pre-delay {}", index),
            SequencerState::Capturing { index } => write!(f, "Capturing {}", index),
            SequencerState::PostDelay { index } => write!(f, "Post-delay {}", index),
        }
    }
}

/// Grayscale frames from both cameras for one projected pattern.
#[derive(Debug, Clone)]
pub struct FramePair {
    /// Position in the projected sequence.
    pub index: usize,
    /// What was projected.
    pub kind: FrameKind,
    /// Camera 1 frame, absent if the read failed.
    pub first: Option<GrayImage>,
    /// Camera 2 frame, absent if the read failed.
    pub second: Option<GrayImage>,
}

impl FramePair {
    pub fn empty(index: usize, kind: FrameKind) -> Self {
        Self {
            index,
            kind,
            first: None,
            second: None,
        }
    }

    pub fn get(&self, side: CameraSide) -> Option<&GrayImage> {
        match side {
            CameraSide::First => self.first.as_ref(),
            CameraSide::Second => self.second.as_ref(),
        }
    }

    pub fn set(&mut self, side: CameraSide, frame: Option<GrayImage>) {
        match side {
            CameraSide::First => self.first = frame,
            CameraSide::Second => self.second = frame,
        }
    }
}

/// All frames of one camera in sequence order.
pub fn frames_for(pairs: &[FramePair], side: CameraSide) -> Vec<Option<&GrayImage>> {
    pairs.iter().map(|pair| pair.get(side)).collect()
}

/// Output of a full capture run.
#[derive(Debug, Clone)]
pub struct CaptureRun {
    pub frames: Vec<FramePair>,
    pub failures: Vec<CaptureFailure>,
}

impl CaptureRun {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Frames of a complete run, or the failures of an incomplete one.
    pub fn into_frames(self) -> Result<Vec<FramePair>> {
        if self.failures.is_empty() {
            Ok(self.frames)
        } else {
            Err(ScanError::Capture(self.failures))
        }
    }
}

/// Configuration for capture timing.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Time to wait after a pattern is shown before triggering the cameras.
    pub pre_delay: Duration,
    /// Time to wait after capture before showing the next pattern.
    pub post_delay: Duration,
    /// Camera frame width.
    pub camera_width: u32,
    /// Camera frame height.
    pub camera_height: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            pre_delay: Duration::from_millis(100),
            post_delay: Duration::from_millis(100),
            camera_width: 640,
            camera_height: 400,
        }
    }
}

/// Drives the projector and both cameras through one pattern sequence.
pub struct CaptureSequencer {
    /// Current state.
    pub state: SequencerState,
    /// Configuration.
    pub config: SequencerConfig,
    sequence: Vec<ProjectedFrame>,
    frames: Vec<FramePair>,
    failures: Vec<CaptureFailure>,
}

impl CaptureSequencer {
    pub fn new(config: SequencerConfig, sequence: Vec<ProjectedFrame>) -> Self {
        Self {
            state: SequencerState::Idle,
            config,
            sequence,
            frames: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn sequence_len(&self) -> usize {
        self.sequence.len()
    }

    /// Get progress (0.0 to 1.0).
    pub fn progress(&self) -> f32 {
        if self.sequence.is_empty() {
            return 0.0;
        }
        let done = match self.state {
            SequencerState::Idle => {
                if self.frames.is_empty() {
                    0
                } else {
                    self.sequence.len()
                }
            }
            SequencerState::PostDelay { index } => index + 1,
            state => state.index().unwrap_or(0),
        };
        done as f32 / self.sequence.len() as f32
    }

    /// Reset buffers and move to the first pattern.
    pub fn start(&mut self) -> Result<()> {
        if self.sequence.is_empty() {
            return Err(ScanError::InvalidConfig("empty pattern sequence".to_string()));
        }

        self.frames = self
            .sequence
            .iter()
            .enumerate()
            .map(|(i, frame)| FramePair::empty(i, frame.kind))
            .collect();
        self.failures.clear();
        self.state = SequencerState::Displaying { index: 0 };

        log::info!("Starting capture of {} patterns", self.sequence.len());
        Ok(())
    }

    /// Perform the work of the current state and advance to the next one.
    pub fn step<P, C1, C2>(&mut self, projector: &mut P, camera1: &mut C1, camera2: &mut C2) -> Result<()>
    where
        P: Projector + ?Sized,
        C1: Camera + ?Sized,
        C2: Camera + ?Sized,
    {
        self.state = match self.state {
            SequencerState::Idle => SequencerState::Idle,
            SequencerState::Displaying { index } => {
                let frame = &self.sequence[index];
                log::debug!("Projecting {} ({}/{})", frame.kind, index + 1, self.sequence.len());
                if let Err(e) = present(projector, &frame.image) {
                    self.state = SequencerState::Idle;
                    return Err(e.into());
                }
                SequencerState::PreDelay { index }
            }
            SequencerState::PreDelay { index } => {
                sleep(self.config.pre_delay);
                SequencerState::Capturing { index }
            }
            SequencerState::Capturing { index } => {
                // Back-to-back software trigger; no hardware sync.
                let first = self.capture_one(camera1, index, CameraSide::First);
                let second = self.capture_one(camera2, index, CameraSide::Second);
                self.frames[index].set(CameraSide::First, first);
                self.frames[index].set(CameraSide::Second, second);
                SequencerState::PostDelay { index }
            }
            SequencerState::PostDelay { index } => {
                sleep(self.config.post_delay);
                let next = index + 1;
                if next < self.sequence.len() {
                    SequencerState::Displaying { index: next }
                } else {
                    log::info!(
                        "Capture finished: {} patterns, {} failed reads",
                        self.sequence.len(),
                        self.failures.len()
                    );
                    SequencerState::Idle
                }
            }
        };
        Ok(())
    }

    /// Run the whole sequence to completion.
    pub fn run<P, C1, C2>(&mut self, projector: &mut P, camera1: &mut C1, camera2: &mut C2) -> Result<CaptureRun>
    where
        P: Projector + ?Sized,
        C1: Camera + ?Sized,
        C2: Camera + ?Sized,
    {
        camera1.set_resolution(self.config.camera_width, self.config.camera_height)?;
        camera2.set_resolution(self.config.camera_width, self.config.camera_height)?;

        self.start()?;
        while !self.state.is_idle() {
            self.step(projector, camera1, camera2)?;
        }

        Ok(CaptureRun {
            frames: std::mem::take(&mut self.frames),
            failures: std::mem::take(&mut self.failures),
        })
    }

    fn capture_one<C: Camera + ?Sized>(&mut self, camera: &mut C, index: usize, side: CameraSide) -> Option<GrayImage> {
        match camera.capture() {
            Ok(raw) => Some(to_grayscale(raw, self.config.camera_width, self.config.camera_height)),
            Err(e) => {
                log::error!("Capture failed on {} for pattern {}: {}", side, index, e);
                self.failures.push(CaptureFailure {
                    index,
                    camera: side,
                    reason: e.to_string(),
                });
                None
            }
        }
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraError;
    use crate::projector::DisplayError;
    use crate::structured_light::GrayCodeGenerator;
    use image::{DynamicImage, Luma};

    struct CountingProjector {
        shown: usize,
        fail_at: Option<usize>,
    }

    impl Projector for CountingProjector {
        fn resolution(&self) -> (u32, u32) {
            (8, 4)
        }

        fn display(&mut self, _image: &GrayImage) -> std::result::Result<(), DisplayError> {
            if Some(self.shown) == self.fail_at {
                return Err(DisplayError::Unavailable);
            }
            self.shown += 1;
            Ok(())
        }
    }

    struct FlatCamera {
        value: u8,
        reads: usize,
        fail_at: Option<usize>,
    }

    impl Camera for FlatCamera {
        fn set_resolution(&mut self, _w: u32, _h: u32) -> std::result::Result<(), CameraError> {
            Ok(())
        }

        fn capture(&mut self) -> std::result::Result<DynamicImage, CameraError> {
            let read = self.reads;
            self.reads += 1;
            if Some(read) == self.fail_at {
                return Err(CameraError::ReadFailed("timeout".to_string()));
            }
            Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 6, Luma([self.value]))))
        }
    }

    fn sequencer() -> CaptureSequencer {
        let config = SequencerConfig {
            pre_delay: Duration::ZERO,
            post_delay: Duration::ZERO,
            camera_width: 5,
            camera_height: 3,
        };
        CaptureSequencer::new(config, GrayCodeGenerator::new(8, 4).sequence())
    }

    #[test]
    fn test_state_transitions() {
        let mut seq = sequencer();
        let mut projector = CountingProjector { shown: 0, fail_at: None };
        let mut cam1 = FlatCamera { value: 10, reads: 0, fail_at: None };
        let mut cam2 = FlatCamera { value: 20, reads: 0, fail_at: None };

        seq.start().unwrap();
        assert_eq!(seq.state, SequencerState::Displaying { index: 0 });
        seq.step(&mut projector, &mut cam1, &mut cam2).unwrap();
        assert_eq!(seq.state, SequencerState::PreDelay { index: 0 });
        seq.step(&mut projector, &mut cam1, &mut cam2).unwrap();
        assert_eq!(seq.state, SequencerState::Capturing { index: 0 });
        seq.step(&mut projector, &mut cam1, &mut cam2).unwrap();
        assert_eq!(seq.state, SequencerState::PostDelay { index: 0 });
        seq.step(&mut projector, &mut cam1, &mut cam2).unwrap();
        assert_eq!(seq.state, SequencerState::Displaying { index: 1 });
        assert_eq!(cam1.reads, 1);
        assert_eq!(cam2.reads, 1);
    }

    #[test]
    fn test_full_run_stores_frames_in_order() {
        let mut seq = sequencer();
        let total = seq.sequence_len();
        let mut projector = CountingProjector { shown: 0, fail_at: None };
        let mut cam1 = FlatCamera { value: 10, reads: 0, fail_at: None };
        let mut cam2 = FlatCamera { value: 20, reads: 0, fail_at: None };

        let run = seq.run(&mut projector, &mut cam1, &mut cam2).unwrap();

        assert!(run.is_complete());
        assert!(seq.state.is_idle());
        assert_eq!(projector.shown, total);
        assert_eq!(run.frames.len(), total);
        assert_eq!(run.frames[total - 2].kind, FrameKind::White);
        assert_eq!(run.frames[total - 1].kind, FrameKind::Black);
        for (i, pair) in run.frames.iter().enumerate() {
            assert_eq!(pair.index, i);
            let first = pair.first.as_ref().unwrap();
            assert_eq!(first.dimensions(), (5, 3));
            assert_eq!(first.get_pixel(0, 0).0[0], 10);
            assert_eq!(pair.second.as_ref().unwrap().get_pixel(0, 0).0[0], 20);
        }
    }

    #[test]
    fn test_failed_read_leaves_frame_absent() {
        let mut seq = sequencer();
        let mut projector = CountingProjector { shown: 0, fail_at: None };
        let mut cam1 = FlatCamera { value: 10, reads: 0, fail_at: None };
        let mut cam2 = FlatCamera { value: 20, reads: 0, fail_at: Some(3) };

        let run = seq.run(&mut projector, &mut cam1, &mut cam2).unwrap();

        assert!(!run.is_complete());
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].index, 3);
        assert_eq!(run.failures[0].camera, CameraSide::Second);
        assert!(run.frames[3].second.is_none());
        assert!(run.frames[3].first.is_some());
        assert!(matches!(run.into_frames(), Err(ScanError::Capture(f)) if f.len() == 1));
    }

    #[test]
    fn test_display_failure_aborts() {
        let mut seq = sequencer();
        let mut projector = CountingProjector { shown: 0, fail_at: Some(2) };
        let mut cam1 = FlatCamera { value: 10, reads: 0, fail_at: None };
        let mut cam2 = FlatCamera { value: 20, reads: 0, fail_at: None };

        let result = seq.run(&mut projector, &mut cam1, &mut cam2);
        assert!(matches!(result, Err(ScanError::Display(_))));
        assert!(seq.state.is_idle());
        assert_eq!(cam1.reads, 2);
    }

    #[test]
    fn test_progress() {
        let mut seq = sequencer();
        assert_eq!(seq.progress(), 0.0);
        seq.start().unwrap();
        assert_eq!(seq.progress(), 0.0);
        seq.state = SequencerState::PostDelay { index: seq.sequence_len() - 1 };
        assert_eq!(seq.progress(), 1.0);
    }
}

//! On-disk copy of a capture run.
//!
//! Frames are stored as `cam1_imageNN.png` / `cam2_imageNN.png`, numbered by
//! sequence position, so decoding can be re-run without the hardware.

use crate::error::{CameraSide, Result, ScanError};
use crate::structured_light::{FrameKind, FramePair};
use std::path::PathBuf;

/// Directory of cached camera frames.
#[derive(Debug, Clone)]
pub struct FrameCache {
    dir: PathBuf,
}

impl FrameCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn frame_path(&self, side: CameraSide, index: usize) -> PathBuf {
        self.dir.join(format!("{}_image{:02}.png", side.prefix(), index))
    }

    /// Write every present frame. Returns the number of files written.
    pub fn save(&self, frames: &[FramePair]) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)?;

        let mut written = 0;
        for pair in frames {
            for side in [CameraSide::First, CameraSide::Second] {
                if let Some(frame) = pair.get(side) {
                    frame.save(self.frame_path(side, pair.index))?;
                    written += 1;
                }
            }
        }
        log::info!("Cached {} frames in {:?}", written, self.dir);
        Ok(written)
    }

    /// Load frames for the given sequence. Missing files come back as absent
    /// frames; a cache holding none of them is an error.
    pub fn load(&self, kinds: &[FrameKind]) -> Result<Vec<FramePair>> {
        let mut found = 0;
        let mut pairs = Vec::with_capacity(kinds.len());

        for (index, kind) in kinds.iter().enumerate() {
            let mut pair = FramePair::empty(index, *kind);
            for side in [CameraSide::First, CameraSide::Second] {
                let path = self.frame_path(side, index);
                if !path.is_file() {
                    log::warn!("Cached frame {:?} missing", path);
                    continue;
                }
                pair.set(side, Some(image::open(&path)?.into_luma8()));
                found += 1;
            }
            pairs.push(pair);
        }

        if found == 0 {
            return Err(ScanError::Cache {
                path: self.dir.clone(),
                reason: "no cached frames".to_string(),
            });
        }
        log::info!("Loaded {} cached frames from {:?}", found, self.dir);
        Ok(pairs)
    }
}

//! End-to-end scan: project, capture, decode, triangulate, filter.

use crate::calibration::CalibrationParams;
use crate::camera::{Camera, FrameCache};
use crate::cloud::{filter_outliers, FilterReport, PointCloud};
use crate::config::{CloudLayout, ScannerConfig, SecondViewKind};
use crate::error::{CameraSide, Result, ScanError};
use crate::export::PointCloudSink;
use crate::projector::Projector;
use crate::stereo::{contrast_mask, ReconstructionReport, Reconstructor, SecondView};
use crate::structured_light::{frames_for, CaptureSequencer, CodeDecoder, DecodedCode, FramePair, GrayCodeGenerator};

/// Everything produced by one scan.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub cloud: PointCloud,
    pub reconstruction: ReconstructionReport,
    /// Present when the outlier filter ran.
    pub filter: Option<FilterReport>,
}

/// One configured scanner: pattern set, decoder and calibrated geometry.
pub struct Scanner {
    config: ScannerConfig,
    generator: GrayCodeGenerator,
    decoder: CodeDecoder,
    reconstructor: Reconstructor,
}

impl Scanner {
    pub fn new(config: ScannerConfig, calibration: &CalibrationParams) -> Result<Self> {
        config.validate()?;
        let generator = GrayCodeGenerator::new(config.projector_width, config.projector_height);
        let decoder = CodeDecoder::new(*generator.config(), config.decoder)?;
        let reconstructor = Reconstructor::new(calibration, config.reconstruction)?;

        log::info!(
            "Scanner ready: projector {}x{} ({} patterns), cameras {}x{}, {:?}/{:?}",
            config.projector_width,
            config.projector_height,
            generator.config().total_patterns(),
            config.camera_width,
            config.camera_height,
            config.second_view,
            config.layout
        );
        Ok(Self {
            config,
            generator,
            decoder,
            reconstructor,
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn generator(&self) -> &GrayCodeGenerator {
        &self.generator
    }

    fn frame_cache(&self) -> FrameCache {
        FrameCache::new(&self.config.cache_dir)
    }

    /// Project the full sequence and capture both cameras.
    ///
    /// Any failed read fails the whole capture; frames of an incomplete run
    /// are still cached when caching is on.
    pub fn capture<P, C1, C2>(&self, projector: &mut P, camera1: &mut C1, camera2: &mut C2) -> Result<Vec<FramePair>>
    where
        P: Projector + ?Sized,
        C1: Camera + ?Sized,
        C2: Camera + ?Sized,
    {
        let mut sequencer = CaptureSequencer::new(self.config.sequencer(), self.generator.sequence());
        let run = sequencer.run(projector, camera1, camera2)?;
        if self.config.cache_frames {
            self.frame_cache().save(&run.frames)?;
        }
        run.into_frames()
    }

    /// Captured frames, or the cached ones when reuse is configured.
    pub fn acquire<P, C1, C2>(&self, projector: &mut P, camera1: &mut C1, camera2: &mut C2) -> Result<Vec<FramePair>>
    where
        P: Projector + ?Sized,
        C1: Camera + ?Sized,
        C2: Camera + ?Sized,
    {
        if self.config.reuse_cached_frames {
            log::warn!("Reusing cached frames from {:?}", self.config.cache_dir);
            self.frame_cache().load(&self.generator.config().pattern_sequence())
        } else {
            self.capture(projector, camera1, camera2)
        }
    }

    /// Decode one camera and drop low-contrast pixels.
    pub fn decode_camera(&self, frames: &[FramePair], side: CameraSide) -> Result<DecodedCode> {
        let images = frames_for(frames, side);
        let (width, height) = (self.config.camera_width, self.config.camera_height);

        let mut code = self.decoder.decode(&images, width, height)?;
        let decoded = code.valid_count();
        let mask = contrast_mask(&images, width, height, self.config.reconstruction.contrast_threshold);
        code.retain_mask(&mask);

        log::info!(
            "{}: {} pixels decoded, {} after contrast mask",
            side,
            decoded,
            code.valid_count()
        );
        Ok(code)
    }

    /// Turn a complete set of frames into a point cloud.
    pub fn process(&self, frames: &[FramePair]) -> Result<ScanOutput> {
        let expected = self.generator.config().total_patterns();
        if frames.len() != expected {
            return Err(ScanError::InvalidConfig(format!(
                "expected {} frame pairs, got {}",
                expected,
                frames.len()
            )));
        }

        let primary = self.decode_camera(frames, CameraSide::First)?;
        let secondary = match self.config.second_view {
            SecondViewKind::Projector => None,
            SecondViewKind::Camera => Some(self.decode_camera(frames, CameraSide::Second)?),
        };
        let second = match &secondary {
            None => SecondView::Projector,
            Some(code) => SecondView::Camera(code),
        };

        let (mut cloud, reconstruction) = match self.config.layout {
            CloudLayout::Sparse => self.reconstructor.reconstruct_sparse(&primary, second)?,
            CloudLayout::Dense => self.reconstructor.reconstruct_dense(&primary, second)?,
        };

        let filter = match cloud.as_grid_mut() {
            Some(grid) if self.config.filter.enabled => {
                let report = filter_outliers(grid, self.config.filter.deviation);
                log::info!("Filter kept {} of {} points", report.after, report.before);
                Some(report)
            }
            _ => None,
        };
        if cloud.valid_count() == 0 {
            return Err(ScanError::EmptyResult("every point was filtered out".to_string()));
        }

        Ok(ScanOutput {
            cloud,
            reconstruction,
            filter,
        })
    }

    /// Acquire frames and reconstruct.
    pub fn scan<P, C1, C2>(&self, projector: &mut P, camera1: &mut C1, camera2: &mut C2) -> Result<ScanOutput>
    where
        P: Projector + ?Sized,
        C1: Camera + ?Sized,
        C2: Camera + ?Sized,
    {
        let frames = self.acquire(projector, camera1, camera2)?;
        self.process(&frames)
    }

    /// Scan and hand the cloud to `sink`.
    pub fn scan_into<P, C1, C2, S>(
        &self,
        projector: &mut P,
        camera1: &mut C1,
        camera2: &mut C2,
        sink: &mut S,
    ) -> Result<ScanOutput>
    where
        P: Projector + ?Sized,
        C1: Camera + ?Sized,
        C2: Camera + ?Sized,
        S: PointCloudSink + ?Sized,
    {
        let output = self.scan(projector, camera1, camera2)?;
        sink.send(&output.cloud)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{load_pcd, PcdDirectorySink, PcdEncoding};
    use crate::stereo::ReconstructionConfig;
    use crate::synthetic::PlaneScene;
    use approx::assert_relative_eq;
    use image::GrayImage;

    fn scene_config(scene: &PlaneScene, second_view: SecondViewKind, layout: CloudLayout) -> ScannerConfig {
        let (camera_width, camera_height) = scene.camera_size();
        ScannerConfig {
            camera_width,
            camera_height,
            projector_width: scene.projector_width,
            projector_height: scene.projector_height,
            pre_delay_ms: 0,
            post_delay_ms: 0,
            reconstruction: ReconstructionConfig {
                min_points: 1,
                ..ReconstructionConfig::default()
            },
            second_view,
            layout,
            ..ScannerConfig::default()
        }
    }

    fn scan_plane(second_view: SecondViewKind) -> ScanOutput {
        let scene = PlaneScene::new(4, 4, 16);
        let scanner = Scanner::new(
            scene_config(&scene, second_view, CloudLayout::Sparse),
            &scene.calibration(second_view).unwrap(),
        )
        .unwrap();
        let (mut projector, mut camera1, mut camera2) = scene.rig();
        scanner.scan(&mut projector, &mut camera1, &mut camera2).unwrap()
    }

    #[test]
    fn test_plane_with_projector_view() {
        let output = scan_plane(SecondViewKind::Projector);
        let points = output.cloud.finite_points();
        assert_eq!(points.len(), 16);
        assert_eq!(output.reconstruction.accepted, 16);
        for p in &points {
            assert_relative_eq!(p[2], 2.0, epsilon = 1e-4);
        }
        assert!(output.filter.is_none());
    }

    #[test]
    fn test_plane_with_second_camera() {
        let output = scan_plane(SecondViewKind::Camera);
        let points = output.cloud.finite_points();
        assert_eq!(points.len(), 16);
        assert_eq!(output.reconstruction.unmatched, 0);
        for p in &points {
            assert_relative_eq!(p[2], 2.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_dense_plane_is_filtered() {
        let scene = PlaneScene::new(4, 4, 16);
        let config = scene_config(&scene, SecondViewKind::Projector, CloudLayout::Dense);
        let scanner = Scanner::new(config, &scene.calibration(SecondViewKind::Projector).unwrap()).unwrap();
        let (mut projector, mut camera1, mut camera2) = scene.rig();

        let output = scanner.scan(&mut projector, &mut camera1, &mut camera2).unwrap();
        let grid = output.cloud.as_grid().unwrap();
        assert_eq!((grid.width, grid.height), (64, 64));
        // Every camera pixel is a candidate; quantized ones may miss.
        let report = output.reconstruction;
        assert_eq!(report.candidates, 64 * 64);
        assert_eq!(report.accepted + report.too_far, 64 * 64);
        let filter = output.filter.unwrap();
        assert_eq!(filter.before, report.accepted);
        assert!(filter.after > 0);
        assert!(filter.after <= filter.before);
    }

    #[test]
    fn test_dark_scene_is_empty_result() {
        let scene = PlaneScene::new(4, 4, 16);
        let scanner = Scanner::new(
            scene_config(&scene, SecondViewKind::Projector, CloudLayout::Sparse),
            &scene.calibration(SecondViewKind::Projector).unwrap(),
        )
        .unwrap();

        let dark = GrayImage::new(64, 64);
        let frames: Vec<FramePair> = scanner
            .generator()
            .config()
            .pattern_sequence()
            .into_iter()
            .enumerate()
            .map(|(i, kind)| {
                let mut pair = FramePair::empty(i, kind);
                pair.first = Some(dark.clone());
                pair.second = Some(dark.clone());
                pair
            })
            .collect();

        assert!(matches!(scanner.process(&frames), Err(ScanError::EmptyResult(_))));
    }

    #[test]
    fn test_capture_failure_aborts_scan() {
        let scene = PlaneScene::new(4, 4, 16);
        let scanner = Scanner::new(
            scene_config(&scene, SecondViewKind::Projector, CloudLayout::Sparse),
            &scene.calibration(SecondViewKind::Projector).unwrap(),
        )
        .unwrap();
        let (mut projector, mut camera1, mut camera2) = scene.rig();
        camera2.fail_on = Some(4);

        match scanner.scan(&mut projector, &mut camera1, &mut camera2) {
            Err(ScanError::Capture(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 4);
                assert_eq!(failures[0].camera, CameraSide::Second);
            }
            other => panic!("expected capture failure, got {:?}", other.map(|o| o.reconstruction)),
        }
    }

    #[test]
    fn test_cached_frames_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let scene = PlaneScene::new(4, 4, 16);
        let calibration = scene.calibration(SecondViewKind::Projector).unwrap();
        let mut config = scene_config(&scene, SecondViewKind::Projector, CloudLayout::Sparse);
        config.cache_dir = dir.path().join("frames");
        config.cache_frames = true;

        let scanner = Scanner::new(config.clone(), &calibration).unwrap();
        let (mut projector, mut camera1, mut camera2) = scene.rig();
        let first = scanner.scan(&mut projector, &mut camera1, &mut camera2).unwrap();

        config.cache_frames = false;
        config.reuse_cached_frames = true;
        let replay = Scanner::new(config, &calibration).unwrap();
        let (mut projector, mut camera1, mut camera2) = scene.rig();
        let second = replay.scan(&mut projector, &mut camera1, &mut camera2).unwrap();

        assert_eq!(camera1.reads(), 0);
        assert_eq!(second.cloud, first.cloud);
    }

    #[test]
    fn test_scan_into_sink() {
        let dir = tempfile::tempdir().unwrap();
        let scene = PlaneScene::new(4, 4, 16);
        let scanner = Scanner::new(
            scene_config(&scene, SecondViewKind::Camera, CloudLayout::Sparse),
            &scene.calibration(SecondViewKind::Camera).unwrap(),
        )
        .unwrap();
        let (mut projector, mut camera1, mut camera2) = scene.rig();
        let mut sink = PcdDirectorySink::new(dir.path(), PcdEncoding::Binary);

        let output = scanner
            .scan_into(&mut projector, &mut camera1, &mut camera2, &mut sink)
            .unwrap();
        let saved = load_pcd(&dir.path().join("pointcloud_1.pcd")).unwrap();
        assert_eq!(saved.finite_points(), output.cloud.finite_points());
    }
}

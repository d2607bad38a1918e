//! Correspondence gathering and point cloud reconstruction.

use super::triangulate::{StereoGeometry, Triangulated};
use crate::calibration::CalibrationParams;
use crate::cloud::{DenseCloud, PointCloud};
use crate::error::{Result, ScanError};
use crate::structured_light::DecodedCode;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Projector coordinate `(column, row)` used to match pixels across views.
pub type ProjectorKey = (u32, u32);

/// Thresholds for accepting reconstructed points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Minimum brightness swing across the capture for a pixel to count.
    pub contrast_threshold: u8,
    /// Maximum distance between the two rays at their closest approach.
    pub max_distance: f64,
    /// Fewer accepted points than this is treated as a failed scan.
    pub min_points: usize,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            contrast_threshold: 25,
            max_distance: 100.0,
            min_points: 100,
        }
    }
}

/// Where the view 2 coordinate of a correspondence comes from.
#[derive(Debug, Clone, Copy)]
pub enum SecondView<'a> {
    /// The projector acts as an inverse camera; its pixel is the decoded code.
    Projector,
    /// A second camera, matched by decoded code.
    Camera(&'a DecodedCode),
}

/// Tally of what happened to each candidate correspondence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructionReport {
    pub candidates: usize,
    pub accepted: usize,
    pub parallel: usize,
    pub too_far: usize,
    /// Codes seen by camera 1 but not by camera 2.
    pub unmatched: usize,
}

impl ReconstructionReport {
    fn record(&mut self, outcome: &Triangulated) {
        match outcome {
            Triangulated::Accepted(_) => self.accepted += 1,
            Triangulated::Parallel => self.parallel += 1,
            Triangulated::TooFar(_) => self.too_far += 1,
        }
    }
}

/// Per-pixel contrast check over every captured frame.
///
/// A pixel whose brightness never swings by at least `threshold` was not lit
/// by the projector and cannot be trusted.
pub fn contrast_mask(frames: &[Option<&GrayImage>], width: u32, height: u32, threshold: u8) -> Vec<bool> {
    let size = (width * height) as usize;
    let mut lo = vec![u8::MAX; size];
    let mut hi = vec![u8::MIN; size];
    let mut seen = false;

    for frame in frames.iter().flatten() {
        if frame.dimensions() != (width, height) {
            log::warn!(
                "Skipping {}x{} frame in contrast mask ({}x{} expected)",
                frame.width(),
                frame.height(),
                width,
                height
            );
            continue;
        }
        seen = true;
        for (idx, &value) in frame.as_raw().iter().enumerate() {
            lo[idx] = lo[idx].min(value);
            hi[idx] = hi[idx].max(value);
        }
    }

    if !seen {
        return vec![false; size];
    }
    lo.iter().zip(&hi).map(|(&l, &h)| h - l >= threshold).collect()
}

/// Mean camera pixel for every decoded projector coordinate.
pub fn code_centroids(code: &DecodedCode) -> BTreeMap<ProjectorKey, (f64, f64)> {
    let mut sums: BTreeMap<ProjectorKey, (f64, f64, u32)> = BTreeMap::new();
    for y in 0..code.camera_height {
        for x in 0..code.camera_width {
            let Some(key) = code.get(x, y) else { continue };
            if key.0 >= code.projector_width || key.1 >= code.projector_height {
                continue;
            }
            let entry = sums.entry(key).or_insert((0.0, 0.0, 0));
            entry.0 += x as f64;
            entry.1 += y as f64;
            entry.2 += 1;
        }
    }
    sums.into_iter()
        .map(|(key, (sx, sy, n))| (key, (sx / n as f64, sy / n as f64)))
        .collect()
}

/// Triangulates decoded correspondences into a point cloud.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    geometry: StereoGeometry,
    config: ReconstructionConfig,
}

impl Reconstructor {
    pub fn new(params: &CalibrationParams, config: ReconstructionConfig) -> Result<Self> {
        if !(config.max_distance > 0.0) {
            return Err(ScanError::InvalidConfig(format!(
                "max_distance must be positive, got {}",
                config.max_distance
            )));
        }
        Ok(Self {
            geometry: StereoGeometry::from_params(params)?,
            config,
        })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn geometry(&self) -> &StereoGeometry {
        &self.geometry
    }

    /// One point per projector coordinate, from the centroid of the camera
    /// pixels that decoded to it.
    pub fn reconstruct_sparse(
        &self,
        primary: &DecodedCode,
        second: SecondView<'_>,
    ) -> Result<(PointCloud, ReconstructionReport)> {
        let first_points = code_centroids(primary);
        let second_points = match second {
            SecondView::Projector => None,
            SecondView::Camera(code) => Some(code_centroids(code)),
        };

        let mut report = ReconstructionReport::default();
        let mut points = Vec::new();
        for (key, first) in &first_points {
            let second = match &second_points {
                None => (key.0 as f64, key.1 as f64),
                Some(map) => match map.get(key) {
                    Some(&p) => p,
                    None => {
                        report.unmatched += 1;
                        continue;
                    }
                },
            };

            report.candidates += 1;
            let outcome = self.geometry.triangulate(*first, second, self.config.max_distance);
            report.record(&outcome);
            if let Triangulated::Accepted(p) = outcome {
                points.push([p.x as f32, p.y as f32, p.z as f32]);
            }
        }

        self.finish(PointCloud::List(points), report)
    }

    /// One point per camera 1 pixel, laid out on the camera 1 grid.
    pub fn reconstruct_dense(
        &self,
        primary: &DecodedCode,
        second: SecondView<'_>,
    ) -> Result<(PointCloud, ReconstructionReport)> {
        let second_points = match second {
            SecondView::Projector => None,
            SecondView::Camera(code) => Some(code_centroids(code)),
        };

        let mut report = ReconstructionReport::default();
        let mut cloud = DenseCloud::new(primary.camera_width, primary.camera_height);
        for y in 0..primary.camera_height {
            for x in 0..primary.camera_width {
                let Some(key) = primary.get(x, y) else { continue };
                if key.0 >= primary.projector_width || key.1 >= primary.projector_height {
                    continue;
                }
                let second = match &second_points {
                    None => (key.0 as f64, key.1 as f64),
                    Some(map) => match map.get(&key) {
                        Some(&p) => p,
                        None => {
                            report.unmatched += 1;
                            continue;
                        }
                    },
                };

                report.candidates += 1;
                let outcome = self
                    .geometry
                    .triangulate((x as f64, y as f64), second, self.config.max_distance);
                report.record(&outcome);
                if let Triangulated::Accepted(p) = outcome {
                    cloud.set(x, y, [p.x as f32, p.y as f32, p.z as f32]);
                }
            }
        }

        self.finish(PointCloud::Grid(cloud), report)
    }

    fn finish(
        &self,
        cloud: PointCloud,
        report: ReconstructionReport,
    ) -> Result<(PointCloud, ReconstructionReport)> {
        log::info!(
            "Triangulated {} of {} correspondences ({} parallel, {} too far, {} unmatched)",
            report.accepted,
            report.candidates,
            report.parallel,
            report.too_far,
            report.unmatched
        );
        if report.accepted == 0 || report.accepted < self.config.min_points {
            return Err(ScanError::EmptyResult(format!(
                "{} point(s) reconstructed, at least {} required",
                report.accepted,
                self.config.min_points.max(1)
            )));
        }
        Ok((cloud, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    const PROJECTOR: u32 = 8;

    /// Camera 1 with the projector beside it, both looking straight ahead.
    fn params() -> CalibrationParams {
        let k = [[8.0, 0.0, 3.5], [0.0, 8.0, 3.5], [0.0, 0.0, 1.0]];
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        CalibrationParams::new(k, vec![], k, vec![], identity, [-0.5, 0.0, 0.0]).unwrap()
    }

    /// Camera 1 sees a plane at depth `z`: pixel `x` lights up with projector
    /// column `x - 4/z`.
    fn plane_code(z: f64) -> DecodedCode {
        let mut code = DecodedCode::new(PROJECTOR, PROJECTOR, PROJECTOR, PROJECTOR);
        let shift = (8.0 * 0.5 / z).round() as i32;
        for y in 0..PROJECTOR {
            for x in 0..PROJECTOR {
                let col = x as i32 - shift;
                if col >= 0 {
                    let idx = (y * PROJECTOR + x) as usize;
                    code.projector_x[idx] = col;
                    code.projector_y[idx] = y as i32;
                    code.valid_mask[idx] = true;
                }
            }
        }
        code
    }

    fn lenient() -> ReconstructionConfig {
        ReconstructionConfig {
            min_points: 1,
            ..ReconstructionConfig::default()
        }
    }

    #[test]
    fn test_contrast_mask() {
        let dark = GrayImage::new(2, 1);
        let mut lit = GrayImage::new(2, 1);
        lit.put_pixel(0, 0, Luma([200]));
        lit.put_pixel(1, 0, Luma([20]));

        let mask = contrast_mask(&[Some(&dark), None, Some(&lit)], 2, 1, 25);
        assert_eq!(mask, vec![true, false]);
        assert_eq!(contrast_mask(&[None, None], 2, 1, 25), vec![false, false]);
    }

    #[test]
    fn test_centroids_group_by_code() {
        let mut code = DecodedCode::new(4, 1, 2, 1);
        for (idx, col) in [0, 0, 1, 1].into_iter().enumerate() {
            code.projector_x[idx] = col;
            code.projector_y[idx] = 0;
            code.valid_mask[idx] = true;
        }
        code.invalidate(3);

        let centroids = code_centroids(&code);
        assert_eq!(centroids.len(), 2);
        assert_eq!(centroids[&(0, 0)], (0.5, 0.0));
        assert_eq!(centroids[&(1, 0)], (2.0, 0.0));
    }

    #[test]
    fn test_sparse_projector_mode() {
        let reconstructor = Reconstructor::new(&params(), lenient()).unwrap();
        let (cloud, report) = reconstructor
            .reconstruct_sparse(&plane_code(2.0), SecondView::Projector)
            .unwrap();

        // Columns 0..6 of each row are visible.
        assert_eq!(report.candidates, 6 * 8);
        assert_eq!(report.accepted, 6 * 8);
        for p in cloud.finite_points() {
            assert_relative_eq!(p[2], 2.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_dense_projector_mode() {
        let reconstructor = Reconstructor::new(&params(), lenient()).unwrap();
        let (cloud, report) = reconstructor
            .reconstruct_dense(&plane_code(2.0), SecondView::Projector)
            .unwrap();

        let grid = cloud.as_grid().unwrap();
        assert_eq!((grid.width, grid.height), (8, 8));
        assert_eq!(report.accepted, 48);
        assert_eq!(grid.get(0, 0), None);
        let p = grid.get(5, 3).unwrap();
        assert_relative_eq!(p[2], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_camera_mode_skips_unmatched() {
        let reconstructor = Reconstructor::new(&params(), lenient()).unwrap();
        let primary = plane_code(2.0);
        let mut second = DecodedCode::new(PROJECTOR, PROJECTOR, PROJECTOR, PROJECTOR);
        // Camera 2 only sees row 0, at the projector's own position.
        for x in 0..PROJECTOR {
            second.projector_x[x as usize] = x as i32;
            second.projector_y[x as usize] = 0;
            second.valid_mask[x as usize] = true;
        }

        let (_, report) = reconstructor
            .reconstruct_sparse(&primary, SecondView::Camera(&second))
            .unwrap();
        assert_eq!(report.candidates, 6);
        assert_eq!(report.unmatched, 6 * 7);
        assert_eq!(report.accepted, 6);
    }

    #[test]
    fn test_far_rays_rejected() {
        let config = ReconstructionConfig {
            max_distance: 1e-6,
            min_points: 1,
            ..ReconstructionConfig::default()
        };
        let reconstructor = Reconstructor::new(&params(), config).unwrap();
        let mut code = plane_code(2.0);
        // Wrong row: the rays are skew.
        code.projector_y.iter_mut().for_each(|row| *row = (*row + 3) % 8);

        let result = reconstructor.reconstruct_sparse(&code, SecondView::Projector);
        assert!(matches!(result, Err(ScanError::EmptyResult(_))));
    }

    #[test]
    fn test_empty_decode_is_empty_result() {
        let reconstructor = Reconstructor::new(&params(), ReconstructionConfig::default()).unwrap();
        let nothing = DecodedCode::new(8, 8, 8, 8);
        assert!(matches!(
            reconstructor.reconstruct_sparse(&nothing, SecondView::Projector),
            Err(ScanError::EmptyResult(_))
        ));

        // 48 points is under the default minimum of 100.
        assert!(matches!(
            reconstructor.reconstruct_dense(&plane_code(2.0), SecondView::Projector),
            Err(ScanError::EmptyResult(_))
        ));
    }
}

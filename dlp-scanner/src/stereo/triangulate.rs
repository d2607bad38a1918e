//! Ray triangulation by closest approach.

use crate::calibration::{BrownConrady, CalibrationParams};
use crate::error::Result;
use nalgebra::{Matrix3, Vector2, Vector3};

/// Below this Gram determinant (unit directions) the rays are treated as parallel.
pub const PARALLEL_EPSILON: f64 = 1e-9;

/// Pinhole camera with lens distortion.
#[derive(Debug, Clone)]
pub struct PinholeCamera {
    k_inv: Matrix3<f64>,
    distortion: BrownConrady,
}

impl PinholeCamera {
    pub fn new(k: &Matrix3<f64>, distortion: BrownConrady) -> Option<Self> {
        Some(Self {
            k_inv: k.try_inverse()?,
            distortion,
        })
    }

    /// Unit viewing direction through pixel `(x, y)`, in the camera frame.
    pub fn ray_direction(&self, x: f64, y: f64) -> Vector3<f64> {
        let v = self.k_inv * Vector3::new(x, y, 1.0);
        let n = self.distortion.undistort(&Vector2::new(v.x / v.z, v.y / v.z));
        Vector3::new(n.x, n.y, 1.0).normalize()
    }
}

/// A ray in camera 1 coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vector3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    pub fn at(&self, s: f64) -> Vector3<f64> {
        self.origin + self.direction * s
    }
}

/// Closest points of two rays.
#[derive(Debug, Clone, Copy)]
pub struct ClosestApproach {
    /// Midpoint between the closest points.
    pub midpoint: Vector3<f64>,
    /// Distance between the closest points.
    pub separation: f64,
}

/// Find where two rays come closest.
///
/// Minimizes `|o1 + s*d1 - o2 - t*d2|^2`. The normal equations form a
/// symmetric 2x2 system over the Gram matrix of the directions, solved with
/// Cramer's rule. Returns `None` when the determinant vanishes.
pub fn closest_approach(ray1: &Ray, ray2: &Ray) -> Option<ClosestApproach> {
    let d1 = ray1.direction;
    let d2 = ray2.direction;
    let w = ray1.origin - ray2.origin;

    let a = d1.dot(&d1);
    let b = d1.dot(&d2);
    let c = d2.dot(&d2);
    let d = d1.dot(&w);
    let e = d2.dot(&w);

    let det = a * c - b * b;
    if det.abs() < PARALLEL_EPSILON * a * c {
        return None;
    }

    let s = (b * e - c * d) / det;
    let t = (a * e - b * d) / det;

    let p1 = ray1.at(s);
    let p2 = ray2.at(t);
    Some(ClosestApproach {
        midpoint: (p1 + p2) * 0.5,
        separation: (p2 - p1).norm(),
    })
}

/// Outcome of triangulating one correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Triangulated {
    Accepted(Vector3<f64>),
    /// Rays are (near) parallel.
    Parallel,
    /// Rays pass further apart than the acceptance threshold.
    TooFar(f64),
}

/// Both views of a calibrated pair, expressed in view 1 coordinates.
#[derive(Debug, Clone)]
pub struct StereoGeometry {
    first: PinholeCamera,
    second: PinholeCamera,
    /// `R^T`, rotates view 2 directions into view 1.
    rotation_t: Matrix3<f64>,
    /// View 2 center in view 1 coordinates, `-R^T T`.
    second_origin: Vector3<f64>,
}

impl StereoGeometry {
    pub fn from_params(params: &CalibrationParams) -> Result<Self> {
        params.validate()?;
        let singular = || crate::error::ScanError::InvalidCalibration("singular intrinsic matrix".to_string());

        let first = PinholeCamera::new(&params.intrinsics1(), params.distortion1()?).ok_or_else(singular)?;
        let second = PinholeCamera::new(&params.intrinsics2(), params.distortion2()?).ok_or_else(singular)?;
        let rotation_t = params.rotation().transpose();
        let second_origin = -(rotation_t * params.translation());

        Ok(Self {
            first,
            second,
            rotation_t,
            second_origin,
        })
    }

    /// Ray through a view 1 pixel.
    pub fn first_ray(&self, x: f64, y: f64) -> Ray {
        Ray {
            origin: Vector3::zeros(),
            direction: self.first.ray_direction(x, y),
        }
    }

    /// Ray through a view 2 pixel, moved into view 1 coordinates.
    pub fn second_ray(&self, x: f64, y: f64) -> Ray {
        Ray {
            origin: self.second_origin,
            direction: self.rotation_t * self.second.ray_direction(x, y),
        }
    }

    /// Triangulate a view 1 pixel against a view 2 pixel.
    pub fn triangulate(&self, first: (f64, f64), second: (f64, f64), max_distance: f64) -> Triangulated {
        let ray1 = self.first_ray(first.0, first.1);
        let ray2 = self.second_ray(second.0, second.1);

        match closest_approach(&ray1, &ray2) {
            None => Triangulated::Parallel,
            Some(approach) if approach.separation < max_distance => Triangulated::Accepted(approach.midpoint),
            Some(approach) => Triangulated::TooFar(approach.separation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn k(f: f64, cx: f64, cy: f64) -> [[f64; 3]; 3] {
        [[f, 0.0, cx], [0.0, f, cy], [0.0, 0.0, 1.0]]
    }

    fn rotation_y(angle: f64) -> [[f64; 3]; 3] {
        let (s, c) = angle.sin_cos();
        [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
    }

    fn project(k: &[[f64; 3]; 3], p: &Vector3<f64>) -> (f64, f64) {
        (k[0][0] * p.x / p.z + k[0][2], k[1][1] * p.y / p.z + k[1][2])
    }

    #[test]
    fn test_intersecting_rays() {
        let ray1 = Ray {
            origin: Vector3::zeros(),
            direction: Vector3::new(1.0, 0.0, 1.0).normalize(),
        };
        let ray2 = Ray {
            origin: Vector3::new(2.0, 0.0, 0.0),
            direction: Vector3::new(-1.0, 0.0, 1.0).normalize(),
        };
        let approach = closest_approach(&ray1, &ray2).unwrap();
        assert_relative_eq!(approach.midpoint, Vector3::new(1.0, 0.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(approach.separation, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_skew_rays() {
        // Along x at z = 0, and along y at z = 1, offset in x.
        let ray1 = Ray {
            origin: Vector3::new(-5.0, 0.0, 0.0),
            direction: Vector3::new(1.0, 0.0, 0.0),
        };
        let ray2 = Ray {
            origin: Vector3::new(3.0, -4.0, 1.0),
            direction: Vector3::new(0.0, 1.0, 0.0),
        };
        let approach = closest_approach(&ray1, &ray2).unwrap();
        assert_relative_eq!(approach.midpoint, Vector3::new(3.0, 0.0, 0.5), epsilon = 1e-12);
        assert_relative_eq!(approach.separation, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_rays_rejected() {
        let ray1 = Ray {
            origin: Vector3::zeros(),
            direction: Vector3::new(0.0, 0.0, 1.0),
        };
        let ray2 = Ray {
            origin: Vector3::new(1.0, 0.0, 0.0),
            direction: Vector3::new(0.0, 0.0, 2.0),
        };
        assert!(closest_approach(&ray1, &ray2).is_none());
    }

    #[test]
    fn test_reconstructs_known_point() {
        let k1 = k(800.0, 320.0, 240.0);
        let k2 = k(600.0, 300.0, 200.0);
        let r = rotation_y(-0.2);
        let t = [-0.3, 0.02, 0.05];
        let params = CalibrationParams::new(k1, vec![], k2, vec![], r, t).unwrap();
        let geometry = StereoGeometry::from_params(&params).unwrap();

        let point = Vector3::new(0.15, -0.1, 2.5);
        let in_second = params.rotation() * point + params.translation();

        let result = geometry.triangulate(project(&k1, &point), project(&k2, &in_second), 1e-3);
        match result {
            Triangulated::Accepted(p) => assert_relative_eq!(p, point, epsilon = 1e-9),
            other => panic!("expected a point, got {:?}", other),
        }
    }

    #[test]
    fn test_reconstructs_through_distortion() {
        let k1 = k(800.0, 320.0, 240.0);
        let d1 = vec![-0.1, 0.02, 0.0, 0.0, 0.0];
        let r = rotation_y(0.0);
        let t = [-0.2, 0.0, 0.0];
        let params = CalibrationParams::new(k1, d1.clone(), k1, vec![], r, t).unwrap();
        let geometry = StereoGeometry::from_params(&params).unwrap();

        let point = Vector3::new(0.3, 0.2, 2.0);
        let distortion = BrownConrady::from_coefficients(&d1).unwrap();
        let distorted = distortion.distort(&Vector2::new(point.x / point.z, point.y / point.z));
        let first = (800.0 * distorted.x + 320.0, 800.0 * distorted.y + 240.0);
        let second = project(&k1, &(point + params.translation()));

        match geometry.triangulate(first, second, 1e-3) {
            Triangulated::Accepted(p) => assert_relative_eq!(p, point, epsilon = 1e-6),
            other => panic!("expected a point, got {:?}", other),
        }
    }

    #[test]
    fn test_parallel_views_rejected() {
        // Pure sideways baseline: both principal rays point straight ahead.
        let k1 = k(500.0, 100.0, 100.0);
        let params = CalibrationParams::new(k1, vec![], k1, vec![], rotation_y(0.0), [0.5, 0.0, 0.0]).unwrap();
        let geometry = StereoGeometry::from_params(&params).unwrap();
        assert_eq!(geometry.triangulate((100.0, 100.0), (100.0, 100.0), 100.0), Triangulated::Parallel);
    }

    #[test]
    fn test_too_far_rejected() {
        let k1 = k(500.0, 100.0, 100.0);
        let params = CalibrationParams::new(k1, vec![], k1, vec![], rotation_y(0.0), [-0.5, 0.0, 0.0]).unwrap();
        let geometry = StereoGeometry::from_params(&params).unwrap();
        // Rows disagree by a lot: the rays converge in x but miss in y.
        match geometry.triangulate((150.0, 50.0), (100.0, 400.0), 0.01) {
            Triangulated::TooFar(separation) => assert!(separation > 0.01),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}

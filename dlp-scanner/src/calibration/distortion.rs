//! Brown-Conrady lens distortion.

use crate::error::{Result, ScanError};
use nalgebra::Vector2;

/// Radial/tangential distortion in OpenCV coefficient order
/// `k1 k2 p1 p2 [k3]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BrownConrady {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    /// Fixed-point iterations for undistortion (0 = default of 8).
    pub iters: u32,
}

impl BrownConrady {
    /// Build from a coefficient vector of length 0, 4 or 5.
    pub fn from_coefficients(coefficients: &[f64]) -> Result<Self> {
        let c = coefficients;
        match c.len() {
            0 => Ok(Self::default()),
            4 => Ok(Self {
                k1: c[0],
                k2: c[1],
                p1: c[2],
                p2: c[3],
                ..Self::default()
            }),
            5 => Ok(Self {
                k1: c[0],
                k2: c[1],
                p1: c[2],
                p2: c[3],
                k3: c[4],
                ..Self::default()
            }),
            n => Err(ScanError::InvalidCalibration(format!(
                "expected 0, 4 or 5 distortion coefficients, got {}",
                n
            ))),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }

    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`distort`](Self::distort) by fixed-point iteration.
    pub fn undistort(&self, n_dist: &Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return *n_dist;
        }

        let iters = if self.iters == 0 { 8 } else { self.iters };
        let mut n = *n_dist;
        for _ in 0..iters {
            let error = self.distort(&n) - n_dist;
            n -= error;
        }
        n
    }
}

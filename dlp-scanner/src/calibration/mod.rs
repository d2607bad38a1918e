//! Stereo calibration parameters consumed by the reconstructor.
//!
//! Calibration itself happens elsewhere; this module only loads, validates
//! and converts the result. View 1 is always camera 1. View 2 is either the
//! projector (treated as an inverse camera) or camera 2, depending on the
//! reconstruction mode. `R` and `T` map view 1 coordinates into view 2:
//! `X2 = R * X1 + T`.

mod distortion;

pub use distortion::BrownConrady;

use crate::error::{Result, ScanError};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ORTHONORMAL_TOLERANCE: f64 = 1e-5;

/// Intrinsics, distortion and relative pose of the two views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Intrinsic matrix of view 1 (row-major).
    pub k1: [[f64; 3]; 3],
    /// Distortion coefficients of view 1.
    #[serde(default)]
    pub d1: Vec<f64>,
    /// Intrinsic matrix of view 2 (row-major).
    pub k2: [[f64; 3]; 3],
    /// Distortion coefficients of view 2.
    #[serde(default)]
    pub d2: Vec<f64>,
    /// Rotation from view 1 to view 2 (row-major).
    pub r: [[f64; 3]; 3],
    /// Translation from view 1 to view 2.
    pub t: [f64; 3],
}

impl CalibrationParams {
    /// Build and validate.
    pub fn new(
        k1: [[f64; 3]; 3],
        d1: Vec<f64>,
        k2: [[f64; 3]; 3],
        d2: Vec<f64>,
        r: [[f64; 3]; 3],
        t: [f64; 3],
    ) -> Result<Self> {
        let params = Self { k1, d1, k2, d2, r, t };
        params.validate()?;
        Ok(params)
    }

    /// Load calibration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&contents)?;
        params.validate()?;
        log::info!("Loaded calibration from {:?}", path);
        Ok(params)
    }

    /// Save calibration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check the structural invariants of every matrix.
    pub fn validate(&self) -> Result<()> {
        validate_intrinsics("k1", &self.k1)?;
        validate_intrinsics("k2", &self.k2)?;
        BrownConrady::from_coefficients(&self.d1)?;
        BrownConrady::from_coefficients(&self.d2)?;

        if self.d1.iter().chain(&self.d2).chain(&self.t).any(|v| !v.is_finite()) {
            return Err(ScanError::InvalidCalibration("non-finite coefficient".to_string()));
        }

        let r = self.rotation();
        if r.iter().any(|v| !v.is_finite()) {
            return Err(ScanError::InvalidCalibration("non-finite rotation".to_string()));
        }
        let error = (r.transpose() * r - Matrix3::identity()).abs().max();
        if error > ORTHONORMAL_TOLERANCE {
            return Err(ScanError::InvalidCalibration(format!(
                "rotation is not orthonormal (error {:.2e})",
                error
            )));
        }
        if r.determinant() <= 0.0 {
            return Err(ScanError::InvalidCalibration("rotation is a reflection".to_string()));
        }

        Ok(())
    }

    pub fn intrinsics1(&self) -> Matrix3<f64> {
        to_matrix(&self.k1)
    }

    pub fn intrinsics2(&self) -> Matrix3<f64> {
        to_matrix(&self.k2)
    }

    pub fn distortion1(&self) -> Result<BrownConrady> {
        BrownConrady::from_coefficients(&self.d1)
    }

    pub fn distortion2(&self) -> Result<BrownConrady> {
        BrownConrady::from_coefficients(&self.d2)
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        to_matrix(&self.r)
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.t[0], self.t[1], self.t[2])
    }
}

fn to_matrix(m: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        m[0][0], m[0][1], m[0][2], //
        m[1][0], m[1][1], m[1][2], //
        m[2][0], m[2][1], m[2][2],
    )
}

fn validate_intrinsics(name: &str, k: &[[f64; 3]; 3]) -> Result<()> {
    let invalid = |reason: &str| Err(ScanError::InvalidCalibration(format!("{}: {}", name, reason)));

    if k.iter().flatten().any(|v| !v.is_finite()) {
        return invalid("non-finite entry");
    }
    if k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 {
        return invalid("not upper-triangular");
    }
    if k[0][0] <= 0.0 || k[1][1] <= 0.0 {
        return invalid("focal lengths must be positive");
    }
    if (k[2][2] - 1.0).abs() > 1e-12 {
        return invalid("K[2][2] must be 1");
    }
    Ok(())
}

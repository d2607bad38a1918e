//! Simulated projector and cameras looking at a flat wall.
//!
//! Camera 1 sits at the origin looking down +Z. The projector and camera 2
//! are shifted along X. All views are ideal pinholes with no distortion.
//! Each camera is `block` times the projector resolution and its principal
//! point is chosen so that every `block x block` pixel tile sees exactly one
//! projector pixel, and the tile centre maps to the centre of that pixel.

use crate::calibration::CalibrationParams;
use crate::camera::{Camera, CameraError};
use crate::config::SecondViewKind;
use crate::error::Result;
use crate::projector::{DisplayError, Projector};
use image::{DynamicImage, GrayImage, Luma};
use std::cell::RefCell;
use std::rc::Rc;

/// Image currently on the wall, shared between the projector and cameras.
pub type Screen = Rc<RefCell<Option<GrayImage>>>;

const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// A plane at fixed depth in front of a projector and two cameras.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneScene {
    pub projector_width: u32,
    pub projector_height: u32,
    /// Camera pixels per projector pixel along each axis.
    pub block: u32,
    /// Plane depth in camera 1 coordinates.
    pub depth: f64,
    /// X position of the projector centre.
    pub projector_x: f64,
    /// X position of camera 2's centre.
    pub camera2_x: f64,
}

impl PlaneScene {
    pub fn new(projector_width: u32, projector_height: u32, block: u32) -> Self {
        Self {
            projector_width,
            projector_height,
            block,
            depth: 2.0,
            projector_x: -0.1,
            camera2_x: 0.2,
        }
    }

    pub fn camera_size(&self) -> (u32, u32) {
        (self.projector_width * self.block, self.projector_height * self.block)
    }

    fn projector_focal(&self) -> f64 {
        self.projector_width as f64
    }

    fn projector_center(&self) -> (f64, f64) {
        (
            (self.projector_width as f64 - 1.0) / 2.0,
            (self.projector_height as f64 - 1.0) / 2.0,
        )
    }

    pub fn projector_intrinsics(&self) -> [[f64; 3]; 3] {
        let f = self.projector_focal();
        let (cx, cy) = self.projector_center();
        [[f, 0.0, cx], [0.0, f, cy], [0.0, 0.0, 1.0]]
    }

    /// Intrinsics of a camera whose centre is at `camera_x`.
    pub fn camera_intrinsics(&self, camera_x: f64) -> [[f64; 3]; 3] {
        let b = self.block as f64;
        let (pcx, pcy) = self.projector_center();
        // Projector coordinate seen by the camera's principal ray.
        let kx = pcx + self.projector_focal() * (camera_x - self.projector_x) / self.depth;
        let cx = b * (0.5 + kx) - 0.5;
        let cy = b * (0.5 + pcy) - 0.5;
        [[b * self.projector_focal(), 0.0, cx], [0.0, b * self.projector_focal(), cy], [0.0, 0.0, 1.0]]
    }

    /// Calibration between camera 1 and the chosen second view.
    pub fn calibration(&self, second: SecondViewKind) -> Result<CalibrationParams> {
        let k1 = self.camera_intrinsics(0.0);
        let (k2, x) = match second {
            SecondViewKind::Projector => (self.projector_intrinsics(), self.projector_x),
            SecondViewKind::Camera => (self.camera_intrinsics(self.camera2_x), self.camera2_x),
        };
        CalibrationParams::new(k1, vec![], k2, vec![], IDENTITY, [-x, 0.0, 0.0])
    }

    /// Projector and both cameras wired to one shared screen.
    pub fn rig(&self) -> (SyntheticProjector, SyntheticCamera, SyntheticCamera) {
        let screen: Screen = Rc::new(RefCell::new(None));
        let projector = SyntheticProjector {
            screen: screen.clone(),
            width: self.projector_width,
            height: self.projector_height,
        };
        let camera1 = SyntheticCamera::new(*self, 0.0, screen.clone());
        let camera2 = SyntheticCamera::new(*self, self.camera2_x, screen);
        (projector, camera1, camera2)
    }

    /// Projector pixel lighting camera pixel `(u, v)`, if any.
    fn projector_pixel(&self, intrinsics: &[[f64; 3]; 3], camera_x: f64, u: u32, v: u32) -> Option<(u32, u32)> {
        let x = (u as f64 - intrinsics[0][2]) * self.depth / intrinsics[0][0] + camera_x;
        let y = (v as f64 - intrinsics[1][2]) * self.depth / intrinsics[1][1];

        let f = self.projector_focal();
        let (pcx, pcy) = self.projector_center();
        let px = (f * (x - self.projector_x) / self.depth + pcx).round();
        let py = (f * y / self.depth + pcy).round();
        let inside = (0.0..self.projector_width as f64).contains(&px) && (0.0..self.projector_height as f64).contains(&py);
        inside.then_some((px as u32, py as u32))
    }
}

/// Projector that paints onto a [`Screen`].
pub struct SyntheticProjector {
    screen: Screen,
    width: u32,
    height: u32,
}

impl Projector for SyntheticProjector {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn display(&mut self, image: &GrayImage) -> std::result::Result<(), DisplayError> {
        *self.screen.borrow_mut() = Some(image.clone());
        Ok(())
    }
}

/// Noiseless camera photographing the plane.
pub struct SyntheticCamera {
    scene: PlaneScene,
    intrinsics: [[f64; 3]; 3],
    camera_x: f64,
    screen: Screen,
    reads: usize,
    /// Read number that fails, for exercising capture errors.
    pub fail_on: Option<usize>,
}

impl SyntheticCamera {
    fn new(scene: PlaneScene, camera_x: f64, screen: Screen) -> Self {
        Self {
            scene,
            intrinsics: scene.camera_intrinsics(camera_x),
            camera_x,
            screen,
            reads: 0,
            fail_on: None,
        }
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Camera for SyntheticCamera {
    fn set_resolution(&mut self, width: u32, height: u32) -> std::result::Result<(), CameraError> {
        if (width, height) != self.scene.camera_size() {
            log::debug!("Synthetic camera renders {:?}, frames will be resized", self.scene.camera_size());
        }
        Ok(())
    }

    fn capture(&mut self) -> std::result::Result<DynamicImage, CameraError> {
        let read = self.reads;
        self.reads += 1;
        if self.fail_on == Some(read) {
            return Err(CameraError::ReadFailed(format!("simulated failure on read {}", read)));
        }

        let screen = self.screen.borrow();
        let (width, height) = self.scene.camera_size();
        let frame = GrayImage::from_fn(width, height, |u, v| {
            let lit = screen.as_ref().and_then(|pattern| {
                self.scene
                    .projector_pixel(&self.intrinsics, self.camera_x, u, v)
                    .map(|(px, py)| pattern.get_pixel(px, py).0[0])
            });
            Luma([lit.unwrap_or(0)])
        });
        Ok(DynamicImage::ImageLuma8(frame))
    }
}

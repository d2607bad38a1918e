//! Camera input for structured light capture.
//!
//! Device drivers live outside this crate. A driver only has to implement
//! [`Camera`]; frames are converted to grayscale at the camera resolution the
//! scan is configured for.

mod frame_cache;

pub use frame_cache::FrameCache;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

/// Camera error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CameraError {
    #[error("camera not connected")]
    NotConnected,
    #[error("camera read failed: {0}")]
    ReadFailed(String),
    #[error("unsupported resolution {width}x{height}")]
    UnsupportedResolution { width: u32, height: u32 },
}

/// A camera that can be triggered from software.
pub trait Camera {
    /// Request a capture resolution. Drivers may deliver a different size;
    /// frames are resized afterwards.
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CameraError>;

    /// Block until one frame has been read.
    fn capture(&mut self) -> Result<DynamicImage, CameraError>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
        (**self).set_resolution(width, height)
    }

    fn capture(&mut self) -> Result<DynamicImage, CameraError> {
        (**self).capture()
    }
}

/// Convert a raw camera frame to grayscale at the requested size.
pub fn to_grayscale(frame: DynamicImage, width: u32, height: u32) -> GrayImage {
    let gray = frame.into_luma8();
    if gray.dimensions() == (width, height) {
        gray
    } else {
        log::debug!(
            "Resizing camera frame {}x{} -> {}x{}",
            gray.width(),
            gray.height(),
            width,
            height
        );
        image::imageops::resize(&gray, width, height, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_grayscale_keeps_size() {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([255, 255, 255])));
        let gray = to_grayscale(frame, 6, 4);
        assert_eq!(gray.dimensions(), (6, 4));
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_grayscale_resizes() {
        let frame = DynamicImage::ImageLuma8(GrayImage::from_pixel(12, 8, image::Luma([90])));
        let gray = to_grayscale(frame, 6, 4);
        assert_eq!(gray.dimensions(), (6, 4));
        assert!(gray.pixels().all(|p| p.0[0] == 90));
    }
}

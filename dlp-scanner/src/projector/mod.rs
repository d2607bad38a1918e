//! Projector output for structured light capture.

use image::imageops::FilterType;
use image::GrayImage;

/// Projector error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DisplayError {
    #[error("projector output unavailable")]
    Unavailable,
    #[error("failed to present pattern: {0}")]
    PresentFailed(String),
}

/// Something that can put a full-screen grayscale image on the projector.
pub trait Projector {
    /// Native output resolution (width, height).
    fn resolution(&self) -> (u32, u32);

    /// Show `image` until the next call. Blocks until the frame is presented.
    fn display(&mut self, image: &GrayImage) -> Result<(), DisplayError>;
}

impl<P: Projector + ?Sized> Projector for Box<P> {
    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }

    fn display(&mut self, image: &GrayImage) -> Result<(), DisplayError> {
        (**self).display(image)
    }
}

/// Scale a pattern to the projector's output size.
///
/// Nearest-neighbour keeps stripe edges binary.
pub fn fit_to_screen(pattern: &GrayImage, screen: (u32, u32)) -> Option<GrayImage> {
    if pattern.dimensions() == screen {
        None
    } else {
        Some(image::imageops::resize(pattern, screen.0, screen.1, FilterType::Nearest))
    }
}

/// Present a pattern, scaling it first when the screen differs from the
/// pattern resolution.
pub fn present<P: Projector + ?Sized>(projector: &mut P, pattern: &GrayImage) -> Result<(), DisplayError> {
    match fit_to_screen(pattern, projector.resolution()) {
        Some(scaled) => projector.display(&scaled),
        None => projector.display(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    struct Recorder {
        size: (u32, u32),
        shown: Vec<GrayImage>,
    }

    impl Projector for Recorder {
        fn resolution(&self) -> (u32, u32) {
            self.size
        }

        fn display(&mut self, image: &GrayImage) -> Result<(), DisplayError> {
            self.shown.push(image.clone());
            Ok(())
        }
    }

    #[test]
    fn test_present_scales_binary_pattern() {
        let pattern = GrayImage::from_fn(4, 2, |x, _| Luma([if x < 2 { 255 } else { 0 }]));
        let mut projector = Recorder { size: (12, 6), shown: Vec::new() };

        present(&mut projector, &pattern).unwrap();

        let shown = &projector.shown[0];
        assert_eq!(shown.dimensions(), (12, 6));
        assert!(shown.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert_eq!(shown.get_pixel(0, 0).0[0], 255);
        assert_eq!(shown.get_pixel(11, 5).0[0], 0);
    }

    #[test]
    fn test_present_same_size_is_untouched() {
        let pattern = GrayImage::from_pixel(4, 2, Luma([7]));
        let mut projector = Recorder { size: (4, 2), shown: Vec::new() };
        present(&mut projector, &pattern).unwrap();
        assert_eq!(projector.shown[0], pattern);
    }
}

//! Image processors backed by the `image` crate.

use crate::error::ProcessingError;
use crate::traits::ImageProcessor;
use image::imageops::FilterType;
use image::DynamicImage;

/// Scales an image to fit inside `width` x `height`, keeping its aspect
/// ratio.
#[derive(Debug, Clone)]
pub struct Resize {
    width: u32,
    height: u32,
    identifier: String,
}

impl Resize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            identifier: format!("resize-{}x{}", width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl ImageProcessor for Resize {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn process(&self, image: &DynamicImage) -> Result<DynamicImage, ProcessingError> {
        if self.width == 0 || self.height == 0 {
            return Err(ProcessingError::new(&self.identifier, "target size must be non-zero"));
        }
        Ok(image.resize(self.width, self.height, FilterType::Lanczos3))
    }
}

/// Converts to grayscale.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl ImageProcessor for Grayscale {
    fn identifier(&self) -> &str {
        "grayscale"
    }

    fn process(&self, image: &DynamicImage) -> Result<DynamicImage, ProcessingError> {
        Ok(image.grayscale())
    }
}

/// Gaussian blur with the given standard deviation.
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    sigma: f32,
    identifier: String,
}

impl GaussianBlur {
    pub fn new(sigma: f32) -> Self {
        Self {
            sigma,
            identifier: format!("gaussian-blur-{}", sigma),
        }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }
}

impl ImageProcessor for GaussianBlur {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn process(&self, image: &DynamicImage) -> Result<DynamicImage, ProcessingError> {
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(ProcessingError::new(&self.identifier, "sigma must be positive"));
        }
        Ok(image.blur(self.sigma))
    }
}

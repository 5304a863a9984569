//! Values produced by the pipeline.

use bytes::Bytes;
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;

/// A decoded image plus how it was obtained.
#[derive(Clone)]
pub struct ImageContainer {
    /// The decoded (and possibly processed) image
    pub image: Arc<DynamicImage>,
    /// True for progressive previews produced before the final decode
    pub is_preview: bool,
}

impl ImageContainer {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
            is_preview: false,
        }
    }

    pub fn preview(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
            is_preview: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Approximate memory footprint, assuming 4 bytes per pixel.
    pub fn cost(&self) -> usize {
        self.width() as usize * self.height() as usize * 4
    }
}

impl fmt::Debug for ImageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageContainer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("is_preview", &self.is_preview)
            .finish()
    }
}

/// Where a result was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Memory,
    Disk,
}

/// Response metadata reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    pub expected_content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub accepts_ranges: bool,
}

impl ResponseInfo {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Validator usable for a conditional range request, ETag preferred.
    pub fn validator(&self) -> Option<&str> {
        self.etag.as_deref().or(self.last_modified.as_deref())
    }

    /// True when the response carries a partial body (206).
    pub fn is_partial_content(&self) -> bool {
        self.status == 206
    }
}

/// Successful result of an image load.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub container: ImageContainer,
    /// `None` when the image came from the network
    pub cache_type: Option<CacheType>,
    /// `None` when the image came from a cache
    pub response: Option<ResponseInfo>,
}

impl ImageResponse {
    pub fn image(&self) -> &DynamicImage {
        &self.container.image
    }
}

/// Successful result of a data load.
#[derive(Debug, Clone)]
pub struct DataResponse {
    pub data: Bytes,
    pub response: Option<ResponseInfo>,
    pub cache_type: Option<CacheType>,
}

/// Download progress in bytes. `total` is zero while unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(completed: u64, total: u64) -> Self {
        Self { completed, total }
    }

    /// Fraction complete in `0.0..=1.0`, or `None` while the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.completed as f64 / self.total as f64).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_cost() {
        let container = ImageContainer::new(DynamicImage::new_rgba8(10, 20));
        assert_eq!(container.cost(), 800);
        assert!(!container.is_preview);
        assert!(ImageContainer::preview(DynamicImage::new_rgba8(1, 1)).is_preview);
    }

    #[test]
    fn test_validator_prefers_etag() {
        let mut info = ResponseInfo::new(200);
        assert_eq!(info.validator(), None);

        info.last_modified = Some("Wed, 21 Oct 2015 07:28:00 GMT".into());
        assert_eq!(info.validator(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));

        info.etag = Some("\"abc\"".into());
        assert_eq!(info.validator(), Some("\"abc\""));
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress::new(5, 0).fraction(), None);
        assert_eq!(Progress::new(5, 10).fraction(), Some(0.5));
        assert_eq!(Progress::new(20, 10).fraction(), Some(1.0));
    }
}

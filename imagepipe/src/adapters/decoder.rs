//! Decoder backed by the `image` crate.

use crate::error::DecodingError;
use crate::traits::Decoder;
use image::DynamicImage;

/// Decodes any format the `image` crate was built with.
///
/// The `image` crate has no incremental decoding, so a non-final call only
/// succeeds once the prefix happens to hold a complete image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRsDecoder;

impl Decoder for ImageRsDecoder {
    fn decode(&self, data: &[u8], _is_final: bool) -> Result<DynamicImage, DecodingError> {
        let format = image::guess_format(data).map_err(|_| DecodingError::UnsupportedFormat)?;
        image::load_from_memory_with_format(data, format).map_err(|e| DecodingError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decodes_png() {
        let image = ImageRsDecoder.decode(&png(3, 2), true).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[test]
    fn test_unknown_format() {
        let err = ImageRsDecoder.decode(b"definitely not an image", true).unwrap_err();
        assert_eq!(err, DecodingError::UnsupportedFormat);
    }

    #[test]
    fn test_truncated_png_is_malformed() {
        let bytes = png(16, 16);
        let err = ImageRsDecoder.decode(&bytes[..bytes.len() / 2], false).unwrap_err();
        assert!(matches!(err, DecodingError::Malformed(_)));
    }
}

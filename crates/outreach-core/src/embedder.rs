//! Embedder capability: image in, face descriptor (or nothing) out.

use crate::types::{Descriptor, DescriptorError};
use image::{ImageFormat, RgbImage};
use std::future::Future;
use thiserror::Error;

/// Upload limit applied before any decoding work.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 6 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image is empty")]
    Empty,
    #[error("image too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("unsupported image format — only PNG and JPEG are accepted")]
    UnsupportedFormat,
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedder produced an invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedder unavailable")]
    Unavailable,
}

/// A validated, decoded upload ready for the embedder.
#[derive(Clone)]
pub struct FaceImage {
    pub format: ImageFormat,
    pub rgb: RgbImage,
    /// Original encoded bytes, kept for archiving.
    pub encoded: Vec<u8>,
}

impl FaceImage {
    /// Check size and format, then decode to RGB.
    pub fn decode(bytes: Vec<u8>, max_bytes: usize) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() > max_bytes {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        let format = match image::guess_format(&bytes) {
            Ok(f @ (ImageFormat::Png | ImageFormat::Jpeg)) => f,
            _ => return Err(ImageError::UnsupportedFormat),
        };
        let rgb = image::load_from_memory_with_format(&bytes, format)?.to_rgb8();
        Ok(Self {
            format,
            rgb,
            encoded: bytes,
        })
    }

    /// File extension matching the sniffed format.
    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpg",
            _ => "png",
        }
    }
}

/// External face model: one face descriptor per image, or `None` when no
/// face is found.
pub trait Embedder {
    fn detect(
        &self,
        image: &FaceImage,
    ) -> impl Future<Output = Result<Option<Descriptor>, EmbedderError>> + Send;
}


#[cfg(test)]
mod tests {
    use super::test_support::png_bytes;
    use super::*;

    #[test]
    fn test_decode_png() {
        let img = FaceImage::decode(png_bytes(200), DEFAULT_MAX_IMAGE_BYTES).unwrap();
        assert_eq!(img.format, ImageFormat::Png);
        assert_eq!(img.rgb.dimensions(), (8, 8));
        assert_eq!(img.extension(), "png");
    }

    #[test]
    fn test_rejects_oversized() {
        let bytes = png_bytes(10);
        let len = bytes.len();
        let err = FaceImage::decode(bytes, len - 1).err().unwrap();
        assert!(matches!(err, ImageError::TooLarge { size, .. } if size == len));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let err = FaceImage::decode(b"GIF89a not really".to_vec(), DEFAULT_MAX_IMAGE_BYTES)
            .err()
            .unwrap();
        assert!(matches!(err, ImageError::UnsupportedFormat));

        let err = FaceImage::decode(b"plain text".to_vec(), DEFAULT_MAX_IMAGE_BYTES)
            .err()
            .unwrap();
        assert!(matches!(err, ImageError::UnsupportedFormat));
    }

    #[test]
    fn test_rejects_empty_and_truncated() {
        assert!(matches!(
            FaceImage::decode(Vec::new(), DEFAULT_MAX_IMAGE_BYTES),
            Err(ImageError::Empty)
        ));
        let mut bytes = png_bytes(10);
        bytes.truncate(20);
        assert!(matches!(
            FaceImage::decode(bytes, DEFAULT_MAX_IMAGE_BYTES),
            Err(ImageError::Decode(_))
        ));
    }
}

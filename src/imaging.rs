//! Image decoding and exact resizing for stored images.

use std::io::Cursor;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("unsupported output format for '{0}' (supported: png, jpg, jpeg, gif, webp)")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(image::ImageError),
}

#[derive(Debug, Clone)]
pub struct ImageProcessor {
    filter: FilterType,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    pub const fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    /// Read pixel dimensions from the image header. `None` when the bytes are
    /// not a decodable image.
    pub fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
        ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    /// The encoding used when writing back a resized file, chosen by extension.
    pub fn output_format(file_name: &str) -> Result<ImageFormat, ImagingError> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "gif" => Ok(ImageFormat::Gif),
            "webp" => Ok(ImageFormat::WebP),
            _ => Err(ImagingError::UnsupportedFormat(file_name.to_string())),
        }
    }

    /// Resize to exactly `width`×`height`, ignoring aspect ratio, and re-encode
    /// in `format`.
    pub fn resize(
        &self,
        data: &[u8],
        format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ImagingError> {
        let img = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ImagingError::Decode(image::ImageError::IoError(e)))?
            .decode()
            .map_err(ImagingError::Decode)?;

        let resized = img.resize_exact(width, height, self.filter);
        // JPEG has no alpha channel; the other encoders take RGBA.
        let normalized = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
            _ => DynamicImage::ImageRgba8(resized.to_rgba8()),
        };

        let mut buffer = Vec::new();
        normalized
            .write_to(&mut Cursor::new(&mut buffer), format)
            .map_err(ImagingError::Encode)?;
        Ok(buffer)
    }
}

#[cfg(test)]
pub(crate) fn sample_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128, 255])
    });
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8()),
        _ => DynamicImage::ImageRgba8(img),
    };
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format)
        .expect("encode sample image");
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_dimensions() {
        let png = sample_image(12, 7, ImageFormat::Png);
        assert_eq!(ImageProcessor::dimensions(&png), Some((12, 7)));
        assert_eq!(ImageProcessor::dimensions(b"not an image"), None);
    }

    #[test]
    fn resize_is_exact() {
        let processor = ImageProcessor::new();
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif] {
            let original = sample_image(40, 30, format);
            let resized = processor.resize(&original, format, 17, 9).unwrap();
            assert_eq!(ImageProcessor::dimensions(&resized), Some((17, 9)));
        }
    }

    #[test]
    fn output_format_by_extension() {
        assert_eq!(ImageProcessor::output_format("a.PNG").unwrap(), ImageFormat::Png);
        assert_eq!(ImageProcessor::output_format("a.jpeg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageProcessor::output_format("a.webp").unwrap(), ImageFormat::WebP);
        assert!(matches!(
            ImageProcessor::output_format("a.tiff"),
            Err(ImagingError::UnsupportedFormat(_))
        ));
        assert!(ImageProcessor::output_format("noext").is_err());
    }

    #[test]
    fn resize_rejects_garbage() {
        let err = ImageProcessor::new()
            .resize(b"garbage", ImageFormat::Png, 2, 2)
            .unwrap_err();
        assert!(matches!(err, ImagingError::Decode(_)));
    }
}

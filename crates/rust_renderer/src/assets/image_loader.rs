//! Decoded RGBA8 images ready for texture upload

use crate::error::{RenderError, RenderResult};
use std::path::Path;

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Raw RGBA pixel data, row-major, tightly packed
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Bytes per pixel of every `ImageData`
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Wrap an already decoded RGBA8 buffer
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> RenderResult<Self> {
        let image = Self { data, width, height };
        image.validate()?;
        Ok(image)
    }

    /// Check that the extent is non-zero and `data` holds exactly one RGBA8
    /// pixel per texel
    ///
    /// The fields are public, so uploads re-check before copying.
    pub fn validate(&self) -> RenderResult<()> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(RenderError::asset(
                format!("image has zero extent {width}x{height}"),
                None,
            ));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|texels| texels.checked_mul(Self::BYTES_PER_PIXEL));
        if expected != Some(self.data.len()) {
            return Err(RenderError::asset(
                format!(
                    "RGBA8 buffer for {width}x{height} must be {} bytes, got {}",
                    expected.map_or_else(|| "more than usize::MAX".to_string(), |n| n.to_string()),
                    self.data.len()
                ),
                None,
            ));
        }
        Ok(())
    }

    /// Load an image from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading image from: {}", path.display());

        let img = image::open(path)
            .map_err(|e| RenderError::asset(format!("failed to load image: {e}"), Some(path)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        log::info!("Loaded image {}x{} from {}", width, height, path.display());
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Decode an image held in memory
    pub fn from_bytes(bytes: &[u8]) -> RenderResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| RenderError::asset(format!("failed to decode image: {e}"), None))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        log::debug!("Decoded image {}x{} from memory", width, height);
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Single-color image
    #[must_use]
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = width as usize * height as usize;
        Self {
            data: color.repeat(pixel_count),
            width,
            height,
        }
    }

    /// Two-color checkerboard with one-pixel cells
    #[must_use]
    pub fn checkerboard(size: u32, even: [u8; 4], odd: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(size as usize * size as usize * Self::BYTES_PER_PIXEL);
        for y in 0..size {
            for x in 0..size {
                data.extend_from_slice(if (x + y) % 2 == 0 { &even } else { &odd });
            }
        }
        Self {
            data,
            width: size,
            height: size,
        }
    }

    /// Size of the pixel data in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.width, 4);
        assert_eq!(img.size_bytes(), 4 * 4 * 4);
        assert_eq!(&img.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_checkerboard_alternates() {
        let magenta = [255, 0, 255, 255];
        let black = [0, 0, 0, 255];
        let img = ImageData::checkerboard(16, magenta, black);

        assert_eq!(img.size_bytes(), 16 * 16 * 4);
        assert_eq!(&img.data[0..4], &magenta);
        assert_eq!(&img.data[4..8], &black);
        // second row starts with the odd color
        let row = 16 * 4;
        assert_eq!(&img.data[row..row + 4], &black);
    }

    #[test]
    fn test_from_rgba8_checks_length() {
        assert!(ImageData::from_rgba8(2, 2, vec![0; 16]).is_ok());
        assert!(ImageData::from_rgba8(2, 2, vec![0; 15]).is_err());
        assert!(ImageData::from_rgba8(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn test_validate_rejects_mutated_fields() {
        let mut img = ImageData::solid_color(2, 2, [0, 0, 0, 255]);
        assert!(img.validate().is_ok());

        img.width = 4;
        let err = img.validate().unwrap_err();
        assert!(matches!(err, RenderError::Asset { .. }));

        img.width = 2;
        img.data.truncate(12);
        assert!(img.validate().is_err());

        let empty = ImageData::solid_color(0, 0, [0; 4]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_asset_error() {
        let err = ImageData::from_file("no/such/texture.png").unwrap_err();
        assert!(matches!(err, RenderError::Asset { path: Some(_), .. }));
    }
}

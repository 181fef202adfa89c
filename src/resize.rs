//! Aspect-preserving frame resizing.
//!
//! [`Resizer`] scales every frame to a fixed target height before it reaches
//! the encoder. Without a target height it is the identity transform.

use std::borrow::Cow;

use image::{RgbImage, imageops, imageops::FilterType};

use crate::error::ConversionError;

/// Resolve output dimensions for a frame of `source_width` × `source_height`
/// scaled to `target_height`.
///
/// The width is `round(source_width × target_height / source_height)`,
/// clamped to at least one pixel.
///
/// # Errors
///
/// Returns [`ConversionError::InvalidParameter`] when `target_height` or the
/// source height is zero.
pub fn scaled_dimensions(
    source_width: u32,
    source_height: u32,
    target_height: u32,
) -> Result<(u32, u32), ConversionError> {
    if target_height == 0 {
        return Err(ConversionError::InvalidParameter(
            "target height must be greater than zero".to_string(),
        ));
    }
    if source_height == 0 {
        return Err(ConversionError::InvalidParameter(
            "source height must be greater than zero".to_string(),
        ));
    }
    let ratio = target_height as f64 / source_height as f64;
    let width = (source_width as f64 * ratio).round() as u32;
    Ok((width.max(1), target_height))
}

/// Scales frames to a fixed height, preserving aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct Resizer {
    target_height: Option<u32>,
    filter: FilterType,
}

impl Resizer {
    /// Create a resizer. `None` keeps native resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::InvalidParameter`] for `Some(0)`.
    pub fn new(target_height: Option<u32>, filter: FilterType) -> Result<Self, ConversionError> {
        if target_height == Some(0) {
            return Err(ConversionError::InvalidParameter(
                "target height must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            target_height,
            filter,
        })
    }

    /// A resizer that passes frames through untouched.
    pub fn identity() -> Self {
        Self {
            target_height: None,
            filter: FilterType::Triangle,
        }
    }

    /// Output dimensions for a source of the given size.
    pub fn output_dimensions(&self, width: u32, height: u32) -> Result<(u32, u32), ConversionError> {
        match self.target_height {
            Some(target) => scaled_dimensions(width, height, target),
            None => Ok((width, height)),
        }
    }

    /// Resize one frame. Borrows the input when no scaling is needed.
    pub fn apply<'a>(&self, frame: &'a RgbImage) -> Result<Cow<'a, RgbImage>, ConversionError> {
        let (width, height) = self.output_dimensions(frame.width(), frame.height())?;
        if (width, height) == frame.dimensions() {
            return Ok(Cow::Borrowed(frame));
        }
        Ok(Cow::Owned(imageops::resize(frame, width, height, self.filter)))
    }
}

impl Default for Resizer {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halving_height_halves_width() {
        assert_eq!(scaled_dimensions(1920, 1080, 540).unwrap(), (960, 540));
    }

    #[test]
    fn width_is_rounded_not_truncated() {
        // 640 * 100 / 360 = 177.78
        assert_eq!(scaled_dimensions(640, 360, 100).unwrap(), (178, 100));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        assert_eq!(scaled_dimensions(1, 1000, 10).unwrap(), (1, 10));
    }

    #[test]
    fn zero_height_rejected() {
        assert!(Resizer::new(Some(0), FilterType::Triangle).is_err());
        assert!(scaled_dimensions(640, 360, 0).is_err());
    }

    #[test]
    fn identity_borrows() {
        let frame = RgbImage::new(8, 4);
        let out = Resizer::identity().apply(&frame).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn scales_frames_to_target_height() {
        let frame = RgbImage::from_pixel(64, 36, image::Rgb([10, 20, 30]));
        let resizer = Resizer::new(Some(18), FilterType::Triangle).unwrap();
        let out = resizer.apply(&frame).unwrap();
        assert_eq!(out.dimensions(), (32, 18));
        assert_eq!(out.get_pixel(5, 5), &image::Rgb([10, 20, 30]));
    }
}

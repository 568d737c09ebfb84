use image::RgbImage;

use crate::error::FrameError;

type Release = Box<dyn FnOnce() + Send>;

/// A camera frame and its orientation hint.
///
/// The producer's release hook runs exactly once, when the frame is dropped, whichever way the
/// pipeline handled it.
pub struct Frame {
    image: RgbImage,
    rotation_degrees: u32,
    release: Option<Release>,
}

impl Frame {
    /// `rotation_degrees` is the clockwise rotation that makes the image upright.
    pub fn new(image: RgbImage, rotation_degrees: u32) -> Result<Self, FrameError> {
        let rotation_degrees = rotation_degrees % 360;
        if rotation_degrees % 90 != 0 {
            return Err(FrameError::UnsupportedRotation(rotation_degrees));
        }

        Ok(Frame {
            image,
            rotation_degrees,
            release: None,
        })
    }

    /// Wraps a packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, rotation_degrees: u32) -> Result<Self, FrameError> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or(FrameError::DimensionOverflow { width, height })? as usize;

        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch { expected, actual: pixels.len() });
        }

        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or(FrameError::LengthMismatch { expected, actual: 0 })?;
        Self::new(image, rotation_degrees)
    }

    pub fn with_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.rotation_degrees
    }

    /// Hands the frame back to its producer.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("rotation_degrees", &self.rotation_degrees)
            .finish()
    }
}

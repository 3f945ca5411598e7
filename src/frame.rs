//! Frame container shared by every source and the detector.
//!
//! - `Frame`: packed RGB24 pixels with dimensions and a per-source index.
//!
//! Sources normalize whatever their backend decodes into RGB24 before building a
//! `Frame`, so detectors and the annotator only ever see one layout.

use anyhow::{anyhow, Result};
use image::RgbImage;

// ----------------------------------------------------------------------------
// Frame: normalized RGB24 raster
// ----------------------------------------------------------------------------

/// One decoded frame in packed RGB24.
///
/// Invariant: `data.len() == width * height * 3`, both dimensions non-zero.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position within the source sequence, starting at 1.
    pub index: u64,
}

impl Frame {
    /// Build a frame from packed RGB24 bytes, validating the length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has zero dimension ({}x{})", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    pub fn from_image(image: RgbImage, index: u64) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgb(image.into_raw(), width, height, index)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy into an `image` buffer for drawing or encoding.
    pub fn to_image(&self) -> RgbImage {
        // Length was validated at construction.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

// ----------------------------------------------------------------------------
// Synthetic frames
// ----------------------------------------------------------------------------

/// Deterministic test pattern used by every `stub://` source.
///
/// The scene changes every 50 frames so downstream detections vary over a
/// stream without any randomness.
pub(crate) fn synthetic_frame(width: u32, height: u32, index: u64, seed: u8) -> Result<Frame> {
    let pixel_count = (width as usize) * (height as usize) * 3;
    let scene_state = (index / 50) as u8;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + index + scene_state as u64 + seed as u64) % 256) as u8;
    }
    Frame::from_rgb(pixels, width, height, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2, 1).is_err());
        assert!(Frame::from_rgb(vec![], 0, 0, 1).is_err());
    }

    #[test]
    fn image_round_trip_keeps_dimensions() -> Result<()> {
        let image = RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]));
        let frame = Frame::from_image(image, 7)?;
        assert_eq!((frame.width, frame.height, frame.index), (4, 3, 7));
        assert_eq!(frame.to_image().get_pixel(3, 2).0, [10, 20, 30]);
        Ok(())
    }

    #[test]
    fn synthetic_frames_are_deterministic() -> Result<()> {
        let a = synthetic_frame(8, 8, 3, 1)?;
        let b = synthetic_frame(8, 8, 3, 1)?;
        let c = synthetic_frame(8, 8, 4, 1)?;
        assert_eq!(a.pixels(), b.pixels());
        assert_ne!(a.pixels(), c.pixels());
        Ok(())
    }
}

//! Static image frame source.
//!
//! `ImageSource` decodes one local image (jpg, jpeg, png, bmp, webp) and yields it
//! as a single-frame sequence. The file is read and decoded in `open`, so an
//! unreadable or undecodable image fails the whole attempt up front.

use anyhow::{anyhow, Context, Result};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{is_stub, FrameSource, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{synthetic_frame, Frame};

/// Extensions accepted for upload.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Configuration for a static image source.
#[derive(Clone, Debug)]
pub struct ImageConfig {
    /// Local image path, or `stub://name` for a synthetic frame.
    pub path: String,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
}

/// Single-image source. Yields exactly one frame.
pub struct ImageSource {
    config: ImageConfig,
    pending: Option<Frame>,
    opened: bool,
    frames_captured: u64,
}

impl ImageSource {
    pub fn new(config: ImageConfig) -> PipelineResult<Self> {
        if config.path.trim().is_empty() {
            return Err(PipelineError::config("image path is empty"));
        }
        if !is_stub(&config.path) && !has_image_extension(&config.path) {
            return Err(PipelineError::config(format!(
                "unsupported image type '{}'; expected one of {}",
                config.path,
                IMAGE_EXTENSIONS.join(", ")
            )));
        }
        Ok(Self {
            config,
            pending: None,
            opened: false,
            frames_captured: 0,
        })
    }

    fn load(&self) -> Result<Frame> {
        if is_stub(&self.config.path) {
            return synthetic_frame(self.config.width, self.config.height, 1, 0);
        }
        let decoded = ::image::open(&self.config.path)
            .with_context(|| format!("open image {}", self.config.path))?;
        let (width, height) = (decoded.width(), decoded.height());
        let pixels = match decoded {
            ::image::DynamicImage::ImageRgb8(rgb) => rgb.into_raw(),
            ::image::DynamicImage::ImageRgba8(rgba) => {
                normalize_to_rgb(rgba.as_raw(), width, height, PixelFormat::Rgba32)?
            }
            other => other.into_rgb8().into_raw(),
        };
        Frame::from_rgb(pixels, width, height, 1)
    }
}

impl FrameSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::StaticImage
    }

    fn open(&mut self) -> PipelineResult<()> {
        let frame = self
            .load()
            .map_err(|err| PipelineError::unavailable(SourceKind::StaticImage, err))?;
        log::info!(
            "ImageSource: opened {} ({}x{})",
            self.config.path,
            frame.width,
            frame.height
        );
        self.pending = Some(frame);
        self.opened = true;
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if !self.opened {
            return Err(PipelineError::unavailable(
                SourceKind::StaticImage,
                anyhow!("image source not opened"),
            ));
        }
        let frame = self.pending.take();
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        self.opened
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            frames_skipped: 0,
            origin: self.config.path.clone(),
        }
    }
}

fn has_image_extension(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &str) -> ImageConfig {
        ImageConfig {
            path: path.to_string(),
            width: 16,
            height: 12,
        }
    }

    #[test]
    fn static_image_sequence_has_exactly_one_frame() -> PipelineResult<()> {
        let mut source = ImageSource::new(config("stub://slide"))?;
        source.open()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn decodes_png_from_disk() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("smear.png");
        let img = ::image::RgbaImage::from_pixel(5, 4, ::image::Rgba([9, 8, 7, 255]));
        img.save(&path)?;

        let mut source = ImageSource::new(config(&path.to_string_lossy()))?;
        source.open()?;
        let frame = source.next_frame()?.expect("one frame");
        assert_eq!((frame.width, frame.height), (5, 4));
        assert_eq!(&frame.pixels()[..3], &[9, 8, 7]);
        Ok(())
    }

    #[test]
    fn missing_file_is_unavailable() -> PipelineResult<()> {
        let mut source = ImageSource::new(config("/nonexistent/slide.jpg"))?;
        let err = source.open().unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        Ok(())
    }

    #[test]
    fn rejects_unsupported_extension() {
        let err = ImageSource::new(config("notes.txt")).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(ImageSource::new(config("SLIDE.JPEG")).is_ok());
    }
}

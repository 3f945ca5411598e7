//! V4L2 webcam frame source.
//!
//! This module provides `V4l2Source` for capturing frames from a local camera
//! (e.g., /dev/video0).
//!
//! The V4L2 source is responsible for:
//! - Opening the device node and negotiating a capture format
//! - Capturing frames in-memory and normalizing YUYV/RGB3 to RGB24
//! - Bounding each capture with the read timeout
//! - Releasing the camera when the source is dropped

use std::time::Duration;
#[cfg(feature = "ingest-v4l2")]
use std::time::Instant;

use anyhow::anyhow;
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, rgb_to_yuv, PixelFormat};
use super::{is_stub, FrameSource, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{synthetic_frame, Frame};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0"), or `stub://name`.
    pub device: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Longest a single capture may block.
    pub read_timeout: Duration,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// V4L2 frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticV4l2Source),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
    #[cfg(not(feature = "ingest-v4l2"))]
    Unsupported(String),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> PipelineResult<Self> {
        if config.device.trim().is_empty() {
            return Err(PipelineError::config("webcam device path is empty"));
        }
        let backend = if is_stub(&config.device) {
            V4l2Backend::Synthetic(SyntheticV4l2Source::new(config))
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                V4l2Backend::Device(DeviceV4l2Source::new(config))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                V4l2Backend::Unsupported(config.device)
            }
        };
        Ok(Self { backend })
    }
}

impl FrameSource for V4l2Source {
    fn kind(&self) -> SourceKind {
        SourceKind::Webcam
    }

    fn open(&mut self) -> PipelineResult<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.connect(),
            #[cfg(not(feature = "ingest-v4l2"))]
            V4l2Backend::Unsupported(device) => Err(PipelineError::unavailable(
                SourceKind::Webcam,
                anyhow!("cannot open {}: built without the ingest-v4l2 feature", device),
            )),
        }
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.next_frame(),
            #[cfg(not(feature = "ingest-v4l2"))]
            V4l2Backend::Unsupported(_) => Err(PipelineError::unavailable(
                SourceKind::Webcam,
                anyhow!("webcam not opened"),
            )),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.connected,
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.is_healthy(),
            #[cfg(not(feature = "ingest-v4l2"))]
            V4l2Backend::Unsupported(_) => false,
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.stats(),
            #[cfg(not(feature = "ingest-v4l2"))]
            V4l2Backend::Unsupported(device) => SourceStats {
                origin: device.clone(),
                ..SourceStats::default()
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Emits YUYV like most USB cameras, so the normalization path runs too.
struct SyntheticV4l2Source {
    config: V4l2Config,
    frame_count: u64,
    connected: bool,
}

impl SyntheticV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    /// Synthetic cameras are always "connected".
    fn connect(&mut self) -> PipelineResult<()> {
        self.connected = true;
        log::info!(
            "V4l2Source: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if !self.connected {
            return Err(PipelineError::unavailable(
                SourceKind::Webcam,
                anyhow!("webcam not opened"),
            ));
        }
        self.frame_count += 1;
        let index = self.frame_count;
        let (width, height) = (self.config.width, self.config.height);
        let pattern = synthetic_frame(width, height, index, 2)
            .map_err(|err| PipelineError::frame_decode(index, err))?;
        if width % 2 != 0 {
            return Ok(Some(pattern));
        }

        let yuyv = encode_yuyv(pattern.pixels());
        let rgb = normalize_to_rgb(&yuyv, width, height, PixelFormat::Yuyv)
            .and_then(|pixels| Frame::from_rgb(pixels, width, height, index))
            .map_err(|err| PipelineError::frame_decode(index, err))?;
        Ok(Some(rgb))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: 0,
            origin: self.config.device.clone(),
        }
    }
}

fn encode_yuyv(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 2);
    for pair in rgb.chunks_exact(6) {
        let (y0, u0, v0) = rgb_to_yuv(pair[0], pair[1], pair[2]);
        let (y1, u1, v1) = rgb_to_yuv(pair[3], pair[4], pair[5]);
        let u = ((u0 as u16 + u1 as u16) / 2) as u8;
        let v = ((v0 as u16 + v1 as u16) / 2) as u8;
        out.extend_from_slice(&[y0, u, y1, v]);
    }
    out
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    format: PixelFormat,
    frame_count: u64,
    frames_skipped: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Yuyv,
            frame_count: 0,
            frames_skipped: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn connect(&mut self) -> PipelineResult<()> {
        self.try_connect().map_err(|err| {
            self.last_error = Some(format!("{:#}", err));
            PipelineError::unavailable(SourceKind::Webcam, err)
        })
    }

    fn try_connect(&mut self) -> anyhow::Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = match &format.fourcc.repr {
            b"YUYV" => PixelFormat::Yuyv,
            b"RGB3" => PixelFormat::Rgb24,
            b"NV12" => PixelFormat::Nv12,
            other => {
                return Err(anyhow!(
                    "unsupported v4l2 pixel format {}",
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let read_timeout = self.config.read_timeout;
        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                stream.set_timeout(read_timeout);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            PipelineError::unavailable(SourceKind::Webcam, anyhow!("v4l2 device not connected"))
        })?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        let buf = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            PipelineError::unavailable(
                SourceKind::Webcam,
                anyhow::Error::new(err).context("capture v4l2 frame"),
            )
        })?;

        self.frame_count += 1;
        let index = self.frame_count;
        let (width, height) = (self.active_width, self.active_height);
        let frame = normalize_to_rgb(&buf, width, height, self.format)
            .and_then(|pixels| Frame::from_rgb(pixels, width, height, index))
            .map_err(|err| {
                self.frames_skipped += 1;
                PipelineError::frame_decode(index, err)
            })?;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.config.read_timeout
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: self.frames_skipped,
            origin: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Frame ingestion sources.
//!
//! This module provides one adapter per source kind:
//! - Static images (always available, decoded with `image`)
//! - Local video files (feature: ingest-ffmpeg)
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//! - RTSP streams (feature: rtsp-gstreamer)
//! - Remote video platform URLs (resolver + feature: ingest-ffmpeg)
//!
//! Every adapter also accepts a `stub://` origin that synthesizes frames, so the
//! pipeline can run without cameras, codecs or network access.
//!
//! All sources produce `Frame` instances in packed RGB24 through the
//! `FrameSource` trait. The ingestion layer is responsible for:
//! - Validating the origin before any I/O
//! - Normalizing decoded pixels to RGB24
//! - Bounding every blocking read with the configured read timeout
//! - Releasing the underlying handle when the adapter is dropped

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod file;
pub mod image;
mod normalize;
pub mod remote;
pub mod rtsp;
pub mod v4l2;

pub use file::{FileConfig, FileSource};
pub use image::{ImageConfig, ImageSource};
pub use remote::{CommandResolver, RemoteConfig, RemoteVideoSource, UrlResolver};
pub use rtsp::{RtspConfig, RtspSource};
pub use v4l2::{V4l2Config, V4l2Source};

pub(crate) const STUB_SCHEME: &str = "stub://";

pub(crate) fn is_stub(origin: &str) -> bool {
    origin.starts_with(STUB_SCHEME)
}

// ----------------------------------------------------------------------------
// Source kinds and descriptors
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    StaticImage,
    LocalVideo,
    Webcam,
    Rtsp,
    RemoteVideo,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::StaticImage,
        SourceKind::LocalVideo,
        SourceKind::Webcam,
        SourceKind::Rtsp,
        SourceKind::RemoteVideo,
    ];

    /// Streaming sources advance automatically; a static image needs an explicit trigger.
    pub fn is_streaming(self) -> bool {
        !matches!(self, SourceKind::StaticImage)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::StaticImage => "image",
            SourceKind::LocalVideo => "video",
            SourceKind::Webcam => "webcam",
            SourceKind::Rtsp => "rtsp",
            SourceKind::RemoteVideo => "youtube",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" | "static-image" => Ok(SourceKind::StaticImage),
            "video" | "local-video" => Ok(SourceKind::LocalVideo),
            "webcam" => Ok(SourceKind::Webcam),
            "rtsp" => Ok(SourceKind::Rtsp),
            "youtube" | "remote" | "remote-video" => Ok(SourceKind::RemoteVideo),
            other => Err(PipelineError::config(format!(
                "unknown source kind '{}'; expected image, video, webcam, rtsp or youtube",
                other
            ))),
        }
    }
}

/// What the user selected: a source kind plus its path, device or URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// `None` means nothing was uploaded yet; the default image is previewed.
    StaticImage { path: Option<PathBuf> },
    LocalVideo { path: PathBuf },
    Webcam { device: String },
    Rtsp { url: String },
    RemoteVideo { url: String },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::StaticImage { .. } => SourceKind::StaticImage,
            SourceDescriptor::LocalVideo { .. } => SourceKind::LocalVideo,
            SourceDescriptor::Webcam { .. } => SourceKind::Webcam,
            SourceDescriptor::Rtsp { .. } => SourceKind::Rtsp,
            SourceDescriptor::RemoteVideo { .. } => SourceKind::RemoteVideo,
        }
    }

    /// Build a descriptor from a kind and an optional raw input string.
    ///
    /// Webcam and RTSP fall back to the configured defaults when no input is given.
    pub fn from_input(
        kind: SourceKind,
        input: Option<&str>,
        defaults: &SourceDefaults,
    ) -> PipelineResult<Self> {
        let input = input.map(str::trim).filter(|value| !value.is_empty());
        match kind {
            SourceKind::StaticImage => Ok(SourceDescriptor::StaticImage {
                path: input.map(PathBuf::from),
            }),
            SourceKind::LocalVideo => input
                .map(|path| SourceDescriptor::LocalVideo {
                    path: PathBuf::from(path),
                })
                .ok_or_else(|| PipelineError::config("video source requires a file path")),
            SourceKind::Webcam => Ok(SourceDescriptor::Webcam {
                device: input.unwrap_or(&defaults.webcam_device).to_string(),
            }),
            SourceKind::Rtsp => Ok(SourceDescriptor::Rtsp {
                url: input.unwrap_or(&defaults.rtsp_url).to_string(),
            }),
            SourceKind::RemoteVideo => input
                .or(defaults.remote_url.as_deref())
                .map(|url| SourceDescriptor::RemoteVideo {
                    url: url.to_string(),
                })
                .ok_or_else(|| PipelineError::config("youtube source requires a video URL")),
        }
    }
}

/// Per-kind fallbacks used when the user gives no explicit input.
#[derive(Clone, Debug)]
pub struct SourceDefaults {
    pub webcam_device: String,
    pub rtsp_url: String,
    pub remote_url: Option<String>,
}

// ----------------------------------------------------------------------------
// FrameSource: lazy, cancellable frame sequence
// ----------------------------------------------------------------------------

/// Statistics for any frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_skipped: u64,
    pub origin: String,
}

/// A lazy sequence of frames from one origin.
///
/// `open` acquires the resource; any failure there ends the attempt.
/// `next_frame` yields `Ok(None)` on exhaustion, `FrameDecode` for a single bad
/// frame (callers skip it), and `SourceUnavailable` when the stream is lost.
/// Dropping the source releases the resource.
pub trait FrameSource {
    fn kind(&self) -> SourceKind;

    fn open(&mut self) -> PipelineResult<()>;

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Opens frame sources for descriptors. The orchestrator only talks to this.
pub trait SourceFactory {
    fn open(&mut self, descriptor: &SourceDescriptor) -> PipelineResult<Box<dyn FrameSource>>;
}

/// Runtime knobs shared by all adapters.
#[derive(Clone, Debug)]
pub struct IngestSettings {
    pub target_fps: u32,
    /// Size of synthetic frames; real backends report their own size.
    pub width: u32,
    pub height: u32,
    pub read_timeout: Duration,
    /// Length of a `stub://` local video.
    pub synthetic_video_frames: u64,
    pub resolver_program: String,
    pub resolver_args: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
            read_timeout: Duration::from_secs(5),
            synthetic_video_frames: 30,
            resolver_program: "yt-dlp".to_string(),
            resolver_args: vec!["-f".to_string(), "best".to_string(), "-g".to_string()],
        }
    }
}

/// Default factory: builds the adapter for the descriptor's kind and opens it.
pub struct IngestFactory {
    settings: IngestSettings,
}

impl IngestFactory {
    pub fn new(settings: IngestSettings) -> Self {
        Self { settings }
    }

    fn build(&self, descriptor: &SourceDescriptor) -> PipelineResult<Box<dyn FrameSource>> {
        let s = &self.settings;
        let source: Box<dyn FrameSource> = match descriptor {
            SourceDescriptor::StaticImage { path } => {
                let path = path.as_ref().ok_or_else(|| {
                    PipelineError::config("no image selected; upload an image first")
                })?;
                Box::new(ImageSource::new(ImageConfig {
                    path: path.to_string_lossy().into_owned(),
                    width: s.width,
                    height: s.height,
                })?)
            }
            SourceDescriptor::LocalVideo { path } => Box::new(FileSource::new(FileConfig {
                path: path.to_string_lossy().into_owned(),
                target_fps: s.target_fps,
                read_timeout: s.read_timeout,
                width: s.width,
                height: s.height,
                synthetic_frames: s.synthetic_video_frames,
            })?),
            SourceDescriptor::Webcam { device } => Box::new(V4l2Source::new(V4l2Config {
                device: device.clone(),
                target_fps: s.target_fps,
                width: s.width,
                height: s.height,
                read_timeout: s.read_timeout,
            })?),
            SourceDescriptor::Rtsp { url } => Box::new(RtspSource::new(RtspConfig {
                url: url.clone(),
                target_fps: s.target_fps,
                width: s.width,
                height: s.height,
                read_timeout: s.read_timeout,
            })?),
            SourceDescriptor::RemoteVideo { url } => Box::new(RemoteVideoSource::new(
                RemoteConfig {
                    url: url.clone(),
                    target_fps: s.target_fps,
                    width: s.width,
                    height: s.height,
                    read_timeout: s.read_timeout,
                },
                Box::new(CommandResolver::new(
                    s.resolver_program.clone(),
                    s.resolver_args.clone(),
                    s.read_timeout,
                )),
            )?),
        };
        Ok(source)
    }
}

impl SourceFactory for IngestFactory {
    fn open(&mut self, descriptor: &SourceDescriptor) -> PipelineResult<Box<dyn FrameSource>> {
        let mut source = self.build(descriptor)?;
        source.open()?;
        Ok(source)
    }
}

//! Local video file frame source.
//!
//! This module provides `FileSource` for reading frames from a local video file.
//! The file source is responsible for:
//! - Reading frames from a local file (no network access)
//! - Decoding video frames in-memory to RGB24
//! - Reporting end-of-file as exhaustion, not as an error
//!
//! The file source MUST NOT:
//! - Fetch remote URLs (use `RemoteVideoSource`)
//! - Retain frames beyond handoff to the orchestrator

use std::time::Duration;

use anyhow::anyhow;

#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use super::{is_stub, FrameSource, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{synthetic_frame, Frame};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/data/smears/run1.mp4"), or `stub://name`.
    pub path: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Longest a single read may block before the source is declared stalled.
    pub read_timeout: Duration,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
    /// Number of frames a `stub://` video yields before ending.
    pub synthetic_frames: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 10,
            read_timeout: Duration::from_secs(5),
            width: 640,
            height: 480,
            synthetic_frames: 30,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegSource),
    /// Built without a decoder; fails at `open`.
    #[cfg(not(feature = "ingest-ffmpeg"))]
    Unsupported(String),
}

impl FileSource {
    pub fn new(config: FileConfig) -> PipelineResult<Self> {
        if !is_local_file_path(&config.path) {
            return Err(PipelineError::config(
                "file ingestion only supports local paths (no URL schemes)",
            ));
        }
        let backend = if is_stub(&config.path) {
            FileBackend::Synthetic(SyntheticFileSource::new(config))
        } else {
            #[cfg(feature = "ingest-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegSource::new(
                    SourceKind::LocalVideo,
                    config.path,
                    config.read_timeout,
                ))
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                FileBackend::Unsupported(config.path)
            }
        };
        Ok(Self { backend })
    }
}

impl FrameSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::LocalVideo
    }

    fn open(&mut self) -> PipelineResult<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
            #[cfg(not(feature = "ingest-ffmpeg"))]
            FileBackend::Unsupported(path) => Err(PipelineError::unavailable(
                SourceKind::LocalVideo,
                anyhow!("cannot decode {}: built without the ingest-ffmpeg feature", path),
            )),
        }
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
            #[cfg(not(feature = "ingest-ffmpeg"))]
            FileBackend::Unsupported(_) => Err(PipelineError::unavailable(
                SourceKind::LocalVideo,
                anyhow!("file source not opened"),
            )),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(source) => source.connected,
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
            #[cfg(not(feature = "ingest-ffmpeg"))]
            FileBackend::Unsupported(_) => false,
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
            #[cfg(not(feature = "ingest-ffmpeg"))]
            FileBackend::Unsupported(path) => SourceStats {
                origin: path.clone(),
                ..SourceStats::default()
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
    connected: bool,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    fn connect(&mut self) -> PipelineResult<()> {
        self.connected = true;
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if !self.connected {
            return Err(PipelineError::unavailable(
                SourceKind::LocalVideo,
                anyhow!("file source not opened"),
            ));
        }
        if self.frame_count >= self.config.synthetic_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        synthetic_frame(self.config.width, self.config.height, self.frame_count, 1)
            .map(Some)
            .map_err(|err| PipelineError::frame_decode(self.frame_count, err))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: 0,
            origin: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_stub(path) {
        return true;
    }
    !path.contains("://")
}

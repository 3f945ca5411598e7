//! RTSP frame source.
//!
//! This module provides `RtspSource` for ingesting frames from IP cameras and
//! streaming microscopes via RTSP.
//!
//! The RTSP source is responsible for:
//! - Validating the URL before any network I/O
//! - Connecting to the stream and decoding frames to RGB24
//! - Bounding connect and each frame pull with the read timeout
//! - Tearing the pipeline down when the source is dropped
//!
//! Protocol handling is delegated to GStreamer (`rtspsrc`).

use std::time::Duration;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Instant;

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use url::Url;

use super::{is_stub, FrameSource, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{synthetic_frame, Frame};

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream"), or `stub://name`.
    pub url: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
    /// Longest the connect handshake or a single frame pull may block.
    pub read_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
    #[cfg(not(feature = "rtsp-gstreamer"))]
    Unsupported(String),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> PipelineResult<Self> {
        if is_stub(&config.url) {
            return Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)),
            });
        }
        validate_rtsp_url(&config.url).map_err(|err| PipelineError::config(format!("{:#}", err)))?;
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Self {
                backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)),
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Ok(Self {
                backend: RtspBackend::Unsupported(config.url),
            })
        }
    }
}

impl FrameSource for RtspSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Rtsp
    }

    /// Connect to the RTSP stream.
    fn open(&mut self) -> PipelineResult<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            RtspBackend::Unsupported(url) => Err(PipelineError::unavailable(
                SourceKind::Rtsp,
                anyhow!("cannot reach {}: RTSP requires the rtsp-gstreamer feature", url),
            )),
        }
    }

    /// Capture the next frame.
    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            RtspBackend::Unsupported(_) => Err(PipelineError::unavailable(
                SourceKind::Rtsp,
                anyhow!("stream not opened"),
            )),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.connected,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.is_healthy(),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            RtspBackend::Unsupported(_) => false,
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            RtspBackend::Unsupported(url) => SourceStats {
                origin: url.clone(),
                ..SourceStats::default()
            },
        }
    }
}

fn validate_rtsp_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|err| anyhow!("invalid RTSP URL '{}': {}", raw, err))?;
    if !matches!(url.scheme(), "rtsp" | "rtsps") {
        return Err(anyhow!(
            "unsupported RTSP scheme '{}'; expected rtsp or rtsps",
            url.scheme()
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("RTSP URL '{}' has no host", raw));
    }
    Ok(url)
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    config: RtspConfig,
    frame_count: u64,
    connected: bool,
}

impl SyntheticRtspSource {
    fn new(config: RtspConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> PipelineResult<()> {
        self.connected = true;
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if !self.connected {
            return Err(PipelineError::unavailable(
                SourceKind::Rtsp,
                anyhow!("stream not opened"),
            ));
        }
        self.frame_count += 1;
        synthetic_frame(self.config.width, self.config.height, self.frame_count, 3)
            .map(Some)
            .map_err(|err| PipelineError::frame_decode(self.frame_count, err))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: 0,
            origin: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
    frame_count: u64,
    frames_skipped: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    fn new(config: RtspConfig) -> Self {
        Self {
            config,
            pipeline: None,
            frame_count: 0,
            frames_skipped: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` and wait for it to play.
    fn connect(&mut self) -> PipelineResult<()> {
        let built = self.build_pipeline().and_then(|(pipeline, appsink)| {
            self.start(&pipeline)?;
            Ok((pipeline, appsink))
        });
        match built {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                log::info!("RtspSource: connected to {}", self.config.url);
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(format!("{:#}", err));
                Err(PipelineError::unavailable(SourceKind::Rtsp, err))
            }
        }
    }

    fn build_pipeline(&self) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let timeout_us = self.config.read_timeout.as_micros();
        let pipeline_description = format!(
            "rtspsrc location={} latency=0 tcp-timeout={} ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=appsink sync=false max-buffers=1 drop=true",
            self.config.url, timeout_us
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok((pipeline, appsink))
    }

    /// Start playback. The pipeline is back in Null on any failure.
    fn start(&self, pipeline: &gstreamer::Pipeline) -> Result<()> {
        use gstreamer::prelude::*;

        let started = self.wait_playing(pipeline);
        if started.is_err() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("RtspSource: failed to stop pipeline: {}", err);
            }
        }
        started
    }

    fn wait_playing(&self, pipeline: &gstreamer::Pipeline) -> Result<()> {
        use gstreamer::prelude::*;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.config.read_timeout.as_millis() as u64);
        let (result, current, _pending) = pipeline.state(Some(timeout));
        if result.is_err() || current != gstreamer::State::Playing {
            return Err(anyhow!(
                "stream did not start within {:?} (state {:?})",
                self.config.read_timeout,
                current
            ));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(PipelineError::unavailable(SourceKind::Rtsp, anyhow!("{}", err)));
        }

        let (_, appsink) = self.pipeline.as_ref().ok_or_else(|| {
            PipelineError::unavailable(SourceKind::Rtsp, anyhow!("stream not opened"))
        })?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.config.read_timeout.as_millis() as u64);
        let Some(sample) = appsink.try_pull_sample(timeout) else {
            if appsink.is_eos() {
                return Ok(None);
            }
            self.last_error = Some("RTSP stream stalled".to_string());
            return Err(PipelineError::unavailable(
                SourceKind::Rtsp,
                anyhow!("no frame within {:?}", self.config.read_timeout),
            ));
        };

        self.frame_count += 1;
        let index = self.frame_count;
        match sample_to_pixels(&sample).and_then(|(pixels, width, height)| {
            Frame::from_rgb(pixels, width, height, index)
        }) {
            Ok(frame) => {
                self.last_frame_at = Some(Instant::now());
                Ok(Some(frame))
            }
            Err(err) => {
                self.frames_skipped += 1;
                Err(PipelineError::frame_decode(index, err))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.pipeline.is_none() {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= self.config.read_timeout,
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: self.frames_skipped,
            origin: self.config.url.clone(),
        }
    }

    fn poll_bus(&mut self) {
        use gstreamer::prelude::*;

        let Some((pipeline, _)) = &self.pipeline else {
            return;
        };
        let Some(bus) = pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    log::info!("RtspSource: end of stream from {}", self.config.url);
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        use gstreamer::prelude::*;

        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("RtspSource: failed to stop pipeline: {}", err);
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

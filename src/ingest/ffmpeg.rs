//! FFmpeg-backed decoder shared by local files and resolved remote streams.
//!
//! Frames are decoded in-memory and scaled to RGB24. Network inputs get an
//! FFmpeg `rw_timeout` so a stalled server cannot block a read forever.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

pub(crate) struct FfmpegSource {
    kind: SourceKind,
    origin: String,
    read_timeout: Duration,
    state: Option<DecoderState>,
    frame_count: u64,
    frames_skipped: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

struct DecoderState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

impl FfmpegSource {
    pub(crate) fn new(kind: SourceKind, origin: String, read_timeout: Duration) -> Self {
        Self {
            kind,
            origin,
            read_timeout,
            state: None,
            frame_count: 0,
            frames_skipped: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn connect(&mut self) -> PipelineResult<()> {
        let state = self.open_input().map_err(|err| {
            self.last_error = Some(format!("{:#}", err));
            PipelineError::unavailable(self.kind, err)
        })?;
        self.state = Some(state);
        log::info!("{} source: connected to {} (ffmpeg)", self.kind, self.origin);
        Ok(())
    }

    fn open_input(&self) -> Result<DecoderState> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = if self.origin.contains("://") {
            let mut options = ffmpeg::Dictionary::new();
            let micros = self.read_timeout.as_micros().to_string();
            options.set("rw_timeout", &micros);
            ffmpeg::format::input_with_dictionary(&self.origin, options)
        } else {
            ffmpeg::format::input(&self.origin)
        }
        .with_context(|| format!("failed to open input '{}' with ffmpeg", self.origin))?;

        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("input has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(DecoderState {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        let kind = self.kind;
        let read_timeout = self.read_timeout;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| PipelineError::unavailable(kind, anyhow!("source not opened")))?;
        let started = Instant::now();

        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            if state.decoder.receive_frame(&mut decoded).is_ok() {
                self.frame_count += 1;
                let index = self.frame_count;
                return match to_rgb_frame(&mut state.scaler, &decoded, index) {
                    Ok(frame) => {
                        self.last_frame_at = Some(Instant::now());
                        Ok(Some(frame))
                    }
                    Err(err) => {
                        self.frames_skipped += 1;
                        Err(PipelineError::frame_decode(index, err))
                    }
                };
            }
            if state.eof_sent {
                return Ok(None);
            }

            let next = state
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == state.stream_index => {
                    if let Err(err) = state.decoder.send_packet(&packet) {
                        self.frames_skipped += 1;
                        return Err(PipelineError::frame_decode(
                            self.frame_count + 1,
                            anyhow!("send packet to ffmpeg decoder: {}", err),
                        ));
                    }
                }
                Some(_) => {}
                None => {
                    // Flush buffered frames before reporting exhaustion.
                    let _ = state.decoder.send_eof();
                    state.eof_sent = true;
                }
            }

            if started.elapsed() > read_timeout {
                self.last_error = Some("ingestion stalled".to_string());
                return Err(PipelineError::unavailable(
                    kind,
                    anyhow!("no frame decoded within {:?}", read_timeout),
                ));
            }
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= self.read_timeout,
            None => true,
        }
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_skipped: self.frames_skipped,
            origin: self.origin.clone(),
        }
    }
}

fn to_rgb_frame(
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &ffmpeg::frame::Video,
    index: u64,
) -> Result<Frame> {
    let mut rgb_frame = ffmpeg::frame::Video::empty();
    scaler
        .run(decoded, &mut rgb_frame)
        .context("scale frame to RGB")?;
    let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
    Frame::from_rgb(pixels, width, height, index)
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

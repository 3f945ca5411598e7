//! Pipeline orchestration.
//!
//! The `Orchestrator` owns the current frame source and drives it through
//! `Idle -> SourceSelected -> Detecting -> Rendered`, with `Error` reachable from
//! any step. Every failure is turned into a sink message at this boundary;
//! nothing is retried and nothing ends the process.
//!
//! At most one source is open at a time. Selecting a new source drops the old
//! adapter before the factory opens the next one.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;

use crate::aggregate::aggregate;
use crate::config::AppConfig;
use crate::detect::{load_model, validate_threshold, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceDescriptor, SourceFactory, SourceKind};
use crate::render::annotate;
use crate::sink::{FrameReport, Message, PresentationSink};
use crate::taxonomy::Taxonomy;

pub const PREVIEW_UPLOADED: &str = "Uploaded Image";
pub const PREVIEW_DEFAULT: &str = "Default Image";
pub const PREVIEW_DEFAULT_DETECTED: &str = "Detected Image";

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

pub enum ModelState {
    Loaded(Detector),
    Failed(PipelineError),
}

/// Per-session context: configuration, the loaded model and the threshold.
pub struct Session {
    config: AppConfig,
    model: ModelState,
    threshold: f32,
    model_error_reported: bool,
}

impl Session {
    /// Load the configured model. A load failure is kept, not returned, so the
    /// session can still report it to the user.
    pub fn new(config: AppConfig) -> Self {
        let model = match load_model(&config.model_settings()) {
            Ok(detector) => ModelState::Loaded(detector),
            Err(err) => {
                log::error!("{}", err);
                ModelState::Failed(err)
            }
        };
        Self::with_model(config, model)
    }

    pub fn with_model(config: AppConfig, model: ModelState) -> Self {
        Self {
            threshold: config.confidence,
            config,
            model,
            model_error_reported: false,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelState {
        &self.model
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.config.taxonomy
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) -> PipelineResult<()> {
        validate_threshold(threshold)?;
        self.threshold = threshold;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Orchestrator
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    SourceSelected,
    Detecting,
    Rendered,
    Error,
}

/// Result of a single `step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Rendered { frame_index: u64 },
    /// A bad frame was reported and dropped; the stream continues.
    Skipped,
    Exhausted,
    /// The source failed or nothing streamable is selected.
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    Exhausted,
    Cancelled,
    FrameLimit,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub end: StreamEnd,
}

pub struct Orchestrator<F: SourceFactory, S: PresentationSink> {
    session: Session,
    factory: F,
    sink: S,
    state: PipelineState,
    source: Option<Box<dyn FrameSource>>,
    /// The decoded static image, kept so detection can be re-run.
    image_frame: Option<Frame>,
}

impl<F: SourceFactory, S: PresentationSink> Orchestrator<F, S> {
    pub fn new(session: Session, factory: F, sink: S) -> Self {
        Self {
            session,
            factory,
            sink,
            state: PipelineState::Idle,
            source: None,
            image_frame: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Kind of the open source, if any.
    pub fn active_source(&self) -> Option<SourceKind> {
        self.source.as_ref().map(|source| source.kind())
    }

    /// Switch to a new source. The previous adapter is released first.
    pub fn select_source(&mut self, descriptor: SourceDescriptor) -> PipelineState {
        self.release();

        if self.detector().is_none() {
            self.report_model_failure();
            self.state = PipelineState::Error;
            return self.state;
        }

        if let SourceDescriptor::StaticImage { path: None } = descriptor {
            self.preview_defaults();
            self.sink
                .message(Message::info("Upload an image to run cell detection."));
            self.state = PipelineState::Idle;
            return self.state;
        }

        let kind = descriptor.kind();
        let mut source = match self.factory.open(&descriptor) {
            Ok(source) => source,
            Err(err) => return self.fail(err),
        };

        if kind == SourceKind::StaticImage {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.sink.preview(PREVIEW_UPLOADED, &frame.to_image());
                    self.image_frame = Some(frame);
                }
                Ok(None) => {
                    return self.fail(PipelineError::unavailable(kind, "image produced no frame"))
                }
                Err(err) => return self.fail(err),
            }
        }

        log::info!("selected {} source {}", kind, source.stats().origin);
        self.source = Some(source);
        self.state = PipelineState::SourceSelected;
        self.state
    }

    /// Run detection on the selected static image.
    pub fn detect_now(&mut self) -> PipelineState {
        if let Some(kind) = self.active_source().filter(|kind| kind.is_streaming()) {
            self.sink.message(Message::from(&PipelineError::config(format!(
                "{} sources run continuously; detection on demand is only for images",
                kind
            ))));
            return self.state;
        }
        let Some(frame) = self.image_frame.clone() else {
            self.sink.message(Message::from(&PipelineError::config(
                "no image selected; upload an image first",
            )));
            return self.state;
        };

        match self.process(SourceKind::StaticImage, frame) {
            Ok(()) => self.state = PipelineState::Rendered,
            Err(err) if err.is_per_frame() => {
                self.sink.message(Message::from(&err));
                self.state = PipelineState::SourceSelected;
            }
            Err(err) => {
                self.sink.message(Message::from(&err));
                self.state = PipelineState::Error;
            }
        }
        self.state
    }

    /// Pull, detect and render one frame of the selected stream.
    pub fn step(&mut self) -> StepOutcome {
        let kind = match self.active_source() {
            Some(kind) if kind.is_streaming() => kind,
            _ => {
                self.sink.message(Message::from(&PipelineError::config(
                    "no streaming source selected",
                )));
                return StepOutcome::Stopped;
            }
        };
        let Some(source) = self.source.as_mut() else {
            return StepOutcome::Stopped;
        };

        self.state = PipelineState::Detecting;
        let next = source.next_frame();
        match next {
            Ok(Some(frame)) => {
                let frame_index = frame.index;
                match self.process(kind, frame) {
                    Ok(()) => {
                        self.state = PipelineState::Rendered;
                        StepOutcome::Rendered { frame_index }
                    }
                    Err(err) if err.is_per_frame() => {
                        log::warn!("{}", err);
                        self.sink.message(Message::from(&err));
                        StepOutcome::Skipped
                    }
                    Err(err) => {
                        self.fail(err);
                        StepOutcome::Stopped
                    }
                }
            }
            Ok(None) => {
                self.release();
                self.state = PipelineState::Idle;
                self.sink
                    .message(Message::info(format!("{} stream ended", kind)));
                StepOutcome::Exhausted
            }
            Err(err) if err.is_per_frame() => {
                log::warn!("{}", err);
                self.sink.message(Message::from(&err));
                StepOutcome::Skipped
            }
            Err(err) => {
                self.fail(err);
                StepOutcome::Stopped
            }
        }
    }

    /// Step until the stream ends, fails or `cancel` is raised.
    pub fn run_stream(&mut self, cancel: &AtomicBool) -> StreamSummary {
        self.run_stream_limited(cancel, None)
    }

    /// Like `run_stream`, stopping after `max_frames` frames have been pulled.
    /// Skipped frames count toward the limit.
    pub fn run_stream_limited(
        &mut self,
        cancel: &AtomicBool,
        max_frames: Option<u64>,
    ) -> StreamSummary {
        let mut summary = StreamSummary {
            frames_rendered: 0,
            frames_skipped: 0,
            end: StreamEnd::Exhausted,
        };
        loop {
            if cancel.load(Ordering::SeqCst) {
                self.release();
                self.state = PipelineState::Idle;
                self.sink.message(Message::info("stream stopped"));
                summary.end = StreamEnd::Cancelled;
                break;
            }
            let pulled = summary.frames_rendered + summary.frames_skipped;
            if max_frames.map_or(false, |max| pulled >= max) {
                self.release();
                self.state = PipelineState::Idle;
                summary.end = StreamEnd::FrameLimit;
                break;
            }
            match self.step() {
                StepOutcome::Rendered { .. } => summary.frames_rendered += 1,
                StepOutcome::Skipped => summary.frames_skipped += 1,
                StepOutcome::Exhausted => {
                    summary.end = StreamEnd::Exhausted;
                    break;
                }
                StepOutcome::Stopped => {
                    summary.end = StreamEnd::Failed;
                    break;
                }
            }
        }
        log::info!(
            "stream finished: {} rendered, {} skipped ({:?})",
            summary.frames_rendered,
            summary.frames_skipped,
            summary.end
        );
        summary
    }

    /// Release the source and return to `Idle`.
    pub fn reset(&mut self) -> PipelineState {
        self.release();
        self.state = PipelineState::Idle;
        self.state
    }

    fn detector(&self) -> Option<&Detector> {
        match &self.session.model {
            ModelState::Loaded(detector) => Some(detector),
            ModelState::Failed(_) => None,
        }
    }

    fn process(&mut self, kind: SourceKind, frame: Frame) -> PipelineResult<()> {
        let detector = self
            .detector()
            .ok_or_else(|| PipelineError::config("no model loaded"))?;
        let set = detector.detect(frame, self.session.threshold)?;
        let taxonomy = self.session.taxonomy();
        let tally = aggregate(&set, taxonomy);
        log::debug!(
            "{} frame {}: {} cell(s) across {} class(es)",
            kind,
            set.frame().index,
            tally.total(),
            tally.entries().len()
        );
        let report = FrameReport {
            source: kind,
            frame_index: set.frame().index,
            annotated: annotate(&set),
            lines: tally.lines(taxonomy),
            detections: set.detections().to_vec(),
        };
        self.sink.render(&report);
        Ok(())
    }

    fn fail(&mut self, err: PipelineError) -> PipelineState {
        log::error!("{}", err);
        self.sink.message(Message::from(&err));
        self.release();
        self.state = PipelineState::Error;
        self.state
    }

    fn report_model_failure(&mut self) {
        if self.session.model_error_reported {
            return;
        }
        if let ModelState::Failed(err) = &self.session.model {
            self.sink.message(Message::from(err));
            self.session.model_error_reported = true;
        }
    }

    fn preview_defaults(&mut self) {
        let defaults = self.session.config.defaults.clone();
        for (caption, path) in [
            (PREVIEW_DEFAULT, defaults.image),
            (PREVIEW_DEFAULT_DETECTED, defaults.detected_image),
        ] {
            let Some(path) = path else { continue };
            match load_preview(&path) {
                Ok(image) => self.sink.preview(caption, &image),
                Err(err) => self.sink.message(Message::warning(format!(
                    "cannot show {} {}: {}",
                    caption.to_lowercase(),
                    path.display(),
                    err
                ))),
            }
        }
    }

    fn release(&mut self) {
        if let Some(source) = self.source.take() {
            let stats = source.stats();
            log::info!(
                "released {} source {} after {} frame(s)",
                source.kind(),
                stats.origin,
                stats.frames_captured
            );
        }
        self.image_frame = None;
    }
}

fn load_preview(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::open(path)?.to_rgb8())
}

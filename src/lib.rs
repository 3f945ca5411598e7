//! cellscan: immune cell detection over images and video streams.
//!
//! Frames come from one of five source kinds (static image, local video,
//! webcam, RTSP, remote video page), are run through a single pretrained
//! detector at a confidence threshold, and are summarised per cell class with
//! each class's category ("Small Eaters" / "Big Eaters").
//!
//! # Module Structure
//!
//! - `ingest`: frame sources behind the `FrameSource` trait, with `stub://`
//!   synthetic backends for every kind
//! - `frame`: the normalized RGB24 `Frame`
//! - `detect`: model loading and per-frame detection
//! - `taxonomy`: class vocabulary and category table
//! - `aggregate`: per-class tallies
//! - `render`: detection overlays
//! - `sink`: presentation sinks
//! - `pipeline`: `Session` and the `Orchestrator` state machine
//! - `config`: file + environment configuration
//! - `error`: the user-facing `PipelineError`

pub mod aggregate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod sink;
pub mod taxonomy;

pub use aggregate::{aggregate, ClassTally, TallyLine};
pub use config::{AppConfig, Task};
pub use detect::{
    load_model, BoundingBox, Detection, DetectionSet, Detector, DetectorBackend, ModelSettings,
};
pub use error::{PipelineError, PipelineResult};
pub use frame::Frame;
pub use ingest::{
    FrameSource, IngestFactory, IngestSettings, SourceDefaults, SourceDescriptor, SourceFactory,
    SourceKind, SourceStats,
};
pub use pipeline::{
    ModelState, Orchestrator, PipelineState, Session, StepOutcome, StreamEnd, StreamSummary,
};
pub use sink::{FrameReport, Level, Message, PresentationSink, RecordingSink, TerminalSink};
pub use taxonomy::Taxonomy;

//! cellscan - detect and count immune cells in an image or video stream

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::RgbImage;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cellscan::{
    AppConfig, FrameReport, IngestFactory, Message, Orchestrator, PipelineState,
    PresentationSink, Session, SourceDescriptor, SourceKind, TerminalSink,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source kind (image|video|webcam|rtsp|youtube).
    #[arg(long, default_value = "image")]
    source: SourceKind,
    /// Image or video path, webcam device, RTSP URL or video page URL.
    #[arg(long)]
    input: Option<String>,
    /// Confidence threshold in [0, 1]; overrides the configured value.
    #[arg(long)]
    confidence: Option<f32>,
    /// Model path (or stub://name) for the configured task.
    #[arg(long)]
    model: Option<String>,
    /// Stop a stream after this many frames, skipped ones included.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Directory to save annotated frames into.
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// List every detection box.
    #[arg(long)]
    verbose: bool,
    /// Print one JSON report per frame instead of text.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE")]
    ui: ui::UiMode,
}

/// Terminal output plus a frame counter while streaming.
struct CliSink {
    terminal: TerminalSink,
    progress: Option<ui::FrameProgress>,
}

impl PresentationSink for CliSink {
    fn preview(&mut self, caption: &str, image: &RgbImage) {
        self.terminal.preview(caption, image);
    }

    fn render(&mut self, report: &FrameReport) {
        self.terminal.render(report);
        if let Some(progress) = &self.progress {
            progress.frame_rendered(report.detections.len());
        }
    }

    fn message(&mut self, message: Message) {
        self.terminal.message(message);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::new(args.ui, is_tty, !stdout_is_tty);

    let mut config = AppConfig::load().context("load configuration")?;
    if let Some(model) = &args.model {
        config.set_model_path(model.clone());
    }
    if let Some(confidence) = args.confidence {
        config.confidence = confidence;
    }
    config.validate()?;

    let descriptor =
        SourceDescriptor::from_input(args.source, args.input.as_deref(), &config.sources)?;

    let session = {
        let _stage = ui.stage("Load model");
        Session::new(config.clone())
    };
    let mut terminal = TerminalSink::stdout()
        .verbose(args.verbose)
        .json(args.json);
    if let Some(dir) = args.save_dir {
        terminal = terminal.save_to(dir);
    }
    let sink = CliSink {
        terminal,
        progress: None,
    };
    let mut orchestrator = Orchestrator::new(session, IngestFactory::new(config.ingest), sink);

    let state = {
        let _stage = ui.stage(&format!("Open {} source", args.source));
        orchestrator.select_source(descriptor)
    };
    match state {
        PipelineState::SourceSelected => {}
        PipelineState::Idle => return Ok(()),
        _ => return Err(anyhow!("could not start {} source", args.source)),
    }

    if !args.source.is_streaming() {
        let _stage = ui.stage("Detect cells");
        return match orchestrator.detect_now() {
            PipelineState::Rendered => Ok(()),
            _ => Err(anyhow!("detection failed")),
        };
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    orchestrator.sink_mut().progress = Some(ui.frames(&args.source.to_string()));
    let summary = orchestrator.run_stream_limited(&cancel, args.max_frames);
    if let Some(progress) = orchestrator.sink_mut().progress.take() {
        progress.finish(&format!(
            "{} frame(s) rendered, {} skipped",
            summary.frames_rendered, summary.frames_skipped
        ));
    }
    match summary.end {
        cellscan::StreamEnd::Failed => Err(anyhow!("{} stream failed", args.source)),
        _ => Ok(()),
    }
}

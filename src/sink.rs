//! Presentation sinks: where previews, per-frame results and user messages go.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Serialize;

use crate::aggregate::TallyLine;
use crate::detect::Detection;
use crate::error::PipelineError;
use crate::ingest::SourceKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            text: text.into(),
        }
    }
}

impl From<&PipelineError> for Message {
    fn from(err: &PipelineError) -> Self {
        let level = if err.is_per_frame() {
            Level::Warning
        } else {
            Level::Error
        };
        Self {
            level,
            text: err.to_string(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Everything the user sees for one processed frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub source: SourceKind,
    pub frame_index: u64,
    /// Frame with detections drawn on it.
    pub annotated: RgbImage,
    pub lines: Vec<TallyLine>,
    pub detections: Vec<Detection>,
}

pub trait PresentationSink {
    /// Show an image that is not a detection result (source preview, defaults).
    fn preview(&mut self, caption: &str, image: &RgbImage);

    fn render(&mut self, report: &FrameReport);

    fn message(&mut self, message: Message);
}

/// One JSON line per rendered frame.
#[derive(Serialize)]
struct JsonReport<'a> {
    source: String,
    frame_index: u64,
    lines: &'a [TallyLine],
    detections: &'a [Detection],
}

/// Writes results to stdout and messages through `log`.
pub struct TerminalSink<W: Write = std::io::Stdout> {
    out: W,
    verbose: bool,
    json: bool,
    save_dir: Option<PathBuf>,
}

impl TerminalSink {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            verbose: false,
            json: false,
            save_dir: None,
        }
    }

    /// Also list every detection box.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Emit each frame report as a JSON line instead of text.
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Save annotated frames as PNG into `dir`.
    pub fn save_to(mut self, dir: PathBuf) -> Self {
        self.save_dir = Some(dir);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_report(&mut self, report: &FrameReport) -> Result<()> {
        if self.json {
            let line = JsonReport {
                source: report.source.to_string(),
                frame_index: report.frame_index,
                lines: &report.lines,
                detections: &report.detections,
            };
            serde_json::to_writer(&mut self.out, &line).context("encode frame report")?;
            writeln!(self.out)?;
            return Ok(());
        }
        writeln!(
            self.out,
            "[{} frame {}] {} cell(s)",
            report.source,
            report.frame_index,
            report.detections.len()
        )?;
        for line in &report.lines {
            writeln!(self.out, "Cell Detected: {} : {}", line.label, line.count)?;
            if let Some(category) = &line.category {
                writeln!(self.out, "Category: {}", category)?;
            }
        }
        if self.verbose {
            writeln!(self.out, "Detection Results")?;
            for d in &report.detections {
                writeln!(
                    self.out,
                    "  {:<12} {:.2}  [{:.1}, {:.1}, {:.1}, {:.1}]",
                    d.label, d.confidence, d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2
                )?;
            }
        }
        Ok(())
    }

    fn save(&self, name: &str, image: &RgbImage) -> Result<()> {
        let Some(dir) = &self.save_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
        let path = dir.join(name);
        image
            .save(&path)
            .with_context(|| format!("save {}", path.display()))?;
        log::debug!("saved {}", path.display());
        Ok(())
    }
}

impl<W: Write> PresentationSink for TerminalSink<W> {
    fn preview(&mut self, caption: &str, image: &RgbImage) {
        log::info!("{} ({}x{})", caption, image.width(), image.height());
        let name = format!("{}.png", slug(caption));
        if let Err(err) = self.save(&name, image) {
            log::warn!("{:#}", err);
        }
    }

    fn render(&mut self, report: &FrameReport) {
        if let Err(err) = self.write_report(report) {
            log::warn!("failed to write frame report: {}", err);
        }
        let name = format!("{}_{:05}.png", report.source, report.frame_index);
        if let Err(err) = self.save(&name, &report.annotated) {
            log::warn!("{:#}", err);
        }
    }

    fn message(&mut self, message: Message) {
        match message.level {
            Level::Info => log::info!("{}", message.text),
            Level::Warning => log::warn!("{}", message.text),
            Level::Error => log::error!("{}", message.text),
        }
    }
}

fn slug(caption: &str) -> String {
    caption
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Keeps everything in memory.
#[derive(Default)]
pub struct RecordingSink {
    pub previews: Vec<(String, RgbImage)>,
    pub reports: Vec<FrameReport>,
    pub messages: Vec<Message>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_at(&self, level: Level) -> impl Iterator<Item = &Message> + '_ {
        self.messages.iter().filter(move |m| m.level == level)
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.reports.last()
    }
}

impl PresentationSink for RecordingSink {
    fn preview(&mut self, caption: &str, image: &RgbImage) {
        self.previews.push((caption.to_string(), image.clone()));
    }

    fn render(&mut self, report: &FrameReport) {
        self.reports.push(report.clone());
    }

    fn message(&mut self, message: Message) {
        self.messages.push(message);
    }
}

//! cellscan_demo - end-to-end synthetic run over every source kind

use anyhow::{anyhow, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use cellscan::{
    AppConfig, IngestFactory, Level, Orchestrator, PipelineState, RecordingSink, Session,
    SourceDescriptor, SourceKind,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames to render from each streaming source.
    #[arg(long, default_value_t = 10)]
    frames: u64,
    /// Confidence threshold in [0, 1].
    #[arg(long, default_value_t = 0.40)]
    confidence: f32,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE")]
    ui: ui::UiMode,
}

fn descriptor(kind: SourceKind) -> SourceDescriptor {
    match kind {
        SourceKind::StaticImage => SourceDescriptor::StaticImage {
            path: Some(PathBuf::from("stub://blood_smear")),
        },
        SourceKind::LocalVideo => SourceDescriptor::LocalVideo {
            path: PathBuf::from("stub://smear_scan"),
        },
        SourceKind::Webcam => SourceDescriptor::Webcam {
            device: "stub://microscope_cam".to_string(),
        },
        SourceKind::Rtsp => SourceDescriptor::Rtsp {
            url: "stub://lab_stream".to_string(),
        },
        SourceKind::RemoteVideo => SourceDescriptor::RemoteVideo {
            url: "stub://lecture".to_string(),
        },
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if args.frames == 0 {
        return Err(anyhow!("frames must be >= 1"));
    }

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::new(args.ui, is_tty, !stdout_is_tty);

    let mut config = AppConfig::default();
    config.set_model_path("stub://cells");
    config.confidence = args.confidence;
    config.defaults.image = None;
    config.defaults.detected_image = None;
    config.validate()?;

    let session = Session::new(config.clone());
    let factory = IngestFactory::new(config.ingest.clone());
    let mut orchestrator = Orchestrator::new(session, factory, RecordingSink::new());
    let cancel = AtomicBool::new(false);

    for kind in SourceKind::ALL {
        let _stage = ui.stage(&format!("Run {} source", kind));
        if orchestrator.select_source(descriptor(kind)) != PipelineState::SourceSelected {
            return Err(anyhow!("{} source did not open", kind));
        }
        if kind.is_streaming() {
            let progress = ui.frames(&kind.to_string());
            let summary = orchestrator.run_stream_limited(&cancel, Some(args.frames));
            progress.finish(&format!("{} frame(s)", summary.frames_rendered));
        } else if orchestrator.detect_now() != PipelineState::Rendered {
            return Err(anyhow!("detection on the demo image failed"));
        }
    }

    let sink = orchestrator.into_sink();
    let errors: Vec<_> = sink.messages_at(Level::Error).collect();
    if let Some(first) = errors.first() {
        return Err(anyhow!("demo reported an error: {}", first));
    }

    println!("cellscan demo (threshold {:.2})", args.confidence);
    for kind in SourceKind::ALL {
        let reports: Vec<_> = sink.reports.iter().filter(|r| r.source == kind).collect();
        let mut per_category: BTreeMap<String, usize> = BTreeMap::new();
        for line in reports.iter().flat_map(|r| r.lines.iter()) {
            let category = line.category.clone().unwrap_or_else(|| "Uncategorised".into());
            *per_category.entry(category).or_default() += line.count;
        }
        let breakdown = per_category
            .iter()
            .map(|(category, count)| format!("{}: {}", category, count))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {:<8} {:>3} frame(s)  {}",
            kind.to_string(),
            reports.len(),
            if breakdown.is_empty() {
                "no cells".to_string()
            } else {
                breakdown
            }
        );
    }
    Ok(())
}

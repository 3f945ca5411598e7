use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{validate_threshold, ModelSettings, DEFAULT_INPUT_SIZE};
use crate::ingest::{IngestSettings, SourceDefaults};
use crate::taxonomy::Taxonomy;

const DEFAULT_DETECTION_MODEL: &str = "weights/detection.onnx";
const DEFAULT_CELL_DETECTION_MODEL: &str = "weights/cell_detection.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.40;
const DEFAULT_WEBCAM_DEVICE: &str = "/dev/video0";
const DEFAULT_RTSP_URL: &str = "rtsp://localhost:8554/stream";
const DEFAULT_IMAGE: &str = "images/default.jpg";
const DEFAULT_DETECTED_IMAGE: &str = "images/default_detected.jpg";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    task: Option<String>,
    confidence: Option<f32>,
    input_size: Option<u32>,
    models: Option<ModelsConfigFile>,
    taxonomy: Option<TaxonomyConfigFile>,
    ingest: Option<IngestConfigFile>,
    sources: Option<SourcesConfigFile>,
    defaults: Option<DefaultsConfigFile>,
    resolver: Option<ResolverConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    detection: Option<String>,
    cell_detection: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TaxonomyConfigFile {
    labels: Option<Vec<String>>,
    categories: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    read_timeout_ms: Option<u64>,
    synthetic_video_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourcesConfigFile {
    webcam_device: Option<String>,
    rtsp_url: Option<String>,
    remote_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DefaultsConfigFile {
    image: Option<PathBuf>,
    detected_image: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ResolverConfigFile {
    program: Option<String>,
    args: Option<Vec<String>>,
}

/// Which model the session runs. Each task has its own model path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Detection,
    CellDetection,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Task::Detection => "detection",
            Task::CellDetection => "cell-detection",
        })
    }
}

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "detection" => Ok(Task::Detection),
            "cell-detection" | "cell_detection" => Ok(Task::CellDetection),
            other => Err(anyhow!(
                "unknown task '{}'; expected detection or cell-detection",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detection: String,
    pub cell_detection: String,
}

/// Images shown when no static image has been supplied yet.
#[derive(Debug, Clone, Default)]
pub struct DefaultImages {
    pub image: Option<PathBuf>,
    pub detected_image: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub task: Task,
    pub models: ModelPaths,
    pub input_size: u32,
    pub confidence: f32,
    pub taxonomy: Taxonomy,
    pub ingest: IngestSettings,
    pub sources: SourceDefaults,
    pub defaults: DefaultImages,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            task: Task::CellDetection,
            models: ModelPaths {
                detection: DEFAULT_DETECTION_MODEL.to_string(),
                cell_detection: DEFAULT_CELL_DETECTION_MODEL.to_string(),
            },
            input_size: DEFAULT_INPUT_SIZE,
            confidence: DEFAULT_CONFIDENCE,
            taxonomy: Taxonomy::default(),
            ingest: IngestSettings::default(),
            sources: SourceDefaults {
                webcam_device: DEFAULT_WEBCAM_DEVICE.to_string(),
                rtsp_url: DEFAULT_RTSP_URL.to_string(),
                remote_url: None,
            },
            defaults: DefaultImages {
                image: Some(PathBuf::from(DEFAULT_IMAGE)),
                detected_image: Some(PathBuf::from(DEFAULT_DETECTED_IMAGE)),
            },
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CELLSCAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, skipping environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(task) = file.task.as_deref() {
            cfg.task = task.parse()?;
        }
        if let Some(models) = file.models {
            cfg.models.detection = models.detection.unwrap_or(cfg.models.detection);
            cfg.models.cell_detection = models.cell_detection.unwrap_or(cfg.models.cell_detection);
        }
        cfg.input_size = file.input_size.unwrap_or(cfg.input_size);
        cfg.confidence = file.confidence.unwrap_or(cfg.confidence);

        if let Some(TaxonomyConfigFile { labels, categories }) = file.taxonomy {
            let labels = labels.unwrap_or_else(|| cfg.taxonomy.labels().to_vec());
            let categories = categories.unwrap_or_else(|| {
                labels
                    .iter()
                    .filter_map(|l| {
                        cfg.taxonomy
                            .category_for(l)
                            .map(|c| (l.clone(), c.to_string()))
                    })
                    .collect()
            });
            cfg.taxonomy = Taxonomy::new(labels, categories)?;
        }

        if let Some(ingest) = file.ingest {
            let current = &mut cfg.ingest;
            current.target_fps = ingest.target_fps.unwrap_or(current.target_fps);
            current.width = ingest.width.unwrap_or(current.width);
            current.height = ingest.height.unwrap_or(current.height);
            if let Some(ms) = ingest.read_timeout_ms {
                current.read_timeout = Duration::from_millis(ms);
            }
            current.synthetic_video_frames = ingest
                .synthetic_video_frames
                .unwrap_or(current.synthetic_video_frames);
        }
        if let Some(resolver) = file.resolver {
            if let Some(program) = resolver.program {
                cfg.ingest.resolver_program = program;
            }
            if let Some(args) = resolver.args {
                cfg.ingest.resolver_args = args;
            }
        }

        if let Some(sources) = file.sources {
            if let Some(device) = sources.webcam_device {
                cfg.sources.webcam_device = device;
            }
            if let Some(url) = sources.rtsp_url {
                cfg.sources.rtsp_url = url;
            }
            cfg.sources.remote_url = sources.remote_url;
        }

        // An explicit defaults section replaces both paths; omitted entries disable them.
        if let Some(defaults) = file.defaults {
            cfg.defaults = DefaultImages {
                image: defaults.image,
                detected_image: defaults.detected_image,
            };
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(task) = std::env::var("CELLSCAN_TASK") {
            if !task.trim().is_empty() {
                self.task = task.parse()?;
            }
        }
        if let Ok(path) = std::env::var("CELLSCAN_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.set_model_path(path);
            }
        }
        if let Ok(confidence) = std::env::var("CELLSCAN_CONFIDENCE") {
            self.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("CELLSCAN_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(timeout) = std::env::var("CELLSCAN_READ_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("CELLSCAN_READ_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.ingest.read_timeout = Duration::from_millis(millis);
        }
        if let Ok(device) = std::env::var("CELLSCAN_WEBCAM_DEVICE") {
            if !device.trim().is_empty() {
                self.sources.webcam_device = device;
            }
        }
        if let Ok(url) = std::env::var("CELLSCAN_RTSP_URL") {
            if !url.trim().is_empty() {
                self.sources.rtsp_url = url;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.confidence)?;
        if self.ingest.read_timeout.is_zero() {
            return Err(anyhow!("read timeout must be greater than zero"));
        }
        if self.ingest.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.ingest.width == 0 || self.ingest.height == 0 {
            return Err(anyhow!("ingest width and height must be greater than zero"));
        }
        if self.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.model_path().trim().is_empty() {
            return Err(anyhow!("model path for task {} is empty", self.task));
        }
        Ok(())
    }

    /// Model path for the active task.
    pub fn model_path(&self) -> &str {
        match self.task {
            Task::Detection => &self.models.detection,
            Task::CellDetection => &self.models.cell_detection,
        }
    }

    /// Override the model path of the active task.
    pub fn set_model_path(&mut self, path: impl Into<String>) {
        match self.task {
            Task::Detection => self.models.detection = path.into(),
            Task::CellDetection => self.models.cell_detection = path.into(),
        }
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            path: self.model_path().to_string(),
            class_names: self.taxonomy.labels().to_vec(),
            input_size: self.input_size,
        }
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let cfg = AppConfig::default();
        cfg.validate()?;
        assert_eq!(cfg.task, Task::CellDetection);
        assert_eq!(cfg.model_path(), DEFAULT_CELL_DETECTION_MODEL);
        assert!((cfg.confidence - 0.40).abs() < f32::EPSILON);
        assert_eq!(cfg.taxonomy, Taxonomy::default());
        assert_eq!(cfg.ingest.read_timeout, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn task_selects_model_path() -> Result<()> {
        let mut cfg = AppConfig::default();
        cfg.task = "detection".parse()?;
        assert_eq!(cfg.model_path(), DEFAULT_DETECTION_MODEL);
        cfg.set_model_path("stub://people");
        assert_eq!(cfg.model_settings().path, "stub://people");
        assert_eq!(cfg.models.cell_detection, DEFAULT_CELL_DETECTION_MODEL);
        assert!("segmentation".parse::<Task>().is_err());
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut cfg = AppConfig::default();
        cfg.confidence = 1.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn labels_without_categories_keep_known_categories() -> Result<()> {
        let file = AppConfigFile {
            taxonomy: Some(TaxonomyConfigFile {
                labels: Some(vec!["platelet".to_string(), "sickle".to_string()]),
                categories: None,
            }),
            ..AppConfigFile::default()
        };
        let cfg = AppConfig::from_file(file)?;
        assert_eq!(cfg.taxonomy.category_for("platelet"), Some("Small Eaters"));
        assert_eq!(cfg.taxonomy.category_for("sickle"), None);
        Ok(())
    }
}

//! Detector invocation.
//!
//! A session loads one model through `load_model` and then calls
//! `Detector::detect` once per frame. `stub://` model paths select the
//! deterministic stub backend; anything else is an ONNX file run with tract.

use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

mod backend;
pub mod backends;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use result::{BoundingBox, Detection, DetectionSet};

pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// What to load and how to interpret its outputs.
#[derive(Clone, Debug)]
pub struct ModelSettings {
    /// Local file path, or `stub://name` for the synthetic backend.
    pub path: String,
    /// Class labels in model class-index order.
    pub class_names: Vec<String>,
    /// Side of the square model input.
    pub input_size: u32,
}

/// Session handle to a loaded model. Cheap to clone.
#[derive(Clone)]
pub struct Detector {
    backend: Arc<dyn DetectorBackend>,
    model_path: String,
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("backend", &self.backend.name())
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl Detector {
    pub fn new(backend: Arc<dyn DetectorBackend>, model_path: impl Into<String>) -> Self {
        Self {
            backend,
            model_path: model_path.into(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn class_names(&self) -> &[String] {
        self.backend.class_names()
    }

    /// Run the model on one frame, keeping detections at or above `threshold`.
    pub fn detect(&self, frame: Frame, threshold: f32) -> PipelineResult<DetectionSet> {
        validate_threshold(threshold)?;
        if frame.is_empty() {
            return Err(PipelineError::frame_decode(frame.index, "frame has no pixels"));
        }
        let detections = self
            .backend
            .infer(&frame, threshold)
            .map_err(|err| PipelineError::frame_decode(frame.index, err))?;
        debug_assert!(
            detections.iter().all(|d| d.confidence >= threshold),
            "backend {} returned a detection below threshold",
            self.backend.name()
        );
        log::debug!(
            "frame {}: {} detection(s) at threshold {:.2}",
            frame.index,
            detections.len(),
            threshold
        );
        Ok(DetectionSet::new(frame, detections))
    }
}

pub fn validate_threshold(threshold: f32) -> PipelineResult<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::config(format!(
            "confidence threshold {} is outside [0, 1]",
            threshold
        )));
    }
    Ok(())
}

/// Load the model named by `settings`. Called once per session.
pub fn load_model(settings: &ModelSettings) -> PipelineResult<Detector> {
    let path = settings.path.trim();
    if path.is_empty() {
        return Err(PipelineError::model_load(path, "model path is empty"));
    }

    let backend: Arc<dyn DetectorBackend> = if crate::ingest::is_stub(path) {
        Arc::new(
            StubBackend::new(settings.class_names.clone())
                .map_err(|err| PipelineError::model_load(path, err))?,
        )
    } else {
        load_onnx(path, settings)?
    };
    ready(backend, path)
}

/// Warm a freshly built backend up; any failure is a load failure.
fn ready(backend: Arc<dyn DetectorBackend>, path: &str) -> PipelineResult<Detector> {
    backend
        .warm_up()
        .map_err(|err| PipelineError::model_load(path, err))?;
    log::info!(
        "loaded model {} ({} backend, {} classes)",
        path,
        backend.name(),
        backend.class_names().len()
    );
    Ok(Detector::new(backend, path))
}

#[cfg(feature = "backend-tract")]
fn load_onnx(path: &str, settings: &ModelSettings) -> PipelineResult<Arc<dyn DetectorBackend>> {
    if !std::path::Path::new(path).is_file() {
        return Err(PipelineError::model_load(path, "model file not found"));
    }
    let backend =
        backends::TractBackend::new(path, settings.input_size, settings.class_names.clone())
            .map_err(|err| PipelineError::model_load(path, err))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(path: &str, _settings: &ModelSettings) -> PipelineResult<Arc<dyn DetectorBackend>> {
    Err(PipelineError::model_load(
        path,
        "ONNX models need the backend-tract feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::synthetic_frame;
    use anyhow::Result;

    fn settings(path: &str) -> ModelSettings {
        ModelSettings {
            path: path.to_string(),
            class_names: vec!["neutrophil".to_string(), "platelet".to_string()],
            input_size: DEFAULT_INPUT_SIZE,
        }
    }

    #[test]
    fn loads_stub_model() -> Result<()> {
        let detector = load_model(&settings("stub://cells"))?;
        assert_eq!(detector.backend_name(), "stub");
        assert_eq!(detector.class_names().len(), 2);
        Ok(())
    }

    struct MismatchedBackend(Vec<String>);

    impl DetectorBackend for MismatchedBackend {
        fn name(&self) -> &'static str {
            "mismatched"
        }

        fn class_names(&self) -> &[String] {
            &self.0
        }

        fn infer(&self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }

        fn warm_up(&self) -> Result<()> {
            yolo::output_proposals(&[1, 84, 8400], self.0.len())?;
            Ok(())
        }
    }

    #[test]
    fn class_count_mismatch_fails_at_load() {
        let backend = Arc::new(MismatchedBackend(vec!["neutrophil".to_string()]));
        let err = ready(backend, "weights/coco.onnx").unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
        assert!(err.to_string().contains("expected [1, 5, N]"));
    }

    #[test]
    fn missing_model_is_model_load_error() {
        let err = load_model(&settings("/nonexistent/weights.onnx")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
        let err = load_model(&settings("  ")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad { .. }));
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() -> Result<()> {
        let detector = load_model(&settings("stub://cells"))?;
        let frame = synthetic_frame(16, 16, 1, 0)?;
        for threshold in [-0.1, 1.5, f32::NAN] {
            let err = detector.detect(frame.clone(), threshold).unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)));
        }
        Ok(())
    }

    #[test]
    fn detections_never_fall_below_threshold() -> Result<()> {
        let detector = load_model(&settings("stub://cells"))?;
        for index in 1..25 {
            let frame = synthetic_frame(48, 32, index, 2)?;
            for step in 0..=10 {
                let threshold = step as f32 / 10.0;
                let set = detector.detect(frame.clone(), threshold)?;
                assert!(set.detections().iter().all(|d| d.confidence >= threshold));
                assert_eq!(set.frame().index, index);
            }
        }
        Ok(())
    }
}

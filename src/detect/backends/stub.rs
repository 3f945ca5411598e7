use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Bytes of digest consumed per synthetic detection.
const BYTES_PER_DETECTION: usize = 6;
const MAX_DETECTIONS: usize = 4;

/// Stub backend for testing and demos. Uses a pixel hash to derive detections.
///
/// The same frame always yields the same raw detections, and raw confidences
/// are spread over `[0, 1]` so thresholds have a visible effect.
pub struct StubBackend {
    class_names: Vec<String>,
}

impl StubBackend {
    pub fn new(class_names: Vec<String>) -> Result<Self> {
        if class_names.is_empty() {
            return Err(anyhow!("stub model needs at least one class"));
        }
        Ok(Self { class_names })
    }

    fn raw_detections(&self, frame: &Frame) -> Vec<Detection> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = digest[0] as usize % (MAX_DETECTIONS + 1);
        let (w, h) = (frame.width as f32, frame.height as f32);

        (0..count)
            .map(|n| {
                let b = &digest[1 + n * BYTES_PER_DETECTION..1 + (n + 1) * BYTES_PER_DETECTION];
                let class_id = b[0] as usize % self.class_names.len();
                let confidence = b[1] as f32 / 255.0;
                let x1 = b[2] as f32 / 255.0 * w * 0.8;
                let y1 = b[3] as f32 / 255.0 * h * 0.8;
                let bbox = BoundingBox {
                    x1,
                    y1,
                    x2: x1 + (0.05 + b[4] as f32 / 255.0 * 0.15) * w,
                    y2: y1 + (0.05 + b[5] as f32 / 255.0 * 0.15) * h,
                }
                .clamped(frame.width, frame.height);
                Detection {
                    class_id,
                    label: self.class_names[class_id].clone(),
                    bbox,
                    confidence,
                }
            })
            .collect()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        Ok(self
            .raw_detections(frame)
            .into_iter()
            .filter(|d| d.confidence >= threshold)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::synthetic_frame;

    fn backend() -> StubBackend {
        StubBackend::new(vec!["neutrophil".to_string(), "platelet".to_string()]).unwrap()
    }

    #[test]
    fn stub_backend_is_deterministic() -> Result<()> {
        let frame = synthetic_frame(32, 32, 5, 0)?;
        let backend = backend();
        assert_eq!(backend.infer(&frame, 0.0)?, backend.infer(&frame, 0.0)?);
        Ok(())
    }

    #[test]
    fn stub_backend_respects_threshold() -> Result<()> {
        let backend = backend();
        for index in 1..40 {
            let frame = synthetic_frame(32, 32, index, 0)?;
            let all = backend.infer(&frame, 0.0)?;
            for threshold in [0.1, 0.4, 0.9] {
                let kept = backend.infer(&frame, threshold)?;
                assert!(kept.iter().all(|d| d.confidence >= threshold));
                let expected = all.iter().filter(|d| d.confidence >= threshold).count();
                assert_eq!(kept.len(), expected);
            }
            assert!(all.iter().all(|d| d.bbox.x2 <= 32.0 && d.bbox.y2 <= 32.0));
        }
        Ok(())
    }

    #[test]
    fn stub_backend_needs_classes() {
        assert!(StubBackend::new(Vec::new()).is_err());
    }
}

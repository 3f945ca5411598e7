use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one loaded model. Its parameters are fixed after loading, so
/// `infer` takes `&self` and a backend can be shared behind an `Arc` for the
/// whole session without locking.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class labels indexed by class id.
    fn class_names(&self) -> &[String];

    /// Run detection on a frame.
    ///
    /// Thresholding happens here: implementations MUST NOT return a detection
    /// whose confidence is below `threshold`.
    fn infer(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

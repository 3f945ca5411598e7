//! User-facing error taxonomy.
//!
//! Every failure that reaches the orchestrator boundary is one of these four
//! variants. Plumbing code uses `anyhow` and is converted here at the adapter
//! or loader boundary, so the orchestrator can decide severity without
//! inspecting strings.

use thiserror::Error;

use crate::ingest::SourceKind;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The model artifact could not be loaded. Fatal to the session.
    #[error("unable to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    /// The source could not be opened, or died mid-stream.
    #[error("{kind} source unavailable: {reason}")]
    SourceUnavailable { kind: SourceKind, reason: String },

    /// A single frame failed to decode. The stream continues.
    #[error("frame {index} could not be decoded: {reason}")]
    FrameDecode { index: u64, reason: String },

    /// Invalid threshold, unknown source kind, malformed origin.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn model_load(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: format!("{:#}", err),
        }
    }

    pub fn unavailable(kind: SourceKind, err: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            kind,
            reason: format!("{:#}", err),
        }
    }

    pub fn frame_decode(index: u64, err: impl std::fmt::Display) -> Self {
        Self::FrameDecode {
            index,
            reason: format!("{:#}", err),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True when the error only affects one frame.
    pub fn is_per_frame(&self) -> bool {
        matches!(self, Self::FrameDecode { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_chains_are_flattened_into_reason() {
        let err = anyhow::anyhow!("connection refused").context("open rtsp pipeline");
        let mapped = PipelineError::unavailable(SourceKind::Rtsp, err);
        let text = mapped.to_string();
        assert!(text.contains("open rtsp pipeline"));
        assert!(text.contains("connection refused"));
        assert!(!mapped.is_per_frame());
    }

    #[test]
    fn only_decode_errors_are_per_frame() {
        assert!(PipelineError::frame_decode(3, "truncated").is_per_frame());
        assert!(!PipelineError::config("bad threshold").is_per_frame());
    }
}

#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{
    decode_output, output_proposals, InputGeometry, DEFAULT_IOU_THRESHOLD,
};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model is loaded from a local file once and never touches the network.
/// Frames are resized to the square model input, scaled to `[0, 1]` and laid
/// out as NCHW.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if class_names.is_empty() {
            return Err(anyhow!("model needs at least one class name"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(&frame.to_image(), side, side, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let num_proposals = output_proposals(scores.shape(), self.class_names.len())?;
        let data: Vec<f32> = scores.iter().copied().collect();

        decode_output(
            &data,
            num_proposals,
            &self.class_names,
            InputGeometry {
                input_size: self.input_size,
                frame_width: frame.width,
                frame_height: frame.height,
            },
            threshold,
            self.iou_threshold,
        )
    }

    /// Runs a blank frame and checks the output matches the configured classes,
    /// so a mismatched model fails at load time instead of on every frame.
    fn warm_up(&self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = Tensor::zero::<f32>(&[1, 3, side, side]).context("allocate warm-up input")?;
        let outputs = self
            .model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up run failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        output_proposals(output.shape(), self.class_names.len())
            .context("model does not match the configured class labels")?;
        Ok(())
    }
}

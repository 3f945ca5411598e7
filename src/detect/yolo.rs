//! YOLOv8-style output decoding.
//!
//! The model emits `[1, 4 + C, N]`: for each of `N` proposals a centre-format box
//! `(cx, cy, w, h)` in model-input pixels followed by `C` class scores, stored
//! row-major by attribute. Decoding keeps the best class per proposal, applies
//! the confidence threshold, maps boxes back to frame pixels and runs per-class
//! NMS.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Geometry needed to map model coordinates back to the frame.
#[derive(Clone, Copy, Debug)]
pub struct InputGeometry {
    pub input_size: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Check a raw output shape against the class list and return the proposal count.
pub fn output_proposals(shape: &[usize], num_classes: usize) -> Result<usize> {
    match shape {
        [1, attributes, proposals] if *attributes == 4 + num_classes => Ok(*proposals),
        _ => Err(anyhow!(
            "unexpected model output shape {:?}; expected [1, {}, N] for {} classes",
            shape,
            4 + num_classes,
            num_classes
        )),
    }
}

pub fn decode_output(
    data: &[f32],
    num_proposals: usize,
    class_names: &[String],
    geometry: InputGeometry,
    threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<Detection>> {
    let num_classes = class_names.len();
    let expected = (4 + num_classes) * num_proposals;
    if data.len() != expected {
        return Err(anyhow!(
            "model output has {} values, expected {} for {} classes x {} proposals",
            data.len(),
            expected,
            num_classes,
            num_proposals
        ));
    }

    let scale_x = geometry.frame_width as f32 / geometry.input_size as f32;
    let scale_y = geometry.frame_height as f32 / geometry.input_size as f32;
    let at = |row: usize, i: usize| data[row * num_proposals + i];

    let mut candidates = Vec::new();
    for i in 0..num_proposals {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, at(4 + c, i)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let bbox = BoundingBox {
            x1: (cx - w / 2.0) * scale_x,
            y1: (cy - h / 2.0) * scale_y,
            x2: (cx + w / 2.0) * scale_x,
            y2: (cy + h / 2.0) * scale_y,
        }
        .clamped(geometry.frame_width, geometry.frame_height);

        candidates.push(Detection {
            class_id,
            label: class_names[class_id].clone(),
            bbox,
            confidence: score.min(1.0),
        });
    }

    Ok(nms(candidates, iou_threshold))
}

/// Greedy non-maximum suppression, applied within each class.
pub fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

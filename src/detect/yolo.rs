//! YOLO output decoding.
//!
//! Works on a plain `[1, 4 + classes, anchors]` f32 buffer so the decoder can
//! be exercised without loading a model.

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Clone, Debug, PartialEq)]
pub struct YoloParams {
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Class index counted as the target vehicle.
    pub target_class: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            target_class: 0,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// Decode raw head output into detections in source-image pixels.
pub fn decode_output(
    data: &[f32],
    shape: &[usize],
    params: &YoloParams,
    image_width: u32,
    image_height: u32,
) -> Result<Vec<Detection>> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(anyhow!("expected output shape [1, C, N], got {:?}", shape));
    }
    let rows = shape[1];
    let anchors = shape[2];
    if rows < 5 {
        return Err(anyhow!("output has {} rows; need at least 5", rows));
    }
    if data.len() != rows * anchors {
        return Err(anyhow!(
            "output buffer holds {} values, shape {:?} needs {}",
            data.len(),
            shape,
            rows * anchors
        ));
    }
    let num_classes = rows - 4;
    if params.target_class >= num_classes {
        return Err(anyhow!(
            "target class {} out of range for {} classes",
            params.target_class,
            num_classes
        ));
    }

    let at = |row: usize, anchor: usize| data[row * anchors + anchor];
    let scale_x = image_width as f32 / params.input_size as f32;
    let scale_y = image_height as f32 / params.input_size as f32;
    let max_x = image_width as f32;
    let max_y = image_height as f32;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        // The anchor only counts when the target class is its best class.
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class_idx in 0..num_classes {
            let score = at(4 + class_idx, i);
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }
        if best_class != params.target_class || best_score < params.confidence_threshold {
            continue;
        }

        let cx = at(0, i);
        let cy = at(1, i);
        let w = at(2, i);
        let h = at(3, i);
        let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, max_x);
        let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, max_y);
        let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, max_x);
        let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, max_y);
        if x1 >= x2 || y1 >= y2 {
            continue;
        }
        candidates.push(Detection::new(best_score.clamp(0.0, 1.0), [x1, y1, x2, y2]));
    }

    Ok(nms(candidates, params.iou_threshold))
}

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| kept.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

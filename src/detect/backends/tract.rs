#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::classes::ClassNames;
use crate::detect::result::{BoundingBox, Detection, DetectionBatch};
use crate::frame::Frame;

const DEFAULT_INPUT_SIZE: u32 = 640;

/// Tract-based backend for YOLOv8 ONNX detection models.
///
/// The frame is stretched to the square model input, the `[1, 4 + C, N]`
/// output is decoded into boxes, and per-class NMS is applied. The model does
/// not track, so detections carry no track identifier.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    names: ClassNames,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_size(model_path, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            names: ClassNames::coco(),
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and NMS IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    pub fn with_class_names(mut self, names: ClassNames) -> Self {
        self.names = names;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let side = size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + C, N]")?;
        let (_, rows, anchors) = view.dim();
        if rows < 5 {
            return Err(anyhow!("model output has {} rows, expected 4 + classes", rows));
        }

        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score < self.confidence_threshold {
                continue;
            }
            let Some(label) = self.names.name(class_id) else {
                continue;
            };
            let (cx, cy, w, h) = (
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            );
            candidates.push(Detection {
                bbox: BoundingBox::new(
                    ((cx - w / 2.0) * scale_x) as i32,
                    ((cy - h / 2.0) * scale_y) as i32,
                    ((cx + w / 2.0) * scale_x) as i32,
                    ((cy + h / 2.0) * scale_y) as i32,
                ),
                track_id: None,
                class_label: label.to_string(),
                confidence: score,
            });
        }
        Ok(nms(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionBatch::from_detections(self.decode(outputs, frame)?))
    }
}

/// Per-class greedy non-maximum suppression.
fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut by_class: HashMap<String, Vec<Detection>> = HashMap::new();
    for detection in detections {
        by_class
            .entry(detection.class_label.clone())
            .or_default()
            .push(detection);
    }

    let mut kept = Vec::new();
    for (_, mut group) in by_class {
        group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut survivors: Vec<Detection> = Vec::new();
        for candidate in group {
            if survivors
                .iter()
                .all(|s| iou(&s.bbox, &candidate.bbox) <= iou_threshold)
            {
                survivors.push(candidate);
            }
        }
        kept.extend(survivors);
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = a.x2.min(b.x2).saturating_sub(a.x1.max(b.x1)).max(0) as f32;
    let iy = a.y2.min(b.y2).saturating_sub(a.y1.max(b.y1)).max(0) as f32;
    let inter = ix * iy;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(x1: i32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, 0, x1 + 100, 100),
            track_id: None,
            class_label: "person".to_string(),
            confidence,
        }
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_same_class() {
        let kept = nms(vec![person(0, 0.6), person(5, 0.9), person(300, 0.5)], 0.45);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(|d| d.confidence == 0.9));
        assert!(kept.iter().any(|d| d.confidence == 0.5));
    }
}

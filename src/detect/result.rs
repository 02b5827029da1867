use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::classes::{ClassNames, PERSON};

/// Axis-aligned box in pixel coordinates (top-left, bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1).max(0)
    }

    /// Area in square pixels; `f32` so huge boxes cannot overflow.
    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }
}

/// Convert one detector coordinate to pixels. Non-finite values and values
/// outside the `i32` range mean the detector output is unusable.
fn pixel_coord(value: f32) -> Result<i32> {
    if !value.is_finite() || value < i32::MIN as f32 || value >= i32::MAX as f32 {
        return Err(anyhow!("box coordinate {} out of range", value));
    }
    Ok(value as i32)
}

/// One object seen in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Tracker-assigned identifier, stable across frames when present.
    pub track_id: Option<u64>,
    pub class_label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class_label == PERSON
    }
}

/// The usable detection set for a single frame.
///
/// `Empty` covers both "nothing detected" and "detector output unusable for
/// this frame"; the dwell counter treats them the same way.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DetectionBatch {
    Detections(Vec<Detection>),
    #[default]
    Empty,
}

impl DetectionBatch {
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        if detections.is_empty() {
            Self::Empty
        } else {
            Self::Detections(detections)
        }
    }

    pub fn detections(&self) -> &[Detection] {
        match self {
            Self::Detections(detections) => detections,
            Self::Empty => &[],
        }
    }

    /// At least one person anywhere in the frame.
    pub fn person_present(&self) -> bool {
        self.detections().iter().any(Detection::is_person)
    }

    pub fn is_empty(&self) -> bool {
        self.detections().is_empty()
    }
}

/// Parallel-array detector output, as produced by tracking detectors.
///
/// `track_ids` is `None` when the tracker has not assigned identifiers yet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetections {
    /// Boxes as `[x1, y1, x2, y2]` pixel coordinates.
    #[serde(default)]
    pub boxes: Vec<[f32; 4]>,
    #[serde(default)]
    pub track_ids: Option<Vec<u64>>,
    #[serde(default)]
    pub class_ids: Vec<usize>,
    /// Optional; defaults to 1.0 per box when omitted.
    #[serde(default)]
    pub confidences: Vec<f32>,
}

impl RawDetections {
    /// Validate the arrays and assemble a batch.
    ///
    /// A tracking detector that reports boxes without identifiers produced a
    /// partial result; that is an error for this frame.
    pub fn into_batch(self, names: &ClassNames, tracking: bool) -> Result<DetectionBatch> {
        if self.boxes.is_empty() {
            return Ok(DetectionBatch::Empty);
        }
        let count = self.boxes.len();
        if self.class_ids.len() != count {
            return Err(anyhow!(
                "detector reported {} boxes but {} class ids",
                count,
                self.class_ids.len()
            ));
        }
        if !self.confidences.is_empty() && self.confidences.len() != count {
            return Err(anyhow!(
                "detector reported {} boxes but {} confidences",
                count,
                self.confidences.len()
            ));
        }
        match &self.track_ids {
            Some(ids) if ids.len() != count => {
                return Err(anyhow!(
                    "detector reported {} boxes but {} track ids",
                    count,
                    ids.len()
                ));
            }
            None if tracking => {
                return Err(anyhow!("detector reported {} boxes without track ids", count));
            }
            _ => {}
        }

        let mut detections = Vec::with_capacity(count);
        for (i, raw_box) in self.boxes.iter().enumerate() {
            let class_id = self.class_ids[i];
            let class_label = names
                .name(class_id)
                .ok_or_else(|| anyhow!("unknown class index {}", class_id))?;
            detections.push(Detection {
                bbox: BoundingBox::new(
                    pixel_coord(raw_box[0])?,
                    pixel_coord(raw_box[1])?,
                    pixel_coord(raw_box[2])?,
                    pixel_coord(raw_box[3])?,
                ),
                track_id: self.track_ids.as_ref().map(|ids| ids[i]),
                class_label: class_label.to_string(),
                confidence: self.confidences.get(i).copied().unwrap_or(1.0),
            });
        }
        Ok(DetectionBatch::from_detections(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(track_ids: Option<Vec<u64>>, class_ids: Vec<usize>) -> RawDetections {
        RawDetections {
            boxes: vec![[10.0, 20.0, 110.0, 220.0]; class_ids.len().max(1)],
            track_ids,
            class_ids,
            confidences: Vec::new(),
        }
    }

    #[test]
    fn empty_boxes_give_empty_batch() -> Result<()> {
        let batch = RawDetections::default().into_batch(&ClassNames::coco(), true)?;
        assert_eq!(batch, DetectionBatch::Empty);
        assert!(!batch.person_present());
        Ok(())
    }

    #[test]
    fn tracked_person_is_present() -> Result<()> {
        let batch = raw(Some(vec![4]), vec![0]).into_batch(&ClassNames::coco(), true)?;
        assert!(batch.person_present());
        let detection = &batch.detections()[0];
        assert_eq!(detection.track_id, Some(4));
        assert_eq!(detection.class_label, "person");
        assert_eq!(detection.bbox, BoundingBox::new(10, 20, 110, 220));
        Ok(())
    }

    #[test]
    fn missing_track_ids_rejected_when_tracking() {
        let result = raw(None, vec![0]).into_batch(&ClassNames::coco(), true);
        assert!(result.is_err());
    }

    #[test]
    fn missing_track_ids_allowed_without_tracking() -> Result<()> {
        let batch = raw(None, vec![0]).into_batch(&ClassNames::coco(), false)?;
        assert!(batch.person_present());
        assert_eq!(batch.detections()[0].track_id, None);
        Ok(())
    }

    #[test]
    fn mismatched_arrays_rejected() {
        let mut detections = raw(Some(vec![1]), vec![0]);
        detections.class_ids.push(2);
        assert!(detections.into_batch(&ClassNames::coco(), true).is_err());
    }

    #[test]
    fn unknown_class_rejected() {
        let result = raw(Some(vec![1]), vec![500]).into_batch(&ClassNames::coco(), true);
        assert!(result.unwrap_err().to_string().contains("unknown class"));
    }

    #[test]
    fn non_person_classes_do_not_count() -> Result<()> {
        let batch = raw(Some(vec![1]), vec![2]).into_batch(&ClassNames::coco(), true)?;
        assert!(!batch.is_empty());
        assert!(!batch.person_present());
        Ok(())
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        for bad in [3.0e9, -3.0e9, f32::NAN, f32::INFINITY] {
            let mut detections = raw(Some(vec![1]), vec![0]);
            detections.boxes[0][2] = bad;
            assert!(detections.into_batch(&ClassNames::coco(), true).is_err());
        }
    }

    #[test]
    fn extent_saturates_on_extreme_boxes() {
        let bbox = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, 10);
        assert_eq!(bbox.width(), i32::MAX);
        assert_eq!(bbox.height(), i32::MAX);
        assert_eq!(BoundingBox::new(10, 10, 0, 0).area(), 0.0);
    }
}

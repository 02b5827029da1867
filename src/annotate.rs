//! Detection annotation drawn onto every output frame.
//!
//! Boxes are always drawn. Labels need a TrueType font; without one the
//! annotator draws boxes only.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, Detection, DetectionBatch};
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const PERSON_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: i32 = 2;
const PERSON_SCALE: f32 = 48.0;
const OTHER_SCALE: f32 = 24.0;

/// Draws detection boxes and labels.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Boxes only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow!("invalid font file {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every detection of the batch. `counter` is shown on person labels.
    pub fn annotate(&self, frame: &mut Frame, batch: &DetectionBatch, counter: u64) {
        for detection in batch.detections() {
            self.draw_box(frame, detection);
            if let Some(font) = &self.font {
                let (text, color, scale) = label_for(detection, counter);
                let x = detection.bbox.x1.max(0);
                let y = detection.bbox.y1.saturating_sub(scale as i32 + 5).max(0);
                draw_text_mut(
                    frame.image_mut(),
                    color,
                    x,
                    y,
                    PxScale::from(scale),
                    font,
                    &text,
                );
            }
        }
    }

    fn draw_box(&self, frame: &mut Frame, detection: &Detection) {
        // Clamp just outside the frame so off-screen edges stay off-screen.
        let max_x = frame.width() as i32 + BOX_THICKNESS;
        let max_y = frame.height() as i32 + BOX_THICKNESS;
        let bbox = BoundingBox::new(
            detection.bbox.x1.clamp(-BOX_THICKNESS, max_x),
            detection.bbox.y1.clamp(-BOX_THICKNESS, max_y),
            detection.bbox.x2.clamp(-BOX_THICKNESS, max_x),
            detection.bbox.y2.clamp(-BOX_THICKNESS, max_y),
        );
        for offset in 0..BOX_THICKNESS {
            let width = bbox.width() - 2 * offset;
            let height = bbox.height() - 2 * offset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 + offset, bbox.y1 + offset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(frame.image_mut(), rect, BOX_COLOR);
        }
    }
}

/// Label text, colour and pixel scale for one detection.
pub fn label_for(detection: &Detection, counter: u64) -> (String, Rgb<u8>, f32) {
    let id = detection
        .track_id
        .map(|id| format!("#{} ", id))
        .unwrap_or_default();
    if detection.is_person() {
        (
            format!("{}{} ({})", id, detection.class_label, counter),
            PERSON_COLOR,
            PERSON_SCALE,
        )
    } else {
        (
            format!("{}{}", id, detection.class_label),
            OTHER_COLOR,
            OTHER_SCALE,
        )
    }
}

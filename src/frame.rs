//! Frame container shared by ingestion, detection, compositing and output.
//!
//! - `Frame`: owned RGB8 image plus its position in the stream.
//!
//! A frame is produced by a `FrameSource`, annotated and possibly composited
//! in place by the pipeline, then handed to a `FrameSink`. Nothing retains a
//! frame beyond one loop iteration except the alert snapshot, which is
//! written to disk on the firing frame.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// One decoded video frame in packed RGB8 layout.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based position in the stream, assigned by the source.
    pub index: u64,
    image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Build a frame from packed RGB bytes. Length must be exactly `width * height * 3`.
    pub fn from_rgb(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self { index, image })
    }

    /// A uniformly coloured frame.
    pub fn solid(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            index,
            image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

//! Warning overlay compositing.
//!
//! The warning image is loaded once, resized to the active frame size, and
//! shared read-only by every frame that crosses the dwell threshold. Frames
//! are blended as `frame * alpha + overlay * beta` with no offset term,
//! saturating to the 0..=255 range per channel.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::alert::SourceStatus;
use crate::frame::Frame;

/// Weights for the linear blend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendWeights {
    pub alpha: f32,
    pub beta: f32,
}

impl BlendWeights {
    pub const CAMERA: BlendWeights = BlendWeights {
        alpha: 0.8,
        beta: 0.3,
    };
    pub const FILE: BlendWeights = BlendWeights {
        alpha: 0.99,
        beta: 0.3,
    };

    /// Default weights for a source kind. Live feeds keep less of the frame so
    /// the warning dominates.
    pub fn for_status(status: SourceStatus) -> Self {
        match status {
            SourceStatus::Camera => Self::CAMERA,
            SourceStatus::File => Self::FILE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("blend {} must be within 0..=1, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Immutable warning bitmap at frame resolution.
#[derive(Clone, Debug)]
pub struct OverlayImage {
    image: RgbImage,
}

impl OverlayImage {
    /// Load the warning image and resize it to `width` x `height`.
    pub fn load<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to load overlay image {}", path.display()))?
            .to_rgb8();
        Self::from_image(image, width, height)
    }

    pub fn from_image(image: RgbImage, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("overlay target size must be non-zero"));
        }
        let image = if image.dimensions() == (width, height) {
            image
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle)
        };
        Ok(Self { image })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Blend the overlay into the frame in place.
pub fn compose(frame: &mut Frame, overlay: &OverlayImage, weights: BlendWeights) -> Result<()> {
    if frame.dimensions() != overlay.dimensions() {
        return Err(anyhow!(
            "overlay is {}x{} but frame is {}x{}",
            overlay.dimensions().0,
            overlay.dimensions().1,
            frame.width(),
            frame.height()
        ));
    }
    let BlendWeights { alpha, beta } = weights;
    for (dst, src) in frame
        .image_mut()
        .iter_mut()
        .zip(overlay.image().as_raw().iter())
    {
        *dst = blend_channel(*dst, *src, alpha, beta);
    }
    Ok(())
}

fn blend_channel(frame: u8, overlay: u8, alpha: f32, beta: f32) -> u8 {
    let value = frame as f32 * alpha + overlay as f32 * beta;
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(rgb: [u8; 3], width: u32, height: u32) -> OverlayImage {
        OverlayImage::from_image(RgbImage::from_pixel(width, height, image::Rgb(rgb)), width, height)
            .unwrap()
    }

    #[test]
    fn blends_linearly_without_offset() -> Result<()> {
        let mut frame = Frame::solid(0, 4, 4, [100, 200, 0]);
        compose(&mut frame, &overlay([100, 100, 255], 4, 4), BlendWeights::CAMERA)?;
        // 100*0.8 + 100*0.3 = 110; 200*0.8 + 100*0.3 = 190; 0*0.8 + 255*0.3 = 76.5
        assert_eq!(frame.image().get_pixel(2, 2).0, [110, 190, 77]);
        Ok(())
    }

    #[test]
    fn saturates_at_white() -> Result<()> {
        let mut frame = Frame::solid(0, 2, 2, [250, 250, 250]);
        compose(&mut frame, &overlay([255, 255, 255], 2, 2), BlendWeights::FILE)?;
        assert_eq!(frame.image().get_pixel(0, 0).0, [255, 255, 255]);
        Ok(())
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut frame = Frame::solid(0, 4, 4, [0, 0, 0]);
        let result = compose(&mut frame, &overlay([1, 1, 1], 2, 2), BlendWeights::FILE);
        assert!(result.is_err());
        assert_eq!(frame.image().get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn resizes_to_frame_dimensions() -> Result<()> {
        let source = RgbImage::from_pixel(10, 5, image::Rgb([9, 9, 9]));
        let overlay = OverlayImage::from_image(source, 64, 48)?;
        assert_eq!(overlay.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn camera_weights_favour_overlay_more_than_file() {
        let camera = BlendWeights::for_status(SourceStatus::Camera);
        let file = BlendWeights::for_status(SourceStatus::File);
        assert!(camera.alpha < file.alpha);
        assert!(camera.validate().is_ok());
        assert!(BlendWeights { alpha: 1.5, beta: 0.3 }.validate().is_err());
    }
}

//! Frame ingestion sources.
//!
//! Two kinds of input are supported:
//! - Local video files (`FileSource`, real files need feature `ingest-file-ffmpeg`)
//! - Local cameras (`CameraSource`, real devices need feature `ingest-v4l2`)
//!
//! Either one accepts a `stub://` location that produces synthetic frames,
//! which is how tests and demos run without media or hardware.
//!
//! Every source yields `Frame`s at the configured output size. The source
//! also reports the `SourceStatus` the alert backend expects for the run.

mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use anyhow::{Context, Result};

use crate::alert::SourceStatus;
use crate::config::InputSettings;
use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource};
pub use file::{FileConfig, FileSource};

/// A pull-based frame source.
pub trait FrameSource {
    /// Open the underlying file or device.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// How the alert backend should label this run.
    fn status(&self) -> SourceStatus;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// File path or device node.
    pub location: String,
}

/// Build and connect the source selected by `input`.
///
/// A non-empty `video` path selects a file; otherwise the camera index (or
/// explicit device path) is used. Failing to open the source is fatal.
pub fn open_source(input: &InputSettings) -> Result<Box<dyn FrameSource>> {
    let mut source: Box<dyn FrameSource> = match input.video.as_deref() {
        Some(path) if !path.trim().is_empty() => {
            Box::new(FileSource::new(FileConfig {
                path: path.to_string(),
                width: input.width,
                height: input.height,
                target_fps: input.target_fps,
                synthetic_frames: input.synthetic_frames.unwrap_or(file::DEFAULT_SYNTHETIC_FRAMES),
            })?)
        }
        _ => Box::new(CameraSource::new(CameraConfig {
            device: input.camera_device(),
            width: input.width,
            height: input.height,
            target_fps: input.target_fps,
            synthetic_frames: input.synthetic_frames,
        })?),
    };
    let location = source.stats().location;
    source
        .connect()
        .with_context(|| format!("failed to open video source {}", location))?;
    Ok(source)
}

/// Moving gradient used by synthetic sources.
pub(crate) fn synthetic_frame(index: u64, width: u32, height: u32) -> Frame {
    let shift = (index % 256) as u32;
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            ((x + shift) % 256) as u8,
            ((y + shift) % 256) as u8,
            ((x + y) % 256) as u8,
        ])
    });
    Frame::new(index, image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_input(video: Option<&str>) -> InputSettings {
        InputSettings {
            video: video.map(str::to_string),
            camera_index: 0,
            camera_device: Some("stub://camera".to_string()),
            width: 32,
            height: 24,
            target_fps: 30,
            synthetic_frames: Some(3),
        }
    }

    #[test]
    fn video_path_selects_file_source() -> Result<()> {
        let mut source = open_source(&stub_input(Some("stub://clip.mp4")))?;
        assert_eq!(source.status(), SourceStatus::File);
        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.dimensions(), (32, 24));
        Ok(())
    }

    #[test]
    fn empty_video_path_selects_camera() -> Result<()> {
        let source = open_source(&stub_input(Some("  ")))?;
        assert_eq!(source.status(), SourceStatus::Camera);
        assert_eq!(source.stats().location, "stub://camera");
        Ok(())
    }

    #[test]
    fn synthetic_frames_move() {
        let a = synthetic_frame(0, 4, 4);
        let b = synthetic_frame(1, 4, 4);
        assert_ne!(a.image().as_raw(), b.image().as_raw());
    }
}

//! Output of annotated frames.
//!
//! - `MjpegFileSink`: every frame is JPEG-encoded and appended to one
//!   Motion-JPEG stream file. Players such as ffplay and VLC read it as-is.
//! - `NullSink`: discards frames (headless runs, tests).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;

use crate::alert::TIMESTAMP_FORMAT;
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Destination for processed frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Called once after the last frame.
    fn finish(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

/// `<timestamp>_tracking.mjpeg`
pub fn output_file_name(at: &DateTime<Local>) -> String {
    format!("{}_tracking.mjpeg", at.format(TIMESTAMP_FORMAT))
}

pub struct MjpegFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    quality: u8,
    frames_written: u64,
}

impl MjpegFileSink {
    /// Create the output file (and its directory). Fails if either cannot be created.
    pub fn create<P: Into<PathBuf>>(path: P, quality: u8) -> Result<Self> {
        let path = path.into();
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be in 1..=100, got {}", quality));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory {}", parent.display())
                })?;
            }
        }
        let file = File::create(&path)
            .with_context(|| format!("failed to create output video {}", path.display()))?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            quality,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for MjpegFileSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("output video {} already finished", self.path.display()))?;
        JpegEncoder::new_with_quality(writer, self.quality)
            .encode_image(frame.image())
            .with_context(|| format!("failed to encode frame {}", frame.index))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("failed to flush output video {}", self.path.display()))?;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl FrameSink for NullSink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn writes_concatenated_jpegs() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("outputs/run.mjpeg");
        let mut sink = MjpegFileSink::create(&path, DEFAULT_JPEG_QUALITY)?;
        sink.write_frame(&Frame::solid(0, 16, 16, [200, 0, 0]))?;
        sink.write_frame(&Frame::solid(1, 16, 16, [0, 200, 0]))?;
        sink.finish()?;
        assert_eq!(sink.frames_written(), 2);

        let bytes = std::fs::read(&path)?;
        let starts = bytes.windows(2).filter(|w| *w == [0xFF, 0xD8]).count();
        assert!(starts >= 2);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(sink.write_frame(&Frame::solid(2, 16, 16, [0, 0, 0])).is_err());
        Ok(())
    }

    #[test]
    fn unwritable_path_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x")?;
        assert!(MjpegFileSink::create(blocker.join("out.mjpeg"), 80).is_err());
        Ok(())
    }

    #[test]
    fn output_name_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(output_file_name(&at), "20240102_03h04m05s_tracking.mjpeg");
    }
}

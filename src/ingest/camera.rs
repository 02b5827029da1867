//! Camera frame source.
//!
//! `CameraSource` reads from a local capture device (e.g. `/dev/video0`).
//! Real devices go through V4L2 and need the `ingest-v4l2` feature; a
//! `stub://` device produces synthetic frames, unbounded unless a frame
//! count is configured.

use anyhow::{anyhow, Result};

use super::{synthetic_frame, FrameSource, SourceStats};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Camera;
use crate::alert::SourceStatus;
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0").
    pub device: String,
    /// Requested frame width; frames are scaled to it if the driver differs.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Requested frame rate (frames per second).
    pub target_fps: u32,
    /// Stop a `stub://` camera after this many frames.
    pub synthetic_frames: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            target_fps: 30,
            synthetic_frames: None,
        }
    }
}

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Camera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(V4l2Camera::new(config)),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                Err(anyhow!(
                    "camera capture of {} requires the ingest-v4l2 feature",
                    config.device
                ))
            }
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn status(&self) -> SourceStatus {
        SourceStatus::Camera
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.synthetic_frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let frame = synthetic_frame(self.frame_count, self.config.width, self.config.height);
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.config.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
            target_fps: 10,
            synthetic_frames: None,
        }
    }

    #[test]
    fn camera_source_produces_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.dimensions(), (64, 48));
        assert_eq!(source.status(), SourceStatus::Camera);
        Ok(())
    }

    #[test]
    fn unbounded_stub_keeps_going() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;
        for expected in 0..500 {
            assert_eq!(source.next_frame()?.map(|f| f.index), Some(expected));
        }
        Ok(())
    }

    #[test]
    fn bounded_stub_ends() -> Result<()> {
        let mut config = stub_config();
        config.synthetic_frames = Some(1);
        let mut source = CameraSource::new(config)?;
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn zero_size_rejected() {
        let mut config = stub_config();
        config.width = 0;
        assert!(CameraSource::new(config).is_err());
    }
}

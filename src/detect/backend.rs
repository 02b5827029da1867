use anyhow::Result;

use crate::detect::result::DetectionBatch;
use crate::frame::Frame;

/// Detection capabilities a backend can declare.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    ObjectDetection,
    /// Backend assigns track identifiers that persist across frames.
    Tracking,
}

/// Detector backend trait.
///
/// The detector is an opaque collaborator: it sees one frame and reports what
/// it found. An `Err` means the output for that frame was unusable; the
/// pipeline treats that frame as carrying no detections and moves on.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

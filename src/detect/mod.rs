//! Detector collaborator boundary.
//!
//! Backends turn one frame into a `DetectionBatch`. Only the presence of the
//! monitored class matters to the dwell counter; boxes, labels and track ids
//! are kept for annotation.

mod backend;
mod backends;
mod classes;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use classes::{ClassNames, PERSON};
pub use result::{BoundingBox, Detection, DetectionBatch, RawDetections};

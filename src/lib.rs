//! Dwell Watch
//!
//! Watches a video stream for a person who stays in view too long, flags the
//! video when that happens, and reports a single alert per run to a backend
//! service.
//!
//! # Architecture
//!
//! Per frame, strictly in order:
//!
//! ```text
//! FrameSource -> DetectorBackend -> DwellTracker -> AlertGate
//!             -> Annotator -> compose (if over threshold) -> FrameSink
//! ```
//!
//! When the gate fires, the frame is saved as a snapshot and an `AlertEvent`
//! is queued for the `AlertDispatcher` worker, which performs the two-step
//! backend submission and appends the confirmation to the audit log.
//!
//! The run holds two invariants:
//!
//! 1. **Fresh presence per frame**: the counter is derived from the current
//!    frame's batch only; a failed detection counts as an empty frame.
//! 2. **One alert per run**: the latch moves `Armed -> Fired` once and never
//!    back, however often the counter re-crosses the threshold.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frame
//! - `ingest`: file and camera sources
//! - `detect`: detector boundary, detection types, backends
//! - `dwell`: counter, latch and gate
//! - `overlay`, `annotate`: frame drawing
//! - `alert`: snapshot, backend client, audit log, dispatcher
//! - `sink`: frame output
//! - `pipeline`: per-frame orchestration
//! - `config`: layered configuration

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod dwell;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod sink;
pub mod ui;

pub use alert::{
    AlertBackend, AlertConfirmation, AlertDispatcher, AlertEvent, AuditLog, DispatchStats,
    HttpAlertBackend, SnapshotStore, SourceStatus,
};
pub use annotate::Annotator;
pub use config::PipelineConfig;
pub use detect::{
    BoundingBox, ClassNames, Detection, DetectionBatch, DetectorBackend, RawDetections,
    ScriptedBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use dwell::{AlertGate, AlertLatch, DwellState, DwellTracker, GateDecision};
pub use frame::Frame;
pub use ingest::{open_source, CameraConfig, CameraSource, FileConfig, FileSource, FrameSource};
pub use overlay::{compose, BlendWeights, OverlayImage};
pub use pipeline::{DwellPipeline, FrameReport, RunSummary};
pub use sink::{FrameSink, MjpegFileSink, NullSink};

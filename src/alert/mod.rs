//! Alert reporting.
//!
//! When the gate fires, the frame loop saves the composited frame as a
//! snapshot and hands an `AlertEvent` to the `AlertDispatcher`. The
//! dispatcher's worker owns all network I/O and audit-log writes:
//!
//! 1. `POST {backend}/picture` with the snapshot's public URL -> picture id.
//! 2. `POST {backend}/alert` with the picture id and source status -> confirmation.
//! 3. The confirmation is appended as one line to the audit log.
//!
//! Delivery is best-effort. A failure at any step is logged and the event is
//! dropped; there are no retries and the frame loop is never affected.
//!
//! The snapshot reaches the backend by shared convention: it is written to a
//! directory the backend's static file server also serves, and only its URL
//! travels over HTTP.

mod audit;
mod backend;
mod dispatcher;
mod snapshot;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub use audit::AuditLog;
pub use backend::{AlertBackend, AlertConfirmation, HttpAlertBackend};
pub use dispatcher::{dispatch_once, AlertDispatcher, DispatchOutcome, DispatchStats};
pub use snapshot::{snapshot_file_name, SnapshotStore, TIMESTAMP_FORMAT};

/// Kind of source the run is watching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceStatus {
    #[serde(rename = "CAMERA")]
    Camera,
    #[serde(rename = "FILE", alias = "MP4")]
    File,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Camera => "CAMERA",
            SourceStatus::File => "FILE",
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fired alert, created once per run and consumed by the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEvent {
    /// Externally reachable location of the alert snapshot.
    pub picture_reference: String,
    pub status: SourceStatus,
    pub fired_at: DateTime<Local>,
}

impl AlertEvent {
    pub fn new(
        picture_reference: impl Into<String>,
        status: SourceStatus,
        fired_at: DateTime<Local>,
    ) -> Self {
        Self {
            picture_reference: picture_reference.into(),
            status,
            fired_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&SourceStatus::Camera).unwrap(), "\"CAMERA\"");
        assert_eq!(serde_json::to_string(&SourceStatus::File).unwrap(), "\"FILE\"");
        let legacy: SourceStatus = serde_json::from_str("\"MP4\"").unwrap();
        assert_eq!(legacy, SourceStatus::File);
    }
}

//! Per-frame orchestration.
//!
//! Each iteration is fully sequential:
//! 1. pull a frame from the `FrameSource`
//! 2. run the detector (an error counts as an empty frame)
//! 3. update the dwell counter and evaluate the alert gate
//! 4. draw detection boxes and labels
//! 5. blend the warning overlay while the counter is at or above threshold
//! 6. on the firing frame, save the snapshot and enqueue the alert
//! 7. write the frame to the `FrameSink`
//!
//! The only work that leaves this thread is the alert dispatch, handed to
//! the `AlertDispatcher` worker through a bounded queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;

use crate::alert::{
    snapshot_file_name, AlertDispatcher, AlertEvent, DispatchStats, SnapshotStore, SourceStatus,
};
use crate::annotate::Annotator;
use crate::detect::{DetectionBatch, DetectorBackend};
use crate::dwell::{AlertGate, DwellTracker};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::overlay::{compose, BlendWeights, OverlayImage};
use crate::sink::FrameSink;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What happened to one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub index: u64,
    pub counter: u64,
    pub overlay_active: bool,
    /// This frame fired the alert.
    pub alert_fired: bool,
    /// The detector failed on this frame and it was treated as empty.
    pub detection_error: bool,
}

/// Totals for a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub overlay_frames: u64,
    pub detection_errors: u64,
    pub sink_errors: u64,
    /// Index of the frame that fired the alert, if any.
    pub alert_frame: Option<u64>,
    /// Run ended on the stop signal rather than end of stream.
    pub stopped: bool,
}

pub struct DwellPipeline {
    tracker: DwellTracker,
    gate: AlertGate,
    status: SourceStatus,
    weights: BlendWeights,
    overlay: Option<OverlayImage>,
    annotator: Annotator,
    snapshots: SnapshotStore,
    dispatcher: Option<AlertDispatcher>,
    summary: RunSummary,
}

impl DwellPipeline {
    pub fn new(threshold: u64, status: SourceStatus, snapshots: SnapshotStore) -> Self {
        Self {
            tracker: DwellTracker::new(),
            gate: AlertGate::new(threshold),
            status,
            weights: BlendWeights::for_status(status),
            overlay: None,
            annotator: Annotator::new(),
            snapshots,
            dispatcher: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: OverlayImage, weights: BlendWeights) -> Self {
        self.overlay = Some(overlay);
        self.weights = weights;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn tracker(&self) -> &DwellTracker {
        &self.tracker
    }

    /// Fold one frame's detector output into the run and modify the frame
    /// in place (annotation, overlay).
    pub fn process_frame(
        &mut self,
        frame: &mut Frame,
        detections: Result<DetectionBatch>,
    ) -> FrameReport {
        let (batch, detection_error) = match detections {
            Ok(batch) => (batch, false),
            Err(e) => {
                log::warn!(
                    "frame {}: detection failed, treating as empty: {:#}",
                    frame.index,
                    e
                );
                (DetectionBatch::Empty, true)
            }
        };

        let state = self.tracker.update(&batch);
        let decision = self.gate.check(&mut self.tracker);

        self.annotator.annotate(frame, &batch, state.counter());

        if decision.overlay_active {
            if let Some(overlay) = &self.overlay {
                if let Err(e) = compose(frame, overlay, self.weights) {
                    log::warn!("frame {}: overlay skipped: {:#}", frame.index, e);
                }
            }
            self.summary.overlay_frames += 1;
        }

        if decision.should_dispatch {
            self.fire_alert(frame, state.counter());
        }

        self.summary.frames += 1;
        if detection_error {
            self.summary.detection_errors += 1;
        }

        FrameReport {
            index: frame.index,
            counter: state.counter(),
            overlay_active: decision.overlay_active,
            alert_fired: decision.should_dispatch,
            detection_error,
        }
    }

    fn fire_alert(&mut self, frame: &Frame, counter: u64) {
        self.summary.alert_frame = Some(frame.index);
        log::warn!(
            "ALERT: person present for {} consecutive frames (threshold {}), frame {}",
            counter,
            self.gate.threshold(),
            frame.index
        );

        let fired_at = Local::now();
        let file_name = snapshot_file_name(&fired_at);
        match self.snapshots.save(frame, &file_name) {
            Ok(path) => log::info!("alert snapshot saved to {}", path.display()),
            Err(e) => log::error!("alert snapshot not saved: {:#}", e),
        }

        let event = AlertEvent::new(
            self.snapshots.public_url(&file_name),
            self.status,
            fired_at,
        );
        match &self.dispatcher {
            Some(dispatcher) => {
                dispatcher.dispatch(event);
            }
            None => log::info!(
                "alert not reported (no dispatcher): {}",
                event.picture_reference
            ),
        }
    }

    /// Run until the source is exhausted or `stop` is set.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn DetectorBackend,
        sink: &mut dyn FrameSink,
        stop: &AtomicBool,
    ) -> Result<RunSummary> {
        let mut last_health_log = Instant::now();
        log::info!(
            "pipeline running: status={} threshold={} detector={}",
            self.status,
            self.gate.threshold(),
            detector.name()
        );

        loop {
            if stop.load(Ordering::SeqCst) {
                log::warn!("STOP PLAY");
                self.summary.stopped = true;
                break;
            }

            let mut frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("end of stream after {} frames", self.summary.frames);
                    break;
                }
                Err(e) => {
                    log::error!("frame acquisition failed, ending run: {:#}", e);
                    break;
                }
            };

            let detections = detector.detect(&frame);
            self.process_frame(&mut frame, detections);

            if let Err(e) = sink.write_frame(&frame) {
                self.summary.sink_errors += 1;
                log::warn!("frame {}: output write failed: {:#}", frame.index, e);
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = source.stats();
                log::info!(
                    "source health={} frames={} location={} counter={}",
                    source.is_healthy(),
                    stats.frames_captured,
                    stats.location,
                    self.tracker.state().counter()
                );
                last_health_log = Instant::now();
            }
        }

        if let Err(e) = sink.finish() {
            log::error!("failed to finalize output: {:#}", e);
        }
        Ok(self.summary.clone())
    }

    /// Drain the dispatcher, waiting at most `grace` for an in-flight alert.
    pub fn shutdown(&mut self, grace: Duration) -> Option<DispatchStats> {
        self.dispatcher.take().map(|dispatcher| dispatcher.shutdown(grace))
    }
}

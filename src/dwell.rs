//! Continuous-presence counting and the one-shot alert latch.
//!
//! - `DwellTracker` folds each frame's detections into a counter of
//!   consecutive frames with a person in view.
//! - `AlertLatch` is a two-state machine with a single legal transition,
//!   `Armed -> Fired`. There is no way back to `Armed` within a run.
//! - `AlertGate` compares the counter to the threshold and fires the latch on
//!   the first qualifying frame.
//!
//! `DwellState` is owned by the frame loop and mutated once per frame.

use crate::detect::DetectionBatch;

/// One-shot alert latch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlertLatch {
    #[default]
    Armed,
    Fired,
}

impl AlertLatch {
    /// Transition `Armed -> Fired`. Returns true only for the call that fired.
    fn fire(&mut self) -> bool {
        match self {
            AlertLatch::Armed => {
                *self = AlertLatch::Fired;
                true
            }
            AlertLatch::Fired => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(self, AlertLatch::Fired)
    }
}

/// Snapshot of the per-run dwell state.
///
/// Only `DwellTracker` and `AlertGate` mutate the live state; callers get
/// copies, so the latch can only move forward.
///
/// The fields cannot be written from outside the crate:
///
/// ```compile_fail
/// use dwell_watch::{AlertLatch, DwellState};
///
/// let mut state = DwellState::default();
/// state.latch = AlertLatch::Armed;
/// ```
///
/// ```compile_fail
/// use dwell_watch::DwellState;
///
/// let state = DwellState { counter: 0, latch: Default::default() };
/// ```
///
/// Nor can the latch be fired by hand:
///
/// ```compile_fail
/// use dwell_watch::AlertLatch;
///
/// let mut latch = AlertLatch::Armed;
/// latch.fire();
/// ```
///
/// The tracker only hands out copies:
///
/// ```
/// use dwell_watch::{AlertGate, DetectionBatch, DwellTracker};
///
/// let mut tracker = DwellTracker::new();
/// let gate = AlertGate::new(1);
/// tracker.update(&DetectionBatch::Empty);
/// assert!(!gate.check(&mut tracker).should_dispatch);
/// assert!(!tracker.state().alert_fired());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DwellState {
    counter: u64,
    latch: AlertLatch,
}

impl DwellState {
    /// Consecutive frames with a person present, ending at the current frame.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn alert_fired(&self) -> bool {
        self.latch.is_fired()
    }
}

/// Folds per-frame detection batches into the dwell counter.
///
/// Presence is "at least one person anywhere in the frame"; track identity is
/// not consulted, so several people do not multiply the count and a hand-off
/// between people does not reset it.
#[derive(Debug, Default)]
pub struct DwellTracker {
    state: DwellState,
}

impl DwellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from this frame's batch. Presence is computed fresh per call;
    /// nothing from the previous frame's batch carries over.
    pub fn update(&mut self, batch: &DetectionBatch) -> DwellState {
        let person_present = batch.person_present();
        self.state.counter = if person_present {
            self.state.counter.saturating_add(1)
        } else {
            0
        };
        self.state
    }

    pub fn state(&self) -> DwellState {
        self.state
    }
}

/// Result of evaluating the gate on one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateDecision {
    /// Counter is at or above threshold on this frame.
    pub overlay_active: bool,
    /// This frame fired the latch. True at most once per run.
    pub should_dispatch: bool,
}

/// Threshold check plus latch transition.
#[derive(Clone, Copy, Debug)]
pub struct AlertGate {
    threshold: u64,
}

impl AlertGate {
    /// `threshold` is a frame count; zero is treated as one.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Evaluate the tracker's current state, firing its latch on the first
    /// frame at or above threshold.
    pub fn check(&self, tracker: &mut DwellTracker) -> GateDecision {
        let state = &mut tracker.state;
        let overlay_active = state.counter >= self.threshold;
        let should_dispatch = overlay_active && state.latch.fire();
        GateDecision {
            overlay_active,
            should_dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn detection(label: &str, track_id: Option<u64>) -> Detection {
        Detection {
            bbox: BoundingBox::new(0, 0, 10, 10),
            track_id,
            class_label: label.to_string(),
            confidence: 0.9,
        }
    }

    fn batch(present: bool) -> DetectionBatch {
        if present {
            DetectionBatch::Detections(vec![detection("person", Some(1))])
        } else {
            DetectionBatch::Empty
        }
    }

    fn run(presence: &[bool], threshold: u64) -> Vec<(u64, GateDecision)> {
        let mut tracker = DwellTracker::new();
        let gate = AlertGate::new(threshold);
        presence
            .iter()
            .map(|&present| {
                tracker.update(&batch(present));
                let decision = gate.check(&mut tracker);
                (tracker.state().counter(), decision)
            })
            .collect()
    }

    #[test]
    fn counter_tracks_current_run_length() {
        let presence = [true, true, false, true, false, false, true, true, true];
        let counters: Vec<u64> = run(&presence, 100).into_iter().map(|(c, _)| c).collect();
        assert_eq!(counters, vec![1, 2, 0, 1, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn threshold_three_scenario() {
        let t = true;
        let f = false;
        let results = run(&[t, t, t, f, t, t, t, t], 3);

        let counters: Vec<u64> = results.iter().map(|(c, _)| *c).collect();
        assert_eq!(counters, vec![1, 2, 3, 0, 1, 2, 3, 4]);

        let dispatch: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| d.should_dispatch)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(dispatch, vec![2]);

        let overlay: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| d.overlay_active)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(overlay, vec![2, 6, 7]);
    }

    #[test]
    fn latch_never_rearms_after_reset() {
        let mut tracker = DwellTracker::new();
        let gate = AlertGate::new(1);

        tracker.update(&batch(true));
        assert!(gate.check(&mut tracker).should_dispatch);
        tracker.update(&batch(false));
        assert!(!gate.check(&mut tracker).overlay_active);
        tracker.update(&batch(true));
        let decision = gate.check(&mut tracker);
        assert!(decision.overlay_active);
        assert!(!decision.should_dispatch);
        assert!(tracker.state().alert_fired());
    }

    #[test]
    fn multiple_people_count_once_per_frame() {
        let mut tracker = DwellTracker::new();
        let crowd = DetectionBatch::Detections(vec![
            detection("person", Some(1)),
            detection("person", Some(2)),
            detection("dog", Some(3)),
        ]);
        tracker.update(&crowd);
        assert_eq!(tracker.update(&crowd).counter(), 2);
    }

    #[test]
    fn handoff_between_people_keeps_counting() {
        let mut tracker = DwellTracker::new();
        tracker.update(&DetectionBatch::Detections(vec![detection("person", Some(1))]));
        let state = tracker.update(&DetectionBatch::Detections(vec![detection(
            "person",
            Some(2),
        )]));
        assert_eq!(state.counter(), 2);
    }

    #[test]
    fn non_person_detections_reset_counter() {
        let mut tracker = DwellTracker::new();
        tracker.update(&batch(true));
        let state = tracker.update(&DetectionBatch::Detections(vec![detection("car", None)]));
        assert_eq!(state.counter(), 0);
    }

    #[test]
    fn fresh_tracker_replays_identically() {
        let presence = [true, false, true, true, true, false, true];
        assert_eq!(run(&presence, 2), run(&presence, 2));
    }

    #[test]
    fn zero_threshold_behaves_as_one() {
        let gate = AlertGate::new(0);
        assert_eq!(gate.threshold(), 1);
        let mut tracker = DwellTracker::new();
        assert!(!gate.check(&mut tracker).overlay_active);
    }

    #[test]
    fn latch_fires_once() {
        let mut latch = AlertLatch::default();
        assert!(latch.fire());
        assert!(!latch.fire());
        assert_eq!(latch, AlertLatch::Fired);
    }
}

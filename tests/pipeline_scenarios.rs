use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tempfile::tempdir;

use dwell_watch::config::InputSettings;
use dwell_watch::{
    open_source, AlertBackend, AlertConfirmation, AlertDispatcher, AuditLog, BlendWeights,
    DwellPipeline, FrameSink, MjpegFileSink, NullSink, OverlayImage, ScriptedBackend,
    SnapshotStore, SourceStatus,
};

const PERSON: &str =
    r#"{"boxes":[[4,4,20,20]],"track_ids":[7],"class_ids":[0],"confidences":[0.88]}"#;
const NOBODY: &str = "";
const PERSON_WITHOUT_ID: &str = r#"{"boxes":[[4,4,20,20]],"class_ids":[0]}"#;

#[derive(Default)]
struct Recorded {
    pictures: Vec<String>,
    alerts: Vec<(i64, SourceStatus)>,
}

struct RecordingBackend {
    recorded: Arc<Mutex<Recorded>>,
    fail_picture: bool,
}

impl AlertBackend for RecordingBackend {
    fn submit_picture(&mut self, picture: &str) -> Result<i64> {
        self.recorded.lock().unwrap().pictures.push(picture.to_string());
        if self.fail_picture {
            return Err(anyhow!("backend unreachable"));
        }
        Ok(11)
    }

    fn submit_alert(&mut self, picture_id: i64, status: SourceStatus) -> Result<AlertConfirmation> {
        self.recorded
            .lock()
            .unwrap()
            .alerts
            .push((picture_id, status));
        Ok(AlertConfirmation {
            picture: format!("picture-{}", picture_id),
        })
    }
}

fn stub_input(frames: u64) -> InputSettings {
    InputSettings {
        video: Some("stub://hallway.mp4".to_string()),
        camera_index: 0,
        camera_device: None,
        width: 32,
        height: 32,
        target_fps: 30,
        synthetic_frames: Some(frames),
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    audit: AuditLog,
    recorded: Arc<Mutex<Recorded>>,
    snapshot_dir: std::path::PathBuf,
    pipeline: DwellPipeline,
}

fn harness(threshold: u64, fail_picture: bool) -> Result<Harness> {
    let dir = tempdir()?;
    let audit = AuditLog::open(dir.path().join("alerts/alert.txt"))?;
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let backend = RecordingBackend {
        recorded: recorded.clone(),
        fail_picture,
    };
    let dispatcher = AlertDispatcher::spawn(Box::new(backend), audit.clone(), 4)?;
    let snapshot_dir = dir.path().join("images");
    let snapshots = SnapshotStore::new(&snapshot_dir, "http://static.test/");
    let overlay = OverlayImage::from_image(
        image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 0])),
        32,
        32,
    )?;
    let pipeline = DwellPipeline::new(threshold, SourceStatus::File, snapshots)
        .with_overlay(overlay, BlendWeights::FILE)
        .with_dispatcher(dispatcher);
    Ok(Harness {
        _dir: dir,
        audit,
        recorded,
        snapshot_dir,
        pipeline,
    })
}

#[test]
fn threshold_crossing_reports_exactly_one_alert() -> Result<()> {
    let mut h = harness(3, false)?;
    let script = [PERSON, PERSON, PERSON, NOBODY, PERSON, PERSON, PERSON, PERSON];
    let mut source = open_source(&stub_input(script.len() as u64))?;
    let mut detector = ScriptedBackend::from_lines(script);
    let mut sink = NullSink::default();
    let stop = AtomicBool::new(false);

    let summary = h
        .pipeline
        .run(source.as_mut(), &mut detector, &mut sink, &stop)?;
    let stats = h.pipeline.shutdown(Duration::from_secs(5)).expect("dispatcher");

    assert_eq!(summary.frames, 8);
    assert_eq!(summary.alert_frame, Some(2));
    assert_eq!(summary.overlay_frames, 3);
    assert!(!summary.stopped);
    assert_eq!(sink.frames_written(), 8);

    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.recorded, 1);

    let recorded = h.recorded.lock().unwrap();
    assert_eq!(recorded.pictures.len(), 1);
    assert!(recorded.pictures[0].starts_with("http://static.test/"));
    assert!(recorded.pictures[0].ends_with("_person_alert.png"));
    assert_eq!(recorded.alerts, vec![(11, SourceStatus::File)]);
    assert_eq!(h.audit.records()?, vec!["picture-11"]);

    let snapshot_name = recorded.pictures[0].trim_start_matches("http://static.test/");
    assert!(h.snapshot_dir.join(snapshot_name).exists());
    Ok(())
}

#[test]
fn malformed_frame_resets_counter_for_that_frame_only() -> Result<()> {
    let mut h = harness(3, false)?;
    let script = [PERSON, PERSON, PERSON_WITHOUT_ID, PERSON, PERSON];
    let mut source = open_source(&stub_input(script.len() as u64))?;
    let mut detector = ScriptedBackend::from_lines(script);
    let stop = AtomicBool::new(false);

    let summary = h
        .pipeline
        .run(source.as_mut(), &mut detector, &mut NullSink::default(), &stop)?;
    h.pipeline.shutdown(Duration::from_secs(5));

    assert_eq!(summary.detection_errors, 1);
    assert_eq!(summary.alert_frame, None);
    assert_eq!(h.pipeline.tracker().state().counter(), 2);
    assert!(h.recorded.lock().unwrap().pictures.is_empty());
    Ok(())
}

#[test]
fn picture_failure_leaves_no_audit_entry() -> Result<()> {
    let mut h = harness(1, true)?;
    let mut source = open_source(&stub_input(3))?;
    let mut detector = ScriptedBackend::from_lines([PERSON, PERSON, PERSON]);
    let stop = AtomicBool::new(false);

    let summary = h
        .pipeline
        .run(source.as_mut(), &mut detector, &mut NullSink::default(), &stop)?;
    let stats = h.pipeline.shutdown(Duration::from_secs(5)).expect("dispatcher");

    assert_eq!(summary.alert_frame, Some(0));
    assert_eq!(stats.failed, 1);
    let recorded = h.recorded.lock().unwrap();
    assert_eq!(recorded.pictures.len(), 1);
    assert!(recorded.alerts.is_empty());
    assert!(h.audit.records()?.is_empty());
    Ok(())
}

#[test]
fn stop_signal_ends_run_before_next_frame() -> Result<()> {
    let mut h = harness(3, false)?;
    let mut source = open_source(&stub_input(100))?;
    let mut detector = ScriptedBackend::from_lines([PERSON]);
    let stop = AtomicBool::new(true);

    let summary = h
        .pipeline
        .run(source.as_mut(), &mut detector, &mut NullSink::default(), &stop)?;
    h.pipeline.shutdown(Duration::from_secs(5));

    assert!(summary.stopped);
    assert_eq!(summary.frames, 0);
    Ok(())
}

#[test]
fn annotated_frames_reach_the_output_video() -> Result<()> {
    let mut h = harness(2, false)?;
    let out_dir = tempdir()?;
    let path = out_dir.path().join("outputs/run_tracking.mjpeg");
    let mut sink = MjpegFileSink::create(&path, 80)?;
    let mut source = open_source(&stub_input(4))?;
    let mut detector = ScriptedBackend::from_lines([PERSON, PERSON, NOBODY, PERSON]);
    let stop = AtomicBool::new(false);

    h.pipeline
        .run(source.as_mut(), &mut detector, &mut sink, &stop)?;
    h.pipeline.shutdown(Duration::from_secs(5));

    assert_eq!(sink.frames_written(), 4);
    assert!(std::fs::metadata(&path)?.len() > 0);
    Ok(())
}

#[test]
fn out_of_range_box_counts_as_detection_error() -> Result<()> {
    let mut h = harness(2, false)?;
    let huge = r#"{"boxes":[[-3000000000,0,3000000000,10]],"track_ids":[1],"class_ids":[0]}"#;
    let mut source = open_source(&stub_input(3))?;
    let mut detector = ScriptedBackend::from_lines([huge, huge, PERSON]);
    let stop = AtomicBool::new(false);

    let summary = h
        .pipeline
        .run(source.as_mut(), &mut detector, &mut NullSink::default(), &stop)?;
    h.pipeline.shutdown(Duration::from_secs(5));

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.detection_errors, 2);
    assert_eq!(summary.alert_frame, None);
    assert_eq!(h.pipeline.tracker().state().counter(), 1);
    Ok(())
}

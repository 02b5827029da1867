//! dwell_watch - person dwell detection with one-shot alerting
//!
//! This binary:
//! 1. Loads configuration (JSON file, `DWELL_*` env, command-line flags)
//! 2. Opens the camera or video file and the output video
//! 3. Runs detection on every frame and tracks continuous person presence
//! 4. Flags frames past the dwell threshold with the warning overlay
//! 5. Reports the first threshold crossing of the run to the backend

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dwell_watch::config::{DetectorKind, DetectorSettings};
use dwell_watch::ui::{Ui, UiMode};
use dwell_watch::{
    open_source, AlertDispatcher, Annotator, AuditLog, DetectorBackend, DwellPipeline,
    FrameSink, HttpAlertBackend, MjpegFileSink, NullSink, OverlayImage, PipelineConfig,
    ScriptedBackend, SnapshotStore,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch a camera or video for lingering people and report one alert per run"
)]
struct Args {
    /// Recorded video to process. Without it the camera is used.
    #[arg(long)]
    video: Option<String>,

    /// Camera index (opens /dev/video<INDEX>).
    #[arg(long)]
    camera_index: Option<u32>,

    /// Explicit camera device path.
    #[arg(long)]
    camera_device: Option<String>,

    /// Output frame width.
    #[arg(long)]
    width: Option<u32>,

    /// Output frame height.
    #[arg(long)]
    height: Option<u32>,

    /// Consecutive person frames before the alert fires.
    #[arg(long = "thr")]
    threshold: Option<u64>,

    /// Backend base URL.
    #[arg(long = "url")]
    backend_url: Option<String>,

    /// Base URL the static file server exposes snapshots under.
    #[arg(long)]
    static_url: Option<String>,

    /// Warning overlay image.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Output video path (default: timestamped file in the output directory).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not write an output video.
    #[arg(long)]
    no_output: bool,

    /// Detector backend (scripted or tract).
    #[arg(long)]
    detector: Option<String>,

    /// Detection script (scripted) or ONNX model (tract).
    #[arg(long)]
    detector_path: Option<PathBuf>,

    /// TrueType font for detection labels.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Frame count for stub:// sources.
    #[arg(long)]
    synthetic_frames: Option<u64>,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "DWELL_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Seconds to wait for an in-flight alert at shutdown.
    #[arg(long, default_value_t = 15)]
    shutdown_grace_secs: u64,

    /// Stage reporting style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_ref())?;
    let ui = Ui::detect(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = PipelineConfig::load()?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };
    log_config(&cfg);

    let mut source = {
        let _stage = ui.stage("Open video source");
        open_source(&cfg.input)?
    };
    let status = source.status();
    let weights = cfg.overlay.weights_for(status);

    let overlay = {
        let _stage = ui.stage("Load warning overlay");
        OverlayImage::load(&cfg.overlay.image, cfg.input.width, cfg.input.height)?
    };

    let mut detector = {
        let _stage = ui.stage("Load detector");
        let mut detector = build_detector(&cfg.detector)?;
        detector.warm_up()?;
        detector
    };

    let annotator = match &cfg.annotation.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => Annotator::new(),
    };
    if !annotator.has_font() {
        log::info!("no label font configured; drawing boxes only");
    }

    let mut sink: Box<dyn FrameSink> = if cfg.output.enabled {
        let path = cfg.output.path_at(&Local::now());
        let sink = MjpegFileSink::create(&path, cfg.output.jpeg_quality)?;
        log::info!("writing annotated video to {}", sink.path().display());
        Box::new(sink)
    } else {
        Box::new(NullSink::default())
    };

    let dispatcher = {
        let backend = HttpAlertBackend::new(&cfg.backend.url, cfg.backend.timeout)?;
        let audit = AuditLog::open(&cfg.alerts.audit_path)?;
        AlertDispatcher::spawn(Box::new(backend), audit, cfg.backend.queue_capacity)?
    };
    let snapshots = SnapshotStore::new(&cfg.alerts.snapshot_dir, &cfg.backend.static_base_url);

    let mut pipeline = DwellPipeline::new(cfg.threshold, status, snapshots)
        .with_overlay(overlay, weights)
        .with_annotator(annotator)
        .with_dispatcher(dispatcher);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let summary = pipeline.run(source.as_mut(), detector.as_mut(), sink.as_mut(), &stop)?;
    let dispatch = pipeline.shutdown(Duration::from_secs(args.shutdown_grace_secs));

    log::info!(
        "run finished: frames={} written={} overlay_frames={} detection_errors={} stopped={}",
        summary.frames,
        sink.frames_written(),
        summary.overlay_frames,
        summary.detection_errors,
        summary.stopped
    );
    match summary.alert_frame {
        Some(frame) => log::info!("alert fired on frame {}", frame),
        None => log::info!("no alert fired"),
    }
    if let Some(stats) = dispatch {
        log::info!(
            "dispatch: enqueued={} recorded={} failed={} dropped={}",
            stats.enqueued,
            stats.recorded,
            stats.failed,
            stats.dropped
        );
    }
    Ok(())
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create log directory {}", parent.display())
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn apply_args(cfg: &mut PipelineConfig, args: &Args) -> Result<()> {
    if let Some(video) = &args.video {
        cfg.input.video = Some(video.clone());
    }
    if let Some(index) = args.camera_index {
        cfg.input.camera_index = index;
    }
    if let Some(device) = &args.camera_device {
        cfg.input.camera_device = Some(device.clone());
    }
    if let Some(width) = args.width {
        cfg.input.width = width;
    }
    if let Some(height) = args.height {
        cfg.input.height = height;
    }
    if let Some(frames) = args.synthetic_frames {
        cfg.input.synthetic_frames = Some(frames);
    }
    if let Some(threshold) = args.threshold {
        cfg.threshold = threshold;
    }
    if let Some(url) = &args.backend_url {
        cfg.backend.url = url.clone();
    }
    if let Some(url) = &args.static_url {
        cfg.backend.static_base_url = url.clone();
    }
    if let Some(overlay) = &args.overlay {
        cfg.overlay.image = overlay.clone();
    }
    if let Some(output) = &args.output {
        cfg.output.file = Some(output.clone());
    }
    if args.no_output {
        cfg.output.enabled = false;
    }
    if let Some(detector) = &args.detector {
        cfg.detector.kind = DetectorKind::parse(detector)?;
    }
    if let Some(path) = &args.detector_path {
        cfg.detector.path = Some(path.clone());
    }
    if let Some(font) = &args.font {
        cfg.annotation.font_path = Some(font.clone());
    }
    Ok(())
}

fn log_config(cfg: &PipelineConfig) {
    let input = if cfg.input.uses_file() {
        format!("file {}", cfg.input.video.as_deref().unwrap_or_default())
    } else {
        format!("camera {}", cfg.input.camera_device())
    };
    log::info!("configuration:");
    log::info!("  input={} size={}x{}", input, cfg.input.width, cfg.input.height);
    log::info!("  threshold={} frames", cfg.threshold);
    log::info!(
        "  backend={} static={} timeout={:?}",
        cfg.backend.url,
        cfg.backend.static_base_url,
        cfg.backend.timeout
    );
    log::info!(
        "  overlay={} camera_alpha={} file_alpha={} beta={}",
        cfg.overlay.image.display(),
        cfg.overlay.camera.alpha,
        cfg.overlay.file.alpha,
        cfg.overlay.camera.beta
    );
    log::info!(
        "  audit={} snapshots={}",
        cfg.alerts.audit_path.display(),
        cfg.alerts.snapshot_dir.display()
    );
    log::info!("  detector={:?} path={:?}", cfg.detector.kind, cfg.detector.path);
}

fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.kind {
        DetectorKind::Scripted => match &settings.path {
            Some(path) => Ok(Box::new(ScriptedBackend::open(path)?)),
            None => {
                log::warn!("no detection script configured; every frame will be empty");
                Ok(Box::new(ScriptedBackend::from_lines(Vec::<&str>::new())))
            }
        },
        DetectorKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                let path = settings
                    .path
                    .as_ref()
                    .ok_or_else(|| anyhow!("the tract detector needs a model path"))?;
                let backend = dwell_watch::TractBackend::new(path)?
                    .with_thresholds(settings.confidence, settings.iou);
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow!(
                    "the tract detector requires the backend-tract feature"
                ))
            }
        }
    }
}

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::alert::{AlertDispatcher, SourceStatus};
use crate::overlay::BlendWeights;
use crate::sink::DEFAULT_JPEG_QUALITY;

const DEFAULT_THRESHOLD: u64 = 100;
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
const DEFAULT_STATIC_BASE_URL: &str = "http://localhost:8001";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OVERLAY_IMAGE: &str = "./images/danger.png";
const DEFAULT_OUTPUT_DIR: &str = "./outputs";
const DEFAULT_AUDIT_PATH: &str = "./alerts/alert.txt";
const DEFAULT_SNAPSHOT_DIR: &str = "server/docker/nginx/images";
const DEFAULT_DETECTOR: &str = "scripted";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    input: Option<InputConfigFile>,
    dwell: Option<DwellConfigFile>,
    overlay: Option<OverlayConfigFile>,
    backend: Option<BackendConfigFile>,
    output: Option<OutputConfigFile>,
    alerts: Option<AlertsConfigFile>,
    detector: Option<DetectorConfigFile>,
    annotation: Option<AnnotationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InputConfigFile {
    video: Option<String>,
    camera_index: Option<u32>,
    camera_device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    synthetic_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DwellConfigFile {
    threshold: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    image: Option<PathBuf>,
    camera_alpha: Option<f32>,
    file_alpha: Option<f32>,
    beta: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BackendConfigFile {
    url: Option<String>,
    static_base_url: Option<String>,
    timeout_secs: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputConfigFile {
    enabled: Option<bool>,
    dir: Option<PathBuf>,
    file: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertsConfigFile {
    audit_path: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotationConfigFile {
    font_path: Option<PathBuf>,
}

/// Effective configuration of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: InputSettings,
    /// Consecutive person frames before the alert fires.
    pub threshold: u64,
    pub overlay: OverlaySettings,
    pub backend: BackendSettings,
    pub output: OutputSettings,
    pub alerts: AlertSettings,
    pub detector: DetectorSettings,
    pub annotation: AnnotationSettings,
}

#[derive(Debug, Clone)]
pub struct InputSettings {
    /// Recorded video path. Empty or absent means camera input.
    pub video: Option<String>,
    pub camera_index: u32,
    /// Explicit device node, overriding `/dev/video<camera_index>`.
    pub camera_device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Frame count for `stub://` sources.
    pub synthetic_frames: Option<u64>,
}

impl InputSettings {
    pub fn uses_file(&self) -> bool {
        self.video
            .as_deref()
            .map(|video| !video.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn camera_device(&self) -> String {
        self.camera_device
            .clone()
            .unwrap_or_else(|| format!("/dev/video{}", self.camera_index))
    }
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub image: PathBuf,
    pub camera: BlendWeights,
    pub file: BlendWeights,
}

impl OverlaySettings {
    pub fn weights_for(&self, status: SourceStatus) -> BlendWeights {
        match status {
            SourceStatus::Camera => self.camera,
            SourceStatus::File => self.file,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    /// Base URL under which the static file server exposes `alerts.snapshot_dir`.
    pub static_base_url: String,
    pub timeout: Duration,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Fixed output file; otherwise a timestamped name inside `dir`.
    pub file: Option<PathBuf>,
    pub jpeg_quality: u8,
}

impl OutputSettings {
    pub fn path_at(&self, at: &DateTime<Local>) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => self.dir.join(crate::sink::output_file_name(at)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub audit_path: PathBuf,
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// JSON-lines replay of recorded detections.
    Scripted,
    /// YOLOv8 ONNX model (feature `backend-tract`).
    Tract,
}

impl DetectorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scripted" => Ok(DetectorKind::Scripted),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected scripted or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    /// Script file (scripted) or ONNX model (tract).
    pub path: Option<PathBuf>,
    pub confidence: f32,
    pub iou: f32,
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationSettings {
    pub font_path: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from the JSON file named by `DWELL_CONFIG` (if any), apply
    /// `DWELL_*` environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DWELL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let input = file.input.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let backend = file.backend.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();

        let beta = overlay.beta.unwrap_or(BlendWeights::CAMERA.beta);
        let kind = match detector.backend.as_deref() {
            Some(name) => DetectorKind::parse(name)?,
            None => DetectorKind::parse(DEFAULT_DETECTOR)?,
        };

        Ok(Self {
            input: InputSettings {
                video: input.video,
                camera_index: input.camera_index.unwrap_or(DEFAULT_CAMERA_INDEX),
                camera_device: input.camera_device,
                width: input.width.unwrap_or(DEFAULT_WIDTH),
                height: input.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: input.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                synthetic_frames: input.synthetic_frames,
            },
            threshold: file
                .dwell
                .and_then(|dwell| dwell.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            overlay: OverlaySettings {
                image: overlay
                    .image
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OVERLAY_IMAGE)),
                camera: BlendWeights {
                    alpha: overlay.camera_alpha.unwrap_or(BlendWeights::CAMERA.alpha),
                    beta,
                },
                file: BlendWeights {
                    alpha: overlay.file_alpha.unwrap_or(BlendWeights::FILE.alpha),
                    beta,
                },
            },
            backend: BackendSettings {
                url: backend
                    .url
                    .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
                static_base_url: backend
                    .static_base_url
                    .unwrap_or_else(|| DEFAULT_STATIC_BASE_URL.to_string()),
                timeout: Duration::from_secs(backend.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
                queue_capacity: backend
                    .queue_capacity
                    .unwrap_or(AlertDispatcher::DEFAULT_QUEUE_CAPACITY),
            },
            output: OutputSettings {
                enabled: output.enabled.unwrap_or(true),
                dir: output.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                file: output.file,
                jpeg_quality: output.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            alerts: AlertSettings {
                audit_path: alerts
                    .audit_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_PATH)),
                snapshot_dir: alerts
                    .snapshot_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            },
            detector: DetectorSettings {
                kind,
                path: detector.path,
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou: detector.iou.unwrap_or(DEFAULT_IOU),
            },
            annotation: AnnotationSettings {
                font_path: file.annotation.and_then(|annotation| annotation.font_path),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(video) = std::env::var("DWELL_VIDEO") {
            self.input.video = Some(video);
        }
        if let Ok(index) = std::env::var("DWELL_CAMERA_INDEX") {
            self.input.camera_index = index
                .trim()
                .parse()
                .map_err(|_| anyhow!("DWELL_CAMERA_INDEX must be a non-negative integer"))?;
        }
        if let Ok(threshold) = std::env::var("DWELL_THRESHOLD") {
            self.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DWELL_THRESHOLD must be an integer frame count"))?;
        }
        if let Ok(url) = std::env::var("DWELL_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.url = url;
            }
        }
        if let Ok(url) = std::env::var("DWELL_STATIC_BASE_URL") {
            if !url.trim().is_empty() {
                self.backend.static_base_url = url;
            }
        }
        if let Ok(image) = std::env::var("DWELL_OVERLAY_IMAGE") {
            if !image.trim().is_empty() {
                self.overlay.image = PathBuf::from(image);
            }
        }
        if let Ok(detector) = std::env::var("DWELL_DETECTOR") {
            self.detector.kind = DetectorKind::parse(&detector)?;
        }
        if let Ok(path) = std::env::var("DWELL_DETECTOR_PATH") {
            if !path.trim().is_empty() {
                self.detector.path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    /// Check invariants. Called by `load`; the binary calls it again after
    /// applying command-line overrides.
    pub fn validate(&mut self) -> Result<()> {
        if self.threshold == 0 {
            return Err(anyhow!("dwell threshold must be at least 1 frame"));
        }
        if self.input.width == 0 || self.input.height == 0 {
            return Err(anyhow!(
                "frame size must be non-zero, got {}x{}",
                self.input.width,
                self.input.height
            ));
        }
        self.overlay.camera.validate()?;
        self.overlay.file.validate()?;

        self.backend.url = validate_http_url("backend url", &self.backend.url)?;
        self.backend.static_base_url =
            validate_http_url("static base url", &self.backend.static_base_url)?;
        if self.backend.queue_capacity == 0 {
            return Err(anyhow!("dispatch queue capacity must be at least 1"));
        }
        if self.backend.timeout.is_zero() {
            return Err(anyhow!("backend timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be within 1..=100, got {}",
                self.output.jpeg_quality
            ));
        }
        if self.detector.kind == DetectorKind::Tract && self.detector.path.is_none() {
            return Err(anyhow!("the tract detector needs a model path"));
        }
        for (name, value) in [
            ("confidence", self.detector.confidence),
            ("iou", self.detector.iou),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must be within 0..=1, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Parse an http(s) URL and return it without a trailing slash.
fn validate_http_url(name: &str, value: &str) -> Result<String> {
    let parsed = Url::parse(value.trim())
        .map_err(|e| anyhow!("{} '{}' is not a valid URL: {}", name, value, e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "{} '{}' must use http or https, not {}",
                name,
                value,
                other
            ))
        }
    }
    if parsed.host_str().is_none() {
        return Err(anyhow!("{} '{}' has no host", name, value));
    }
    Ok(value.trim().trim_end_matches('/').to_string())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PipelineConfig {
        PipelineConfig::from_file(PipelineConfigFile::default()).expect("defaults")
    }

    #[test]
    fn defaults_validate() -> Result<()> {
        let mut cfg = defaults();
        cfg.validate()?;
        assert_eq!(cfg.threshold, 100);
        assert_eq!((cfg.input.width, cfg.input.height), (1280, 720));
        assert_eq!(cfg.input.camera_device(), "/dev/video0");
        assert!(!cfg.input.uses_file());
        assert_eq!(cfg.overlay.weights_for(SourceStatus::Camera), BlendWeights::CAMERA);
        assert_eq!(cfg.overlay.weights_for(SourceStatus::File), BlendWeights::FILE);
        Ok(())
    }

    #[test]
    fn trailing_slash_is_trimmed() -> Result<()> {
        assert_eq!(
            validate_http_url("backend url", "http://api:8000/")?,
            "http://api:8000"
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = defaults();
        cfg.threshold = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.backend.url = "ftp://files".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.overlay.camera.alpha = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = defaults();
        cfg.detector.kind = DetectorKind::Tract;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timestamped_output_path() {
        let cfg = defaults();
        let at = chrono::TimeZone::with_ymd_and_hms(&Local, 2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(
            cfg.output.path_at(&at),
            PathBuf::from("./outputs/20240506_07h08m09s_tracking.mjpeg")
        );
    }
}

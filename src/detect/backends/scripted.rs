use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::classes::ClassNames;
use crate::detect::result::{DetectionBatch, RawDetections};
use crate::frame::Frame;

/// Replays detector output recorded as JSON lines, one line per frame.
///
/// Each line is a `RawDetections` object. A blank line means nothing was
/// detected; `null` or an unparsable line is a detection-step error for that
/// frame. Once the script is exhausted every further frame is empty.
pub struct ScriptedBackend {
    reader: Box<dyn BufRead + Send>,
    names: ClassNames,
    line_no: u64,
    exhausted: bool,
}

impl ScriptedBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open detection script {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut script = String::new();
        for line in lines {
            script.push_str(line.as_ref());
            script.push('\n');
        }
        Self::from_reader(Cursor::new(script.into_bytes()))
    }

    fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            names: ClassNames::coco(),
            line_no: 0,
            exhausted: false,
        }
    }

    pub fn with_class_names(mut self, names: ClassNames) -> Self {
        self.names = names;
        self
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::ObjectDetection | DetectionCapability::Tracking
        )
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionBatch> {
        if self.exhausted {
            return Ok(DetectionBatch::Empty);
        }
        let mut line = String::new();
        self.line_no += 1;
        let read = self
            .reader
            .read_line(&mut line)
            .with_context(|| format!("failed to read detection script line {}", self.line_no))?;
        if read == 0 {
            self.line_no -= 1;
            log::debug!("detection script exhausted after {} lines", self.line_no);
            self.exhausted = true;
            return Ok(DetectionBatch::Empty);
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(DetectionBatch::Empty);
        }
        let raw: Option<RawDetections> = serde_json::from_str(line)
            .map_err(|e| anyhow!("detection script line {}: {}", self.line_no, e))?;
        let raw = raw.ok_or_else(|| {
            anyhow!("detection script line {}: no detector output", self.line_no)
        })?;
        raw.into_batch(&self.names, true)
    }
}

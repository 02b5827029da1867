use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Append-only local record of confirmed alerts, one line per alert.
///
/// Each record is written with a single `write_all` on a file opened in
/// append mode, so concurrent or interrupted writers never interleave or
/// leave half a line behind another record.
#[derive(Clone, Debug)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Prepare the log, creating its parent directory if needed.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create audit log directory {}", parent.display())
                })?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Line breaks inside the record are rejected.
    pub fn append(&self, record: &str) -> Result<()> {
        if record.contains('\n') || record.contains('\r') {
            return Err(anyhow!("audit record must be a single line"));
        }
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open audit log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to audit log {}", self.path.display()))?;
        file.flush()?;
        Ok(())
    }

    /// Read back all records.
    pub fn records(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(anyhow!("failed to read audit log {}: {}", self.path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_whole_lines() -> Result<()> {
        let dir = tempdir()?;
        let log = AuditLog::open(dir.path().join("alerts/alert.txt"))?;
        assert!(log.records()?.is_empty());

        log.append("http://localhost:8001/a_person_alert.png")?;
        log.append("http://localhost:8001/b_person_alert.png")?;

        assert_eq!(
            log.records()?,
            vec![
                "http://localhost:8001/a_person_alert.png",
                "http://localhost:8001/b_person_alert.png"
            ]
        );
        Ok(())
    }

    #[test]
    fn rejects_multi_line_records() -> Result<()> {
        let dir = tempdir()?;
        let log = AuditLog::open(dir.path().join("alert.txt"))?;
        assert!(log.append("one\ntwo").is_err());
        assert!(log.records()?.is_empty());
        Ok(())
    }
}

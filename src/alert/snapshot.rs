use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::ImageFormat;

use crate::frame::Frame;

/// Timestamp layout used in generated file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%Hh%Mm%Ss";

const SNAPSHOT_SUFFIX: &str = "person_alert.png";

/// `<timestamp>_person_alert.png`
pub fn snapshot_file_name(at: &DateTime<Local>) -> String {
    format!("{}_{}", at.format(TIMESTAMP_FORMAT), SNAPSHOT_SUFFIX)
}

/// Where alert snapshots are written locally and how the backend reaches them.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    public_base_url: String,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(dir: P, public_base_url: &str) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn local_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub fn public_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_base_url, file_name)
    }

    /// Save the frame as PNG. The image is written under a temporary name and
    /// renamed into place, so readers never see a partial file.
    pub fn save(&self, frame: &Frame, file_name: &str) -> Result<PathBuf> {
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(anyhow!("snapshot name must not contain path separators"));
        }
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create snapshot directory {}", self.dir.display())
        })?;
        let final_path = self.local_path(file_name);
        let tmp_path = self.local_path(&format!(".{}.tmp", file_name));
        frame
            .image()
            .save_with_format(&tmp_path, ImageFormat::Png)
            .with_context(|| format!("failed to write snapshot {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("failed to move snapshot to {}", final_path.display()))?;
        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn file_name_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        assert_eq!(snapshot_file_name(&at), "20240309_07h05m02s_person_alert.png");
    }

    #[test]
    fn public_url_joins_base() {
        let store = SnapshotStore::new("images", "http://localhost:8001/");
        assert_eq!(
            store.public_url("x_person_alert.png"),
            "http://localhost:8001/x_person_alert.png"
        );
    }

    #[test]
    fn saves_png_without_leftovers() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path().join("images"), "http://static");
        let frame = Frame::solid(0, 8, 6, [10, 20, 30]);
        let path = store.save(&frame, "shot_person_alert.png")?;

        let loaded = image::open(&path)?.to_rgb8();
        assert_eq!(loaded.dimensions(), (8, 6));
        assert_eq!(loaded.get_pixel(0, 0).0, [10, 20, 30]);
        let entries = std::fs::read_dir(store.dir())?.count();
        assert_eq!(entries, 1);
        Ok(())
    }
}

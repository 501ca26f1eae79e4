// 📷 Image capture and the on-disk image directory
//
// current.jpg    - frame from the latest run
// previous.jpg   - baseline the next run compares against
// pantry_YYYYmmdd_HHMMSS.jpg - per-scan archives, pruned after each scan

use crate::config::Config;
use crate::error::{PantryError, PantryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

const ARCHIVE_PREFIX: &str = "pantry_";
const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];

fn ensure_jpeg(bytes: &[u8], origin: &str) -> PantryResult<()> {
    if bytes.len() < JPEG_MAGIC.len() || bytes[..2] != JPEG_MAGIC {
        return Err(PantryError::Image(format!(
            "{} did not produce a JPEG ({} bytes)",
            origin,
            bytes.len()
        )));
    }
    Ok(())
}

// ============================================================================
// SOURCES
// ============================================================================

/// Produces one JPEG frame per call
pub trait ImageSource {
    fn capture(&self) -> PantryResult<Vec<u8>>;
}

/// Reads an existing JPEG (manual scans, replays)
pub struct FileImageSource {
    pub path: PathBuf,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileImageSource { path: path.into() }
    }
}

impl ImageSource for FileImageSource {
    fn capture(&self) -> PantryResult<Vec<u8>> {
        let bytes = fs::read(&self.path).map_err(|e| {
            PantryError::Image(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        ensure_jpeg(&bytes, &self.path.display().to_string())?;
        Ok(bytes)
    }
}

/// Runs an external grabber (fswebcam, libcamera-still, ...) that writes JPEG to stdout
pub struct CommandImageSource {
    program: String,
    args: Vec<String>,
}

impl CommandImageSource {
    pub fn new(command: &[String]) -> PantryResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PantryError::Image("capture command is empty".to_string()))?;

        Ok(CommandImageSource {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl ImageSource for CommandImageSource {
    fn capture(&self) -> PantryResult<Vec<u8>> {
        debug!(program = %self.program, args = ?self.args, "capturing frame");

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| PantryError::Image(format!("could not run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(PantryError::Image(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        ensure_jpeg(&output.stdout, &self.program)?;
        info!(bytes = output.stdout.len(), "frame captured");
        Ok(output.stdout)
    }
}

// ============================================================================
// IMAGE DIRECTORY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestImage {
    pub exists: bool,
    pub path: String,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct ImageStore {
    dir: PathBuf,
    current: String,
    previous: String,
    test: String,
    retention: usize,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let defaults = Config::default();
        ImageStore {
            dir: dir.into(),
            current: defaults.current_image,
            previous: defaults.previous_image,
            test: defaults.test_image,
            retention: defaults.archive_retention,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        ImageStore {
            dir: config.image_directory.clone(),
            current: config.current_image.clone(),
            previous: config.previous_image.clone(),
            test: config.test_image.clone(),
            retention: config.archive_retention,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(&self.current)
    }

    pub fn previous_path(&self) -> PathBuf {
        self.dir.join(&self.previous)
    }

    pub fn ensure_dir(&self) -> PantryResult<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| {
                PantryError::Image(format!("failed to create {}: {}", self.dir.display(), e))
            })?;
            info!(dir = %self.dir.display(), "created image directory");
        }
        Ok(())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> PantryResult<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, bytes)
            .map_err(|e| PantryError::Image(format!("failed to write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = bytes.len(), "image saved");
        Ok(path)
    }

    /// None on the first run
    pub fn load_previous(&self) -> PantryResult<Option<Vec<u8>>> {
        let path = self.previous_path();
        if !path.exists() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|e| PantryError::Image(format!("failed to read {}: {}", path.display(), e)))
    }

    pub fn save_current(&self, bytes: &[u8]) -> PantryResult<PathBuf> {
        self.write(&self.current, bytes)
    }

    /// Only called once a scan has been recorded
    pub fn save_previous(&self, bytes: &[u8]) -> PantryResult<PathBuf> {
        self.write(&self.previous, bytes)
    }

    pub fn save_test(&self, bytes: &[u8]) -> PantryResult<PathBuf> {
        self.write(&self.test, bytes)
    }

    pub fn archive_name(at: DateTime<Utc>) -> String {
        format!("{}{}.jpg", ARCHIVE_PREFIX, at.format("%Y%m%d_%H%M%S"))
    }

    /// Returns the archive file name (stored as the scan's image reference)
    pub fn archive(&self, bytes: &[u8], at: DateTime<Utc>) -> PantryResult<String> {
        let name = Self::archive_name(at);
        self.write(&name, bytes)?;
        Ok(name)
    }

    /// Delete stray .jpg files, keeping the named images and the newest `retention` archives
    pub fn cleanup(&self) -> PantryResult<usize> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            PantryError::Image(format!("failed to list {}: {}", self.dir.display(), e))
        })?;

        let keep = [&self.current, &self.previous, &self.test];
        let mut archives = Vec::new();
        let mut strays = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".jpg") || keep.iter().any(|k| **k == name) {
                continue;
            }
            if name.starts_with(ARCHIVE_PREFIX) {
                archives.push(name);
            } else {
                strays.push(name);
            }
        }

        // Timestamped names sort chronologically
        archives.sort_unstable_by(|a, b| b.cmp(a));
        let doomed = archives.into_iter().skip(self.retention).chain(strays);

        let mut deleted = 0;
        for name in doomed {
            let path = self.dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not delete old image"),
            }
        }

        if deleted > 0 {
            info!(deleted, "cleaned up old archived images");
        }
        Ok(deleted)
    }

    pub fn latest_image(&self) -> LatestImage {
        let path = self.current_path();
        let last_updated = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        LatestImage {
            exists: last_updated.is_some(),
            path: format!("/image/{}", self.current),
            last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FRAME: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

    fn store() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        (dir, store)
    }

    fn jpgs(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".jpg"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_previous_missing_on_first_run() {
        let (_dir, store) = store();
        assert!(store.load_previous().unwrap().is_none());

        store.save_previous(FRAME).unwrap();
        assert_eq!(store.load_previous().unwrap().unwrap(), FRAME);
    }

    #[test]
    fn test_archive_name_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(ImageStore::archive_name(at), "pantry_20250309_070501.jpg");
    }

    #[test]
    fn test_cleanup_keeps_named_images() {
        let (dir, store) = store();
        store.save_current(FRAME).unwrap();
        store.save_previous(FRAME).unwrap();
        store.save_test(FRAME).unwrap();
        store
            .archive(FRAME, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        fs::write(dir.path().join("stray.jpg"), FRAME).unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let deleted = store.cleanup().unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(jpgs(dir.path()), vec!["current.jpg", "previous.jpg", "test_capture.jpg"]);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_retains_newest_archives() {
        let (dir, store) = store();
        let store = store.with_retention(2);
        for day in 1..=4 {
            store
                .archive(FRAME, Utc.with_ymd_and_hms(2025, 1, day, 8, 0, 0).unwrap())
                .unwrap();
        }

        store.cleanup().unwrap();

        assert_eq!(
            jpgs(dir.path()),
            vec!["pantry_20250103_080000.jpg", "pantry_20250104_080000.jpg"]
        );
    }

    #[test]
    fn test_latest_image() {
        let (_dir, store) = store();
        let missing = store.latest_image();
        assert!(!missing.exists);
        assert!(missing.last_updated.is_none());

        store.save_current(FRAME).unwrap();
        let latest = store.latest_image();
        assert!(latest.exists);
        assert_eq!(latest.path, "/image/current.jpg");
        assert!(latest.last_updated.is_some());
    }

    #[test]
    fn test_file_source_rejects_non_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.jpg");
        let bad = dir.path().join("bad.jpg");
        fs::write(&good, FRAME).unwrap();
        fs::write(&bad, b"PNG?").unwrap();

        assert_eq!(FileImageSource::new(&good).capture().unwrap(), FRAME);
        assert!(matches!(
            FileImageSource::new(&bad).capture(),
            Err(PantryError::Image(_))
        ));
        assert!(FileImageSource::new(dir.path().join("missing.jpg")).capture().is_err());
    }

    #[test]
    fn test_empty_capture_command() {
        assert!(CommandImageSource::new(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_source_reads_stdout() {
        let command: Vec<String> = ["sh", "-c", r"printf '\377\330jpeg'"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let bytes = CommandImageSource::new(&command).unwrap().capture().unwrap();
        assert_eq!(&bytes[..2], &JPEG_MAGIC);

        let failing: Vec<String> = ["sh", "-c", "exit 3"].iter().map(|s| s.to_string()).collect();
        assert!(CommandImageSource::new(&failing).unwrap().capture().is_err());
    }
}

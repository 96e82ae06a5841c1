//! Inspection log: where detected images are recorded.
//!
//! [`InspectionLog`] is the persistence boundary used by the detect target.
//! [`JsonInspectionLog`] keeps the log in a single JSON document that is
//! rewritten atomically on every change.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the inspection log.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Inspection log I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Inspection log at {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize inspection log: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to replace inspection log: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// An image to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub link_id: u64,
    pub loop_count: u64,
    /// `Some(true)` left camera, `Some(false)` right camera, `None` unknown.
    pub left_camera: Option<bool>,
    /// `None` when the inspection was inconclusive.
    pub passed: Option<bool>,
    pub filepath: PathBuf,
}

/// A recorded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub img_id: u64,
    pub link_id: u64,
    pub loop_count: u64,
    pub left_camera: Option<bool>,
    pub passed: Option<bool>,
    pub filepath: PathBuf,
    pub logged_at: DateTime<Utc>,
}

/// Persistence boundary for inspection results.
pub trait InspectionLog: Send + Sync {
    /// Record an image, returning its id.
    fn log_image(&self, image: NewImage) -> Result<u64, StoreError>;

    /// Keep only the `keep_recent` newest images of a link. Failed images
    /// that fall off are kept as past failures, of which only the
    /// `keep_failures` newest are retained.
    fn trim_images(
        &self,
        link_id: u64,
        keep_recent: usize,
        keep_failures: usize,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LogState {
    next_id: u64,
    images: Vec<ImageRecord>,
    past_failures: Vec<ImageRecord>,
}

impl LogState {
    fn insert(&mut self, image: NewImage) -> u64 {
        self.next_id += 1;
        let img_id = self.next_id;
        self.images.push(ImageRecord {
            img_id,
            link_id: image.link_id,
            loop_count: image.loop_count,
            left_camera: image.left_camera,
            passed: image.passed,
            filepath: image.filepath,
            logged_at: Utc::now(),
        });
        img_id
    }

    fn trim(&mut self, link_id: u64, keep_recent: usize, keep_failures: usize) {
        let overflow = overflow_ids(&self.images, link_id, keep_recent);
        if !overflow.is_empty() {
            let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.images)
                .into_iter()
                .partition(|image| overflow.contains(&image.img_id));
            self.images = kept;
            self.past_failures
                .extend(dropped.into_iter().filter(|image| image.passed == Some(false)));
        }

        let stale = overflow_ids(&self.past_failures, link_id, keep_failures);
        self.past_failures
            .retain(|image| !stale.contains(&image.img_id));
    }
}

/// Ids of a link's records beyond the `keep` newest.
fn overflow_ids(records: &[ImageRecord], link_id: u64, keep: usize) -> Vec<u64> {
    let mut ids: Vec<u64> = records
        .iter()
        .filter(|record| record.link_id == link_id)
        .map(|record| record.img_id)
        .collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.into_iter().skip(keep).collect()
}

/// Inspection log stored as a JSON document.
#[derive(Debug)]
pub struct JsonInspectionLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl JsonInspectionLog {
    /// Open the log at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupted {
                path: path.clone(),
                source,
            })?
        } else {
            LogState::default()
        };

        crate::debug_event!("store", "opened", "{}", path.display());
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Images of a link, newest first.
    pub fn images_for_link(&self, link_id: u64) -> Vec<ImageRecord> {
        newest_first(&self.state.lock().images, link_id)
    }

    /// Past failures of a link, newest first.
    pub fn past_failures_for_link(&self, link_id: u64) -> Vec<ImageRecord> {
        newest_first(&self.state.lock().past_failures, link_id)
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    /// The most recently logged image, if any.
    pub fn most_recent(&self) -> Option<ImageRecord> {
        self.state
            .lock()
            .images
            .iter()
            .max_by_key(|image| image.img_id)
            .cloned()
    }

    /// Write `state` to a temp file next to the log and swap it in.
    fn persist(&self, state: &LogState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(state)?;
        let mut file = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.persist(&self.path)?;
        Ok(())
    }
}

impl InspectionLog for JsonInspectionLog {
    fn log_image(&self, image: NewImage) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let img_id = next.insert(image);
        self.persist(&next)?;
        *state = next;
        Ok(img_id)
    }

    fn trim_images(
        &self,
        link_id: u64,
        keep_recent: usize,
        keep_failures: usize,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        next.trim(link_id, keep_recent, keep_failures);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }
}

fn newest_first(records: &[ImageRecord], link_id: u64) -> Vec<ImageRecord> {
    let mut matching: Vec<ImageRecord> = records
        .iter()
        .filter(|record| record.link_id == link_id)
        .cloned()
        .collect();
    matching.sort_unstable_by(|a, b| b.img_id.cmp(&a.img_id));
    matching
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image(link_id: u64, passed: Option<bool>) -> NewImage {
        NewImage {
            link_id,
            loop_count: 1,
            left_camera: Some(true),
            passed,
            filepath: PathBuf::from(format!("/images/{link_id}.jpg")),
        }
    }

    fn ids(records: &[ImageRecord]) -> Vec<u64> {
        records.iter().map(|record| record.img_id).collect()
    }

    #[test]
    fn test_log_assigns_increasing_ids() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonInspectionLog::open(temp_dir.path().join("log.json")).unwrap();

        assert_eq!(log.log_image(image(1, Some(true))).unwrap(), 1);
        assert_eq!(log.log_image(image(2, Some(false))).unwrap(), 2);
        assert_eq!(log.image_count(), 2);
        assert_eq!(log.most_recent().unwrap().link_id, 2);
    }

    #[test]
    fn test_log_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("log.json");

        {
            let log = JsonInspectionLog::open(&path).unwrap();
            log.log_image(image(7, None)).unwrap();
        }

        let log = JsonInspectionLog::open(&path).unwrap();
        let images = log.images_for_link(7);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].passed, None);
        // Ids keep counting after reopen
        assert_eq!(log.log_image(image(7, None)).unwrap(), 2);
    }

    #[test]
    fn test_trim_moves_overflow_failures() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonInspectionLog::open(temp_dir.path().join("log.json")).unwrap();

        // ids 1..=5 for link 1: fail, pass, fail, unknown, pass
        for passed in [Some(false), Some(true), Some(false), None, Some(true)] {
            log.log_image(image(1, passed)).unwrap();
        }
        // Another link is left alone
        log.log_image(image(2, Some(false))).unwrap();

        log.trim_images(1, 2, 10).unwrap();

        assert_eq!(ids(&log.images_for_link(1)), vec![5, 4]);
        assert_eq!(ids(&log.past_failures_for_link(1)), vec![3, 1]);
        assert_eq!(ids(&log.images_for_link(2)), vec![6]);
    }

    #[test]
    fn test_trim_caps_past_failures() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonInspectionLog::open(temp_dir.path().join("log.json")).unwrap();

        for _ in 0..4 {
            log.log_image(image(3, Some(false))).unwrap();
        }

        log.trim_images(3, 1, 2).unwrap();

        assert_eq!(ids(&log.images_for_link(3)), vec![4]);
        assert_eq!(ids(&log.past_failures_for_link(3)), vec![3, 2]);
    }

    #[test]
    fn test_corrupted_log_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log.json");
        fs::write(&path, "{not json").unwrap();

        let err = JsonInspectionLog::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}

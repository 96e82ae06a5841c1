//! Watcher targets for the inspection rig.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::Settings;
use crate::watcher::{Notification, Target};

use super::filename::parse_file_name;
use super::store::{InspectionLog, NewImage};

/// Settings shared between the binary and the targets that read or reload them.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Records camera images as they finish being written.
///
/// Parses the file name, moves the image into the configured destination
/// under a timestamped name, logs it and trims the link's history.
pub struct DetectTarget {
    settings: SharedSettings,
    log: Arc<dyn InspectionLog>,
    /// Directory of the settings file; events there are not images.
    config_dir: PathBuf,
}

impl DetectTarget {
    pub fn new(
        settings: SharedSettings,
        log: Arc<dyn InspectionLog>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            log,
            config_dir: config_dir.into(),
        }
    }
}

impl Target for DetectTarget {
    fn call(&self, notification: &Notification) -> anyhow::Result<()> {
        if notification.filename.is_empty() || notification.is_in(&self.config_dir) {
            return Ok(());
        }

        // Snapshot so a concurrent reload can't change values mid-image
        let config = self.settings.read().inspection.clone();

        let Some(parsed) = parse_file_name(&notification.filename, &config) else {
            return Ok(());
        };

        let source_dir = notification
            .directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        crate::log_event!(
            "detect",
            "found",
            "`{}` from camera `{source_dir}`",
            notification.filename
        );

        let left_camera = if parsed.camera == config.left_camera {
            Some(true)
        } else if parsed.camera == config.right_camera {
            Some(false)
        } else {
            None
        };

        let now = Utc::now();
        let source = notification.path();
        let dest = config
            .img_destination
            .join(timestamped_name(&notification.filename, now.timestamp()));
        move_file(&source, &dest)
            .with_context(|| format!("moving {} to {}", source.display(), dest.display()))?;

        let img_id = self
            .log
            .log_image(NewImage {
                link_id: parsed.link_id,
                loop_count: parsed.loop_count,
                left_camera,
                passed: parsed.passed,
                filepath: dest.clone(),
            })
            .context("logging image")?;
        self.log
            .trim_images(
                parsed.link_id,
                config.recent_image_limit,
                config.fail_image_limit,
            )
            .context("trimming images")?;

        crate::debug_event!(
            "detect",
            "logged",
            "image {img_id} for link {} at {}",
            parsed.link_id,
            dest.display()
        );
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("detect_file")
    }
}

/// Reloads the shared settings when the settings file is rewritten.
///
/// A reload that fails to parse or validate leaves the current settings in
/// place and reports the error.
pub struct ReloadTarget {
    settings: SharedSettings,
    settings_path: PathBuf,
}

impl ReloadTarget {
    pub fn new(settings: SharedSettings, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            settings_path: settings_path.into(),
        }
    }
}

impl Target for ReloadTarget {
    fn call(&self, notification: &Notification) -> anyhow::Result<()> {
        if notification.filename.is_empty() || notification.path() != self.settings_path {
            return Ok(());
        }

        let reloaded = Settings::load_from(&self.settings_path)
            .with_context(|| format!("reloading {}", self.settings_path.display()))?;
        reloaded.validate().context("validating reloaded settings")?;

        *self.settings.write() = reloaded;
        crate::log_event!("reload", "settings reloaded", "{}", self.settings_path.display());
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("reload")
    }
}

/// `<stem>_<unix-seconds><.ext>`
fn timestamped_name(file_name: &str, timestamp: i64) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{stem}_{timestamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{timestamp}"),
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            fs::copy(source, dest)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

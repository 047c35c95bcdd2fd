use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_FOLDER_NAME: &str = "appinventor-backup";
pub const DEFAULT_ARCHIVE_SUFFIX: &str = ".aia";
pub const DEFAULT_ARCHIVE_MIME_TYPE: &str = "application/zip";
pub const DEFAULT_AUTOSAVE_WINDOW_MS: u64 = 100_000;
pub const DEFAULT_FORCED_WINDOW_MS: u64 = 150_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub user_id: String,
    pub folder_name: String,
    pub archive_suffix: String,
    pub archive_mime_type: String,
    // A project saved less than this long ago is deferred instead of re-saved.
    pub autosave_window_ms: u64,
    // Idle bound after which deferred projects are flushed unconditionally.
    pub forced_window_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_id: "local".into(),
            folder_name: DEFAULT_FOLDER_NAME.into(),
            archive_suffix: DEFAULT_ARCHIVE_SUFFIX.into(),
            archive_mime_type: DEFAULT_ARCHIVE_MIME_TYPE.into(),
            autosave_window_ms: DEFAULT_AUTOSAVE_WINDOW_MS,
            forced_window_ms: DEFAULT_FORCED_WINDOW_MS,
        }
    }
}

impl BackupConfig {
    pub fn autosave_window(&self) -> Duration {
        Duration::from_millis(self.autosave_window_ms)
    }

    pub fn forced_window(&self) -> Duration {
        Duration::from_millis(self.forced_window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.folder_name.trim().is_empty() {
            return Err(Error::config("backup.folder_name must not be empty"));
        }
        if !self.archive_suffix.starts_with('.') || self.archive_suffix.len() < 2 {
            return Err(Error::config(format!(
                "backup.archive_suffix must look like '.ext' (got '{}')",
                self.archive_suffix
            )));
        }
        if self.forced_window_ms == 0 {
            return Err(Error::config("backup.forced_window_ms must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriveConfig {
    pub base_url: String,
    pub upload_url: String,
    pub token: Option<String>,
    pub token_env: Option<String>,
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/drive/v3".into(),
            upload_url: "https://www.googleapis.com/upload/drive/v3".into(),
            token: None,
            token_env: Some("DRIVE_BACKUP_TOKEN".into()),
            timeout_secs: 60,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: "projects".into(),
        }
    }
}

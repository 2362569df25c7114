//! Storage layer for configuration files (downloads live in SQLite)

use crate::error::MediaDlError;
use directories::{BaseDirs, ProjectDirs};
use mediadl_types::{DeviceProfile, Settings};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

const SETTINGS_FILE: &str = "settings.json";
const DEVICE_PROFILE_FILE: &str = "device_profile.json";
const DATABASE_FILE: &str = "downloads.db";

/// Platform data directory for mediadl
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("org", "mediadl", "mediadl")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .or_else(|| BaseDirs::new().map(|dirs| dirs.home_dir().join(".mediadl")))
        .unwrap_or_else(|| PathBuf::from(".mediadl"))
}

/// Storage manager for mediadl configuration
#[derive(Clone, Debug)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub async fn new(data_dir: PathBuf) -> Result<Self, MediaDlError> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Load settings. The file is written back so defaults filled in for
    /// missing fields (the device id in particular) stick.
    pub async fn load_settings(&self) -> Result<Settings, MediaDlError> {
        let settings = match self.read_json::<Settings>(SETTINGS_FILE).await? {
            Some(settings) => settings,
            None => {
                let settings = Settings::default();
                info!("Creating default settings with device id {}", settings.device_id);
                settings
            }
        };
        self.save_settings(&settings).await?;
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), MediaDlError> {
        self.write_json(SETTINGS_FILE, settings).await
    }

    // ========================================================================
    // Device profile
    // ========================================================================

    /// The device's playback profile; empty when none has been provided
    pub async fn load_device_profile(&self) -> Result<DeviceProfile, MediaDlError> {
        Ok(self
            .read_json::<DeviceProfile>(DEVICE_PROFILE_FILE)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_device_profile(&self, profile: &DeviceProfile) -> Result<(), MediaDlError> {
        self.write_json(DEVICE_PROFILE_FILE, profile).await
    }

    // ========================================================================
    // JSON helpers
    // ========================================================================

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, MediaDlError> {
        let path = self.data_dir.join(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), MediaDlError> {
        let content = serde_json::to_string_pretty(value)?;
        fs::write(self.data_dir.join(name), content).await?;
        Ok(())
    }
}

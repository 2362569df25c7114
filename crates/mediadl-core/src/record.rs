//! Download record - one requested download and its lifecycle state

use crate::error::MediaDlError;
use crate::migration::CURRENT_SCHEMA_VERSION;
use crate::naming;
use crate::negotiator::MediaSourceDecision;
use chrono::{DateTime, Utc};
use mediadl_types::{DownloadAction, DownloadItemAction, DownloadStatus, MediaItem, MediaType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Directory under the download root used by named layouts
const DOWNLOADS_DIR: &str = "Downloads";

/// Legacy downloads were always saved as mp4
const LEGACY_EXTENSION: &str = ".mp4";

/// A single download of a media item.
///
/// Records are plain values: the scheduler takes a copy for the duration of
/// one attempt and writes snapshots back to the store on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    schema_version: u32,
    item: MediaItem,
    server_url: String,
    api_key: String,
    /// Correlates the download with its stopped report on the server
    pub session_id: String,
    pub status: DownloadStatus,
    /// True until the user opens the completed download
    pub is_new: bool,
    /// Set once negotiation found a source this app can play
    pub can_play: bool,
    /// Container extension (with leading dot) when it differs from the source file
    pub extension: Option<String>,
    /// File name reported by the server for the original file
    pub filename: String,
    /// Default download endpoint for the original file
    pub download_url: String,
    pub created_at: DateTime<Utc>,
    /// Files written before named layouts live under `{serverId}/{itemId}/`
    #[serde(default)]
    legacy_layout: bool,
}

impl DownloadRecord {
    pub fn new(
        item: MediaItem,
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        filename: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            item,
            server_url: server_url.into(),
            api_key: api_key.into(),
            session_id: Uuid::new_v4().to_string(),
            status: DownloadStatus::Pending,
            is_new: true,
            can_play: false,
            extension: None,
            filename: filename.into(),
            download_url: download_url.into(),
            created_at: Utc::now(),
            legacy_layout: false,
        }
    }

    /// Record migrated from the legacy store, kept at its original location
    pub(crate) fn legacy(
        item: MediaItem,
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        filename: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            extension: Some(LEGACY_EXTENSION.to_string()),
            legacy_layout: true,
            ..Self::new(item, server_url, api_key, filename, download_url)
        }
    }

    /// Unique store key: `{serverId}_{itemId}`
    pub fn key(&self) -> String {
        format!("{}_{}", self.item.server_id, self.item.id)
    }

    pub fn item(&self) -> &MediaItem {
        &self.item
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Server URL without a trailing slash
    pub fn server_base(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn title(&self) -> Option<&str> {
        self.item.name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn subtitle(&self) -> Option<String> {
        naming::subtitle_for(&self.item)
    }

    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Complete
    }

    /// Album and series folders hold more than one download
    pub fn is_shared_path(&self) -> bool {
        self.item.album.is_some() || self.item.series_name.is_some()
    }

    /// Directory relative to the download root, with a trailing `/`
    pub fn relative_path(&self) -> String {
        let named = if self.legacy_layout {
            None
        } else {
            naming::directory_for(&self.item)
        };
        match named {
            Some(dir) => format!("{}/{}", DOWNLOADS_DIR, dir),
            None => format!("{}/{}/", self.item.server_id, self.item.id),
        }
    }

    /// Local file name including the extension
    pub fn local_filename(&self) -> String {
        if self.legacy_layout {
            // Legacy files were written under the raw server stem
            let stem = match self.filename.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem,
                _ => self.filename.as_str(),
            };
            let ext = self.extension.as_deref().unwrap_or(LEGACY_EXTENSION);
            return format!("{}{}", stem, ext);
        }

        let (stem, original_ext) = match self.filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
            _ => (self.filename.as_str(), String::new()),
        };

        let name = naming::file_name_for(&self.item)
            .or_else(|| naming::sanitize_name(stem))
            .unwrap_or_else(|| self.item.id.clone());
        let ext = self.extension.clone().unwrap_or(original_ext);

        format!("{}{}", name, ext)
    }

    pub fn local_dir(&self, root: &Path) -> PathBuf {
        root.join(self.relative_path())
    }

    pub fn local_file(&self, root: &Path) -> PathBuf {
        self.local_dir(root).join(self.local_filename())
    }

    /// `file://` URI of the local file
    pub fn file_uri(&self, root: &Path) -> Result<Url, MediaDlError> {
        let path = self.local_file(root);
        Url::from_file_path(&path)
            .map_err(|_| MediaDlError::InvalidUrl(path.display().to_string()))
    }

    /// Default download URL resolved against the server
    pub fn default_download_url(&self) -> Result<Url, MediaDlError> {
        let base = Url::parse(&format!("{}/", self.server_base()))?;
        Ok(base.join(&self.download_url)?)
    }

    /// Apply the outcome of media source negotiation
    pub fn apply_decision(&mut self, decision: &MediaSourceDecision) {
        if let Some(session_id) = &decision.play_session_id {
            self.session_id = session_id.clone();
        }
        if decision.extension.is_some() {
            self.extension = decision.extension.clone();
        }
        self.can_play = decision.can_play;
    }

    /// Only video has an in-app player. Legacy records have no media type
    /// but were always video.
    pub fn can_play_in_app(&self) -> bool {
        self.can_play
            && matches!(self.item.media_type, None | Some(MediaType::Video))
    }

    /// Actions offered for this download
    pub fn available_actions(&self) -> Vec<DownloadItemAction> {
        vec![
            DownloadItemAction {
                id: DownloadAction::PlayInApp,
                title: "common.play".to_string(),
                image: Some("play".to_string()),
                is_default: true,
                is_destructive: false,
                is_enabled: true,
                is_supported: self.can_play_in_app(),
            },
            DownloadItemAction {
                id: DownloadAction::OpenInFiles,
                title: "common.openInFiles".to_string(),
                image: Some("folder".to_string()),
                is_default: true,
                is_destructive: false,
                is_enabled: true,
                is_supported: true,
            },
            DownloadItemAction {
                id: DownloadAction::Share,
                title: "common.share".to_string(),
                image: Some("square.and.arrow.up".to_string()),
                is_default: false,
                is_destructive: false,
                is_enabled: true,
                is_supported: true,
            },
            DownloadItemAction {
                id: DownloadAction::Delete,
                title: "common.delete".to_string(),
                image: Some("trash".to_string()),
                is_default: false,
                is_destructive: true,
                is_enabled: true,
                is_supported: true,
            },
        ]
    }

    /// The action used when the item is pressed
    pub fn default_action(&self) -> Option<DownloadAction> {
        self.available_actions()
            .into_iter()
            .find(|a| a.is_supported && a.is_default)
            .map(|a| a.id)
    }
}

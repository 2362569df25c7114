//! Shared types for mediadl
//!
//! This crate contains the data structures shared between the download
//! engine and the CLI: the parts of the media server's item model the
//! engine reads, download status values, device profiles, the playback-info
//! wire types, settings and core events.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Media Item Types
// ============================================================================

/// Media kind reported by the server for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Unknown,
    Video,
    Audio,
    Photo,
    Book,
}

impl MediaType {
    /// Audio and video can be negotiated through the stream endpoints.
    /// Everything else is a static file.
    pub fn is_streamable(self) -> bool {
        matches!(self, MediaType::Audio | MediaType::Video)
    }
}

/// Item kind (the subset of server item kinds the naming rules care about)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Audio,
    AudioBook,
    Book,
    Episode,
    Movie,
    MusicVideo,
    Photo,
    Video,
    #[serde(other)]
    Other,
}

impl ItemKind {
    /// Photos and home videos live in albums that have no artist.
    pub fn has_artist(self) -> bool {
        !matches!(self, ItemKind::Photo | ItemKind::Video)
    }
}

/// Per-user state attached to an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_position_ticks: Option<i64>,
}

/// A media item as described by the server.
///
/// Only the fields used for naming, negotiation and display are kept.
/// Field names follow the server's PascalCase JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaItem {
    pub id: String,
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_index_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_number_end: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
}

impl MediaItem {
    pub fn new(id: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server_id: server_id.into(),
            ..Default::default()
        }
    }

    /// Whether the item can go through media source negotiation
    pub fn is_streamable(&self) -> bool {
        self.media_type.map(MediaType::is_streamable).unwrap_or(false)
    }

    /// Last known playback position, used when reporting a transcode stopped
    pub fn playback_position_ticks(&self) -> i64 {
        self.user_data
            .as_ref()
            .and_then(|d| d.playback_position_ticks)
            .unwrap_or(0)
    }
}

// ============================================================================
// Download Types
// ============================================================================

/// Status of a download.
///
/// `Pending -> Downloading -> {Complete | Failed}`; `Missing` is entered
/// from `Complete` when the file disappears and goes back once it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Complete,
    Failed,
    Missing,
}

impl DownloadStatus {
    /// Only pending downloads are admitted by the scheduler
    pub fn is_schedulable(self) -> bool {
        self == DownloadStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Complete => "complete",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Missing => "missing",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions a user can take on a downloaded item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadAction {
    Delete,
    OpenInFiles,
    PlayInApp,
    Share,
}

/// An action entry as presented for a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItemAction {
    pub id: DownloadAction,
    /// Localization key of the title
    pub title: String,
    pub image: Option<String>,
    /// The first default action is used when the item is pressed
    pub is_default: bool,
    pub is_destructive: bool,
    pub is_enabled: bool,
    /// Unsupported actions are hidden entirely
    pub is_supported: bool,
}

// ============================================================================
// Device Profile Types
// ============================================================================

/// Streaming protocol of a transcoding profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStreamProtocol {
    Http,
    Hls,
    #[serde(other)]
    Other,
}

/// How subtitles are delivered to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleDeliveryMethod {
    Encode,
    Embed,
    External,
    Hls,
    Drop,
}

/// A transcoding target the device accepts.
///
/// Only the protocol is interpreted; every other field is carried as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscodingProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<MediaStreamProtocol>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubtitleProfile {
    pub method: SubtitleDeliveryMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Device capability profile sent to the server.
///
/// Produced elsewhere and treated as opaque apart from its name,
/// transcoding profiles and subtitle profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub transcoding_profiles: Vec<TranscodingProfile>,
    #[serde(default)]
    pub subtitle_profiles: Vec<SubtitleProfile>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Media Info API Types
// ============================================================================

/// Body of a playback info request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackInfoRequest {
    pub device_profile: DeviceProfile,
}

/// A candidate media source returned by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaSourceInfo {
    pub id: Option<String>,
    pub container: Option<String>,
    #[serde(rename = "ETag")]
    pub etag: Option<String>,
    pub supports_direct_play: bool,
    pub supports_direct_stream: bool,
    pub supports_transcoding: bool,
    pub transcoding_url: Option<String>,
    pub transcoding_container: Option<String>,
}

/// Playback info response; the server may omit the source list entirely
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlaybackInfoResponse {
    pub media_sources: Option<Vec<MediaSourceInfo>>,
    pub play_session_id: Option<String>,
}

impl PlaybackInfoResponse {
    pub fn sources(&self) -> &[MediaSourceInfo] {
        self.media_sources.as_deref().unwrap_or(&[])
    }
}

/// Body of a playback stopped report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStopInfo {
    pub item_id: String,
    pub play_session_id: Option<String>,
    pub position_ticks: i64,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory downloads are written under
    pub download_root: PathBuf,
    /// Stable identifier of this device, sent with every request
    pub device_id: String,
    pub device_name: String,
    pub client_name: String,
    pub client_version: String,
    /// Negotiate a playable source (direct stream or transcode) for audio and video
    pub experimental_transcoded_downloads: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_root: dirs::document_dir()
                .map(|p| p.join("mediadl"))
                .unwrap_or_else(|| PathBuf::from(".")),
            device_id: Uuid::new_v4().to_string(),
            device_name: "mediadl".to_string(),
            client_name: "mediadl".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            experimental_transcoded_downloads: false,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// User-visible conditions raised by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DownloadFailed,
    DownloadMissing,
}

/// A user-visible alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Name of the item the alert is about, when known
    pub item_name: Option<String>,
}

impl Alert {
    pub fn download_failed(item_name: Option<String>) -> Self {
        Self {
            kind: AlertKind::DownloadFailed,
            item_name,
        }
    }

    pub fn download_missing(item_name: Option<String>) -> Self {
        Self {
            kind: AlertKind::DownloadMissing,
            item_name,
        }
    }

    /// Localization key of the alert title
    pub fn title_key(&self) -> &'static str {
        match self.kind {
            AlertKind::DownloadFailed => "alerts.downloadFailed.title",
            AlertKind::DownloadMissing => "alerts.missingDownload.title",
        }
    }

    /// English fallback text
    pub fn message(&self) -> String {
        let name = self.item_name.as_deref().unwrap_or("item");
        match self.kind {
            AlertKind::DownloadFailed => format!("Download of \"{}\" failed", name),
            AlertKind::DownloadMissing => format!("Download of \"{}\" is missing", name),
        }
    }
}

/// Events emitted by the core to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    DownloadAdded {
        key: String,
        title: Option<String>,
    },
    DownloadStatusChanged {
        key: String,
        status: DownloadStatus,
    },
    DownloadRemoved {
        key: String,
    },
    Alert(Alert),
}

//! Media source negotiation
//!
//! Decides which URL a download is fetched from and whether the result can
//! be played in the app. Every path ends in a usable URL: when the server has
//! nothing better to offer, the item's original download endpoint is used.

use crate::api::{MediaServerApi, ServerSession};
use crate::error::MediaDlError;
use crate::record::DownloadRecord;
use mediadl_types::{
    DeviceProfile, MediaSourceInfo, MediaStreamProtocol, MediaType, SubtitleDeliveryMethod,
    SubtitleProfile,
};
use std::sync::Arc;
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

/// Where to download from and what the file will be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSourceDecision {
    pub url: Url,
    /// The server is transcoding and expects a stopped report afterwards
    pub is_transcoding: bool,
    /// Container extension with a leading dot
    pub extension: Option<String>,
    pub can_play: bool,
    /// Session id handed out by the server, replaces the record's own
    pub play_session_id: Option<String>,
}

impl MediaSourceDecision {
    /// The item's original file, not playable in the app
    pub fn fallback(record: &DownloadRecord) -> Result<Self, MediaDlError> {
        Ok(Self {
            url: record.default_download_url()?,
            is_transcoding: false,
            extension: None,
            can_play: false,
            play_session_id: None,
        })
    }
}

/// Derive the profile used for downloads from the playback profile.
///
/// Segmented streaming cannot be saved to a single file, so HLS targets are
/// dropped, and subtitles are burned in.
pub fn to_download_profile(profile: &DeviceProfile) -> DeviceProfile {
    DeviceProfile {
        name: profile
            .name
            .as_ref()
            .map(|n| n.replace(" Native Profile", " Download Profile")),
        transcoding_profiles: profile
            .transcoding_profiles
            .iter()
            .filter(|p| p.protocol != Some(MediaStreamProtocol::Hls))
            .cloned()
            .collect(),
        subtitle_profiles: vec![SubtitleProfile {
            method: SubtitleDeliveryMethod::Encode,
            format: None,
        }],
        extra: profile.extra.clone(),
    }
}

pub struct MediaSourceNegotiator {
    api: Arc<dyn MediaServerApi>,
    profile: DeviceProfile,
    device_id: String,
}

impl MediaSourceNegotiator {
    /// `profile` is the device's playback profile; the download variant is
    /// derived here once.
    pub fn new(
        api: Arc<dyn MediaServerApi>,
        profile: &DeviceProfile,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            profile: to_download_profile(profile),
            device_id: device_id.into(),
        }
    }

    pub fn download_profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub async fn negotiate(
        &self,
        record: &DownloadRecord,
    ) -> Result<MediaSourceDecision, MediaDlError> {
        let item = record.item();
        if !item.is_streamable() {
            return MediaSourceDecision::fallback(record);
        }

        let session = ServerSession::from_record(record);
        let info = self
            .api
            .get_playback_info(&session, &item.id, &self.profile)
            .await?;

        let Some(source) = info.sources().first() else {
            warn!(
                "No media sources for {}; falling back to file download",
                record.key()
            );
            return MediaSourceDecision::fallback(record);
        };

        let play_session_id = info
            .play_session_id
            .clone()
            .unwrap_or_else(|| record.session_id.clone());

        if source.supports_direct_play || source.supports_direct_stream {
            debug!("Media source for {} will direct play", record.key());
            let extension = container_extension(source.container.as_deref());
            let url = self.direct_stream_url(
                record,
                source,
                extension.as_deref().unwrap_or_default(),
                &play_session_id,
            )?;

            return Ok(MediaSourceDecision {
                url,
                is_transcoding: false,
                extension,
                can_play: true,
                play_session_id: Some(play_session_id),
            });
        }

        if let Some(transcoding_url) = source
            .transcoding_url
            .as_deref()
            .filter(|_| source.supports_transcoding)
        {
            debug!("Media source for {} will transcode", record.key());
            return Ok(MediaSourceDecision {
                url: resolve_server_url(record.server_base(), transcoding_url)?,
                is_transcoding: true,
                extension: container_extension(source.transcoding_container.as_deref()),
                can_play: true,
                play_session_id: Some(play_session_id),
            });
        }

        warn!(
            "Incompatible media source for {}; falling back to file download",
            record.key()
        );
        Ok(MediaSourceDecision {
            play_session_id: Some(play_session_id),
            ..MediaSourceDecision::fallback(record)?
        })
    }

    fn direct_stream_url(
        &self,
        record: &DownloadRecord,
        source: &MediaSourceInfo,
        extension: &str,
        play_session_id: &str,
    ) -> Result<Url, MediaDlError> {
        let item = record.item();
        let endpoint = match item.media_type {
            Some(MediaType::Video) => "Videos",
            _ => "Audio",
        };

        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("deviceId", &self.device_id)
            .append_pair("ApiKey", record.api_key())
            .append_pair("playSessionId", play_session_id)
            .append_pair("mediaSourceId", source.id.as_deref().unwrap_or_default())
            .append_pair("Tag", source.etag.as_deref().unwrap_or_default())
            .append_pair("Static", "true")
            .finish();

        Ok(Url::parse(&format!(
            "{}/{}/{}/stream{}?{}",
            record.server_base(),
            endpoint,
            urlencoding::encode(&item.id),
            extension,
            query
        ))?)
    }
}

/// Container name as reported by the server, with a leading dot.
///
/// Only the first entry of a comma separated list is used, and only when it
/// is a plain ASCII alphanumeric token.
fn container_extension(container: Option<&str>) -> Option<String> {
    let token = container?.split(',').next()?.trim();
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        if !token.is_empty() {
            warn!("Ignoring unusable container {:?}", token);
        }
        return None;
    }
    Some(format!(".{}", token))
}

/// Resolve a server-provided URL, keeping any path prefix of the server base
fn resolve_server_url(base: &str, url: &str) -> Result<Url, MediaDlError> {
    match Url::parse(url) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Url::parse(&format!(
            "{}/{}",
            base,
            url.trim_start_matches('/')
        ))?),
        Err(e) => Err(e.into()),
    }
}

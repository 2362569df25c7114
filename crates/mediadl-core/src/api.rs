//! Remote media server API
//!
//! The engine only needs two calls: playback info for negotiation and the
//! stopped report that releases a server-side transcode.

use crate::error::MediaDlError;
use crate::record::DownloadRecord;
use async_trait::async_trait;
use mediadl_types::{
    DeviceProfile, PlaybackInfoRequest, PlaybackInfoResponse, PlaybackStopInfo, Settings,
};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

/// Connection details for one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    pub base_url: String,
    pub api_key: String,
}

impl ServerSession {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_record(record: &DownloadRecord) -> Self {
        Self::new(record.server_url(), record.api_key())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Remote media-info and playstate calls
#[async_trait]
pub trait MediaServerApi: Send + Sync {
    /// Ask the server how an item can be played with the given profile.
    /// An empty source list is a valid answer.
    async fn get_playback_info(
        &self,
        session: &ServerSession,
        item_id: &str,
        profile: &DeviceProfile,
    ) -> Result<PlaybackInfoResponse, MediaDlError>;

    /// Tell the server a playback session (a transcoded download) has ended
    async fn report_playback_stopped(
        &self,
        session: &ServerSession,
        info: &PlaybackStopInfo,
    ) -> Result<(), MediaDlError>;
}

/// Identity of this client as sent in the authorization header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client: String,
    pub device: String,
    pub device_id: String,
    pub version: String,
}

impl ClientInfo {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            client: settings.client_name.clone(),
            device: settings.device_name.clone(),
            device_id: settings.device_id.clone(),
            version: settings.client_version.clone(),
        }
    }

    pub fn authorization(&self, token: &str) -> String {
        format!(
            "MediaBrowser Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\", Token=\"{}\"",
            urlencoding::encode(&self.client),
            urlencoding::encode(&self.device),
            urlencoding::encode(&self.device_id),
            urlencoding::encode(&self.version),
            urlencoding::encode(token),
        )
    }
}

/// [`MediaServerApi`] over HTTP
pub struct HttpMediaServer {
    client: Client,
    info: ClientInfo,
}

impl HttpMediaServer {
    pub fn new(info: ClientInfo) -> Result<Self, MediaDlError> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", info.client, info.version))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| MediaDlError::Unknown(e.to_string()))?;

        Ok(Self { client, info })
    }

    async fn check(response: Response) -> Result<Response, MediaDlError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(MediaDlError::ServerError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MediaServerApi for HttpMediaServer {
    async fn get_playback_info(
        &self,
        session: &ServerSession,
        item_id: &str,
        profile: &DeviceProfile,
    ) -> Result<PlaybackInfoResponse, MediaDlError> {
        let url = session.endpoint(&format!(
            "Items/{}/PlaybackInfo",
            urlencoding::encode(item_id)
        ));
        debug!("Requesting playback info: {}", url);

        let body = PlaybackInfoRequest {
            device_profile: profile.clone(),
        };
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.info.authorization(&session.api_key))
            .json(&body)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn report_playback_stopped(
        &self,
        session: &ServerSession,
        info: &PlaybackStopInfo,
    ) -> Result<(), MediaDlError> {
        let url = session.endpoint("Sessions/Playing/Stopped");
        debug!("Reporting playback stopped for {}", info.item_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.info.authorization(&session.api_key))
            .json(info)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

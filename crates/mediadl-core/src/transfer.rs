//! File transfer - streams a URL to a local file

use crate::error::MediaDlError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

/// Called with `(bytes_written, total_bytes)` as data arrives
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Download `url` to `destination`, returning the number of bytes written.
    /// The destination's directory must exist.
    async fn download_to_file(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, MediaDlError>;
}

/// [`Transfer`] over HTTP with reqwest.
///
/// Bytes go to a `.part` file next to the destination, which is renamed
/// into place once the body has been fully written.
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(user_agent: &str) -> Result<Self, MediaDlError> {
        // No overall timeout: media files can take a long time to arrive
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MediaDlError::Unknown(e.to_string()))?;

        Ok(Self { client })
    }

    async fn write_body(
        &self,
        url: &Url,
        part_path: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, MediaDlError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaDlError::ServerError {
                status: status.as_u16(),
                message: format!("Failed to download {}", url.path()),
            });
        }

        let total = response.content_length();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(part_path)
            .await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(callback) = &on_progress {
                callback(written, total);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn download_to_file(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64, MediaDlError> {
        let part = part_path(destination);
        debug!("Downloading {} to {}", url, part.display());

        match self.write_body(url, &part, on_progress).await {
            Ok(written) => {
                tokio::fs::rename(&part, destination).await?;
                info!("Saved {} ({} bytes)", destination.display(), written);
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_download_to_file() {
        let body = vec![7u8; 64 * 1024];
        let (base, request) = serve_once(200, body.clone()).await;
        let url = Url::parse(&format!("{}/Items/item-id/Download", base)).unwrap();

        let dir = tempdir().unwrap();
        let destination = dir.path().join("title (2025).mkv");
        let seen = Arc::new(AtomicU64::new(0));
        let progress: ProgressFn = {
            let seen = seen.clone();
            Arc::new(move |written, _| seen.store(written, Ordering::SeqCst))
        };

        let transfer = HttpTransfer::new("mediadl-test").unwrap();
        let written = transfer
            .download_to_file(&url, &destination, Some(progress))
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(seen.load(Ordering::SeqCst), body.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), body);
        assert!(!part_path(&destination).exists());
        assert!(request
            .await
            .unwrap()
            .starts_with("GET /Items/item-id/Download "));
    }

    #[tokio::test]
    async fn test_error_status_leaves_no_file() {
        let (base, _request) = serve_once(404, b"not found".to_vec()).await;
        let url = Url::parse(&format!("{}/missing", base)).unwrap();

        let dir = tempdir().unwrap();
        let destination = dir.path().join("missing.mkv");

        let transfer = HttpTransfer::new("mediadl-test").unwrap();
        let result = transfer.download_to_file(&url, &destination, None).await;

        assert!(matches!(
            result,
            Err(MediaDlError::ServerError { status: 404, .. })
        ));
        assert!(!destination.exists());
        assert!(!part_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let (base, _request) = serve_once(200, b"data".to_vec()).await;
        let url = Url::parse(&format!("{}/file", base)).unwrap();

        let dir = tempdir().unwrap();
        let destination = dir.path().join("no/such/dir/file.mkv");

        let transfer = HttpTransfer::new("mediadl-test").unwrap();
        assert!(transfer
            .download_to_file(&url, &destination, None)
            .await
            .is_err());
    }
}

//! In-crate fakes shared by the unit tests

use crate::alert::Alerter;
use crate::api::{MediaServerApi, ServerSession};
use crate::error::MediaDlError;
use crate::record::DownloadRecord;
use crate::store::{DownloadStore, MemoryStore};
use crate::transfer::{ProgressFn, Transfer};
use async_trait::async_trait;
use mediadl_types::{
    Alert, DeviceProfile, MediaItem, MediaType, PlaybackInfoResponse, PlaybackStopInfo,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use url::Url;

/// Record on `server-id` named after its item id
pub fn record_for(item_id: &str, media_type: Option<MediaType>) -> DownloadRecord {
    let item = MediaItem {
        name: Some(item_id.to_string()),
        media_type,
        ..MediaItem::new(item_id, "server-id")
    };
    DownloadRecord::new(
        item,
        "https://example.com/",
        "api-key",
        format!("{}.mkv", item_id),
        format!("Items/{}/Download", item_id),
    )
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// HTTP responder
// ============================================================================

/// Answer a single HTTP request with `status` and `body`.
///
/// Returns the base URL and a handle resolving to the raw request text.
pub async fn serve_once(status: u16, body: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            reason(status),
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), handle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ============================================================================
// Collaborator fakes
// ============================================================================

#[derive(Default)]
pub struct FakeApi {
    pub response: Mutex<PlaybackInfoResponse>,
    pub info_calls: AtomicUsize,
    pub fail_info: AtomicBool,
    pub fail_stop: AtomicBool,
    pub stopped: Mutex<Vec<PlaybackStopInfo>>,
}

#[async_trait]
impl MediaServerApi for FakeApi {
    async fn get_playback_info(
        &self,
        _session: &ServerSession,
        _item_id: &str,
        _profile: &DeviceProfile,
    ) -> Result<PlaybackInfoResponse, MediaDlError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_info.load(Ordering::SeqCst) {
            return Err(MediaDlError::ServerError {
                status: 500,
                message: "playback info".into(),
            });
        }
        Ok(self.response.lock().clone())
    }

    async fn report_playback_stopped(
        &self,
        _session: &ServerSession,
        info: &PlaybackStopInfo,
    ) -> Result<(), MediaDlError> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(MediaDlError::ServerError {
                status: 500,
                message: "stopped".into(),
            });
        }
        self.stopped.lock().push(info.clone());
        Ok(())
    }
}

/// Transfer that records URLs and can hold transfers open until released
#[derive(Default)]
pub struct FakeTransfer {
    started: Mutex<Vec<Url>>,
    gate: Option<Semaphore>,
    fail: bool,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeTransfer {
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Let `n` held transfers finish
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn started(&self) -> Vec<Url> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn download_to_file(
        &self,
        url: &Url,
        _destination: &Path,
        _on_progress: Option<ProgressFn>,
    ) -> Result<u64, MediaDlError> {
        self.started.lock().push(url.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(MediaDlError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset mid-transfer",
            )));
        }
        Ok(0)
    }
}

#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerter {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl Alerter for RecordingAlerter {
    fn alert(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Store wrapper that records every upsert
pub struct CountingStore {
    inner: MemoryStore,
    upserts: Mutex<Vec<DownloadRecord>>,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            upserts: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped store, for writes that should not be counted
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn upserts(&self) -> Vec<DownloadRecord> {
        self.upserts.lock().clone()
    }
}

#[async_trait]
impl DownloadStore for CountingStore {
    async fn get_all(&self) -> Result<Vec<DownloadRecord>, MediaDlError> {
        self.inner.get_all().await
    }

    async fn get(&self, key: &str) -> Result<Option<DownloadRecord>, MediaDlError> {
        self.inner.get(key).await
    }

    async fn upsert(&self, record: &DownloadRecord) -> Result<(), MediaDlError> {
        self.upserts.lock().push(record.clone());
        self.inner.upsert(record).await
    }

    async fn delete(&self, key: &str) -> Result<bool, MediaDlError> {
        self.inner.delete(key).await
    }
}

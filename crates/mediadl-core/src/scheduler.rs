//! Download scheduler - drains pending downloads under a fixed concurrency cap
//!
//! A single admission loop waits on a wake signal. Each pass reads the store,
//! picks pending records that are not already in flight (in store order, up
//! to the free slots) and spawns one attempt per record. A finished attempt
//! releases its slot and wakes the loop, so freed capacity is backfilled
//! until nothing is pending.

use crate::alert::Alerter;
use crate::api::{MediaServerApi, ServerSession};
use crate::error::MediaDlError;
use crate::fs::{ensure_path_exists, FileSystem};
use crate::negotiator::{MediaSourceDecision, MediaSourceNegotiator};
use crate::record::DownloadRecord;
use crate::store::DownloadStore;
use crate::transfer::Transfer;
use mediadl_types::{Alert, CoreEvent, DownloadStatus, PlaybackStopInfo};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum number of downloads transferring at once
pub const CONCURRENCY_LIMIT: usize = 3;

/// Settings the scheduler reads at the start of every attempt
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub download_root: PathBuf,
    /// Negotiate a playable source for audio and video
    pub transcoded_downloads: bool,
}

/// Collaborators the scheduler drives
pub struct SchedulerDeps {
    pub store: Arc<dyn DownloadStore>,
    pub api: Arc<dyn MediaServerApi>,
    pub negotiator: Arc<MediaSourceNegotiator>,
    pub transfer: Arc<dyn Transfer>,
    pub fs: Arc<dyn FileSystem>,
    pub alerter: Arc<dyn Alerter>,
}

pub struct DownloadScheduler {
    deps: SchedulerDeps,
    config: parking_lot::RwLock<SchedulerConfig>,
    event_tx: broadcast::Sender<CoreEvent>,
    /// Keys with an attempt running; held across each admission pass
    in_flight: Mutex<HashSet<String>>,
    in_flight_count: watch::Sender<usize>,
    wake: Notify,
    running: parking_lot::Mutex<Option<CancellationToken>>,
}

impl DownloadScheduler {
    pub fn new(
        deps: SchedulerDeps,
        config: SchedulerConfig,
        event_tx: broadcast::Sender<CoreEvent>,
    ) -> Arc<Self> {
        let (in_flight_count, _) = watch::channel(0);
        Arc::new(Self {
            deps,
            config: parking_lot::RwLock::new(config),
            event_tx,
            in_flight: Mutex::new(HashSet::new()),
            in_flight_count,
            wake: Notify::new(),
            running: parking_lot::Mutex::new(None),
        })
    }

    pub fn set_config(&self, config: SchedulerConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config.read().clone()
    }

    /// Start the admission loop. Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let token = {
            let mut running = self.running.lock();
            if running.is_some() {
                debug!("Scheduler already running");
                return None;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        info!("Starting download scheduler");
        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move {
            scheduler.run(token).await;
        }))
    }

    /// Stop admitting new downloads. Transfers already running finish.
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            info!("Stopping download scheduler");
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Signal that the set of pending records may have changed
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Number of attempts currently running
    pub fn in_flight(&self) -> usize {
        *self.in_flight_count.borrow()
    }

    /// Remove a record from the store unless an attempt for it is running.
    ///
    /// Holds the in-flight set, so the record cannot be admitted meanwhile.
    pub async fn remove_idle(&self, key: &str) -> Result<bool, MediaDlError> {
        let in_flight = self.in_flight.lock().await;
        if in_flight.contains(key) {
            return Err(MediaDlError::InvalidOperation(format!(
                "Download {} is in progress",
                key
            )));
        }
        self.deps.store.delete(key).await
    }

    /// Wait until nothing is in flight and nothing is pending.
    ///
    /// Only returns while the scheduler is running or when no work is left.
    pub async fn wait_idle(&self) -> Result<(), MediaDlError> {
        let mut count = self.in_flight_count.subscribe();
        loop {
            let current = *count.borrow_and_update();
            if current == 0 && !self.has_pending().await? {
                return Ok(());
            }
            count
                .changed()
                .await
                .map_err(|e| MediaDlError::Unknown(e.to_string()))?;
        }
    }

    async fn has_pending(&self) -> Result<bool, MediaDlError> {
        Ok(self
            .deps
            .store
            .get_all()
            .await?
            .iter()
            .any(|r| r.status.is_schedulable()))
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            match self.admit().await {
                Ok(0) => {}
                Ok(started) => debug!("Admitted {} downloads", started),
                Err(e) => error!("Admission pass failed: {}", e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.wake.notified() => {}
            }
        }
        info!("Download scheduler stopped");
    }

    /// One admission pass. Returns the number of attempts started.
    async fn admit(self: &Arc<Self>) -> Result<usize, MediaDlError> {
        // Holding the set while reading the store means an attempt cannot
        // settle between the snapshot and the selection
        let mut in_flight = self.in_flight.lock().await;

        let available = CONCURRENCY_LIMIT.saturating_sub(in_flight.len());
        if available == 0 {
            return Ok(0);
        }

        let selected: Vec<DownloadRecord> = self
            .deps
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|r| r.status.is_schedulable() && !in_flight.contains(&r.key()))
            .take(available)
            .collect();

        for record in &selected {
            in_flight.insert(record.key());
        }
        self.in_flight_count.send_replace(in_flight.len());
        drop(in_flight);

        let started = selected.len();
        for record in selected {
            self.spawn_attempt(record);
        }
        Ok(started)
    }

    fn spawn_attempt(self: &Arc<Self>, record: DownloadRecord) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let key = record.key();
            scheduler.run_attempt(record).await;

            let mut in_flight = scheduler.in_flight.lock().await;
            in_flight.remove(&key);
            scheduler.in_flight_count.send_replace(in_flight.len());
            drop(in_flight);

            scheduler.wake();
        });
    }

    /// Run one download attempt to a terminal state and persist it
    async fn run_attempt(&self, mut record: DownloadRecord) {
        let key = record.key();
        info!(
            "Downloading \"{}\" ({})",
            record.title().or(record.item().path.as_deref()).unwrap_or_default(),
            key
        );

        match self.attempt(&mut record).await {
            Ok(decision) => {
                record.status = DownloadStatus::Complete;
                info!("Download {} complete", key);
                if decision.is_transcoding {
                    self.report_stopped(&record).await;
                }
            }
            Err(e) => {
                error!("Download {} failed: {}", key, e);
                record.status = DownloadStatus::Failed;
                self.deps
                    .alerter
                    .alert(Alert::download_failed(record.title().map(str::to_string)));
            }
        }

        if let Err(e) = self.deps.store.upsert(&record).await {
            error!("Failed to save download {}: {}", key, e);
        }
        self.emit_status(&record);
    }

    async fn attempt(
        &self,
        record: &mut DownloadRecord,
    ) -> Result<MediaSourceDecision, MediaDlError> {
        record.status = DownloadStatus::Downloading;
        self.deps.store.upsert(record).await?;
        self.emit_status(record);

        let config = self.config();
        ensure_path_exists(
            self.deps.fs.as_ref(),
            &record.local_dir(&config.download_root),
        )
        .await?;

        let decision = if config.transcoded_downloads && record.item().is_streamable() {
            self.deps.negotiator.negotiate(record).await?
        } else {
            MediaSourceDecision::fallback(record)?
        };
        record.apply_decision(&decision);

        let destination = record.local_file(&config.download_root);
        debug!("Downloading {} from {}", record.key(), decision.url);
        self.deps
            .transfer
            .download_to_file(&decision.url, &destination, None)
            .await?;

        Ok(decision)
    }

    /// Let the server release the transcode. Failures are only logged.
    async fn report_stopped(&self, record: &DownloadRecord) {
        let info = PlaybackStopInfo {
            item_id: record.item().id.clone(),
            play_session_id: Some(record.session_id.clone()),
            position_ticks: record.item().playback_position_ticks(),
        };
        debug!("Reporting transcoded download stopped: {}", record.session_id);

        if let Err(e) = self
            .deps
            .api
            .report_playback_stopped(&ServerSession::from_record(record), &info)
            .await
        {
            warn!("Failed reporting download {} stopped: {}", record.key(), e);
        }
    }

    fn emit_status(&self, record: &DownloadRecord) {
        let _ = self.event_tx.send(CoreEvent::DownloadStatusChanged {
            key: record.key(),
            status: record.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{
        record_for, wait_until, CountingStore, FakeApi, FakeTransfer, RecordingAlerter,
    };
    use mediadl_types::{
        AlertKind, DeviceProfile, MediaSourceInfo, MediaType, PlaybackInfoResponse,
    };
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        scheduler: Arc<DownloadScheduler>,
        store: Arc<CountingStore>,
        api: Arc<FakeApi>,
        transfer: Arc<FakeTransfer>,
        alerter: Arc<RecordingAlerter>,
        root: TempDir,
    }

    fn harness(transfer: FakeTransfer, transcoded_downloads: bool) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(CountingStore::new(MemoryStore::new()));
        let api = Arc::new(FakeApi::default());
        let transfer = Arc::new(transfer);
        let alerter = Arc::new(RecordingAlerter::default());
        let (event_tx, _) = broadcast::channel(64);

        let negotiator = Arc::new(MediaSourceNegotiator::new(
            api.clone(),
            &DeviceProfile::default(),
            "device-id",
        ));
        let scheduler = DownloadScheduler::new(
            SchedulerDeps {
                store: store.clone(),
                api: api.clone(),
                negotiator,
                transfer: transfer.clone(),
                fs: Arc::new(crate::fs::TokioFileSystem),
                alerter: alerter.clone(),
            },
            SchedulerConfig {
                download_root: root.path().to_path_buf(),
                transcoded_downloads,
            },
            event_tx,
        );

        Harness {
            scheduler,
            store,
            api,
            transfer,
            alerter,
            root,
        }
    }

    async fn seed(store: &CountingStore, ids: &[&str]) {
        for id in ids {
            store
                .inner()
                .upsert(&record_for(id, Some(MediaType::Video)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_completes_pending_downloads() {
        let h = harness(FakeTransfer::default(), false);
        seed(&h.store, &["a", "b"]).await;

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();

        for record in h.store.get_all().await.unwrap() {
            assert_eq!(record.status, DownloadStatus::Complete);
            assert!(!record.can_play);
            assert!(record.local_dir(h.root.path()).is_dir());
        }
        assert_eq!(h.transfer.started().len(), 2);
        assert!(h.alerter.alerts().is_empty());
        assert_eq!(h.scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_respects_concurrency_limit() {
        let h = harness(FakeTransfer::gated(), false);
        seed(&h.store, &["a", "b", "c", "d", "e"]).await;

        h.scheduler.start().unwrap();
        wait_until(|| h.transfer.started().len() == CONCURRENCY_LIMIT).await;

        // Nothing beyond the cap starts while all slots are busy
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.transfer.started().len(), CONCURRENCY_LIMIT);
        assert_eq!(h.scheduler.in_flight(), CONCURRENCY_LIMIT);

        // One completion admits exactly one more
        h.transfer.release(1);
        wait_until(|| h.transfer.started().len() == 4).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.transfer.started().len(), 4);

        h.transfer.release(10);
        h.scheduler.wait_idle().await.unwrap();

        assert_eq!(h.transfer.started().len(), 5);
        assert_eq!(h.transfer.max_active.load(Ordering::SeqCst), CONCURRENCY_LIMIT);

        // Admission follows store order
        let started: Vec<String> = h
            .transfer
            .started()
            .iter()
            .map(|u| u.path().to_string())
            .collect();
        assert_eq!(started[3], "/Items/d/Download");
        assert_eq!(started[4], "/Items/e/Download");
    }

    #[tokio::test]
    async fn test_in_flight_record_is_not_readmitted() {
        let h = harness(FakeTransfer::gated(), false);
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        wait_until(|| h.transfer.started().len() == 1).await;

        // Flip it back to pending while it is still transferring
        let mut record = h.store.get("server-id_a").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Downloading);
        record.status = DownloadStatus::Pending;
        h.store.inner().upsert(&record).await.unwrap();
        h.scheduler.wake();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.transfer.started().len(), 1);

        h.transfer.release(1);
        h.scheduler.wait_idle().await.unwrap();

        assert_eq!(h.transfer.started().len(), 1);
        let record = h.store.get("server-id_a").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Complete);
    }

    #[tokio::test]
    async fn test_failed_transfer_marks_failed_and_alerts() {
        let h = harness(FakeTransfer::failing(), false);
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();

        let record = h.store.get("server-id_a").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Failed);

        let failed_writes: Vec<DownloadRecord> = h
            .store
            .upserts()
            .into_iter()
            .filter(|r| r.status == DownloadStatus::Failed)
            .collect();
        assert_eq!(failed_writes.len(), 1);
        assert_eq!(failed_writes[0].key(), "server-id_a");

        let alerts = h.alerter.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::DownloadFailed);
        assert_eq!(alerts[0].item_name.as_deref(), Some("a"));

        // Failed records are not retried
        h.scheduler.wake();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.transfer.started().len(), 1);
    }

    #[tokio::test]
    async fn test_status_written_before_transfer() {
        let h = harness(FakeTransfer::gated(), false);
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        wait_until(|| h.transfer.started().len() == 1).await;

        let writes = h.store.upserts();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].status, DownloadStatus::Downloading);

        h.transfer.release(1);
        h.scheduler.wait_idle().await.unwrap();
        assert_eq!(h.store.upserts().len(), 2);
    }

    fn transcoding_response() -> PlaybackInfoResponse {
        PlaybackInfoResponse {
            media_sources: Some(vec![MediaSourceInfo {
                supports_transcoding: true,
                transcoding_url: Some("/videos/a/master.mp4".into()),
                transcoding_container: Some("mp4".into()),
                ..Default::default()
            }]),
            play_session_id: Some("play-session".into()),
        }
    }

    #[tokio::test]
    async fn test_transcoded_download_reports_stopped() {
        let h = harness(FakeTransfer::default(), true);
        *h.api.response.lock() = transcoding_response();
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();

        let record = h.store.get("server-id_a").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Complete);
        assert!(record.can_play);
        assert_eq!(record.extension.as_deref(), Some(".mp4"));
        assert_eq!(record.session_id, "play-session");
        assert_eq!(
            h.transfer.started()[0].as_str(),
            "https://example.com/videos/a/master.mp4"
        );

        let stopped = h.api.stopped.lock().clone();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].item_id, "a");
        assert_eq!(stopped[0].play_session_id.as_deref(), Some("play-session"));
    }

    #[tokio::test]
    async fn test_stop_report_failure_is_swallowed() {
        let h = harness(FakeTransfer::default(), true);
        *h.api.response.lock() = transcoding_response();
        h.api.fail_stop.store(true, Ordering::SeqCst);
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();

        let record = h.store.get("server-id_a").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Complete);
        assert!(h.alerter.alerts().is_empty());
        assert_eq!(
            h.store.upserts().last().map(|r| r.status),
            Some(DownloadStatus::Complete)
        );
    }

    #[tokio::test]
    async fn test_negotiation_skipped_when_disabled() {
        let h = harness(FakeTransfer::default(), false);
        *h.api.response.lock() = transcoding_response();
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();

        assert_eq!(h.api.info_calls.load(Ordering::SeqCst), 0);
        assert!(h.api.stopped.lock().is_empty());
        assert_eq!(
            h.transfer.started()[0].as_str(),
            "https://example.com/Items/a/Download"
        );
    }

    #[tokio::test]
    async fn test_negotiation_failure_fails_download() {
        let h = harness(FakeTransfer::default(), true);
        h.api.fail_info.store(true, Ordering::SeqCst);
        seed(&h.store, &["a"]).await;

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();

        let record = h.store.get("server-id_a").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Failed);
        assert!(h.transfer.started().is_empty());
        assert_eq!(h.alerter.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_and_stop() {
        let h = harness(FakeTransfer::default(), false);

        let handle = h.scheduler.start().unwrap();
        assert!(h.scheduler.start().is_none());
        assert!(h.scheduler.is_running());

        h.scheduler.stop();
        handle.await.unwrap();
        assert!(!h.scheduler.is_running());

        // Pending work waits until the scheduler runs again
        seed(&h.store, &["a"]).await;
        h.scheduler.wake();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(h.transfer.started().is_empty());

        h.scheduler.start().unwrap();
        h.scheduler.wait_idle().await.unwrap();
        assert_eq!(h.transfer.started().len(), 1);
    }
}

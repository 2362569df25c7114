//! mediadl core - offline download engine
//!
//! This crate saves media server items for offline playback. It negotiates a
//! playable source with the server, lays files out under a deterministic
//! directory structure and tracks each download's lifecycle.

pub mod alert;
pub mod api;
mod error;
pub mod fs;
pub mod migration;
pub mod naming;
pub mod negotiator;
pub mod record;
pub mod scheduler;
mod storage;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use error::*;
pub use record::DownloadRecord;
pub use scheduler::{DownloadScheduler, CONCURRENCY_LIMIT};
pub use storage::*;

use alert::{Alerter, EventAlerter};
use api::{ClientInfo, HttpMediaServer, MediaServerApi};
use fs::{remove_with_empty_parents, FileSystem, TokioFileSystem};
use mediadl_types::{Alert, CoreEvent, DeviceProfile, DownloadStatus, Settings};
use negotiator::MediaSourceNegotiator;
use scheduler::{SchedulerConfig, SchedulerDeps};
use std::path::PathBuf;
use std::sync::Arc;
use store::{DownloadStore, SqliteStore};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use transfer::{HttpTransfer, Transfer};
use url::Url;

/// Collaborators the core is assembled from
pub struct CoreParts {
    pub store: Arc<dyn DownloadStore>,
    pub api: Arc<dyn MediaServerApi>,
    pub transfer: Arc<dyn Transfer>,
    pub fs: Arc<dyn FileSystem>,
}

/// The main mediadl core instance
#[derive(Clone)]
pub struct MediaDlCore {
    settings: Arc<RwLock<Settings>>,
    storage: Storage,
    store: Arc<dyn DownloadStore>,
    fs: Arc<dyn FileSystem>,
    alerter: Arc<dyn Alerter>,
    negotiator: Arc<MediaSourceNegotiator>,
    scheduler: Arc<DownloadScheduler>,
    event_tx: broadcast::Sender<CoreEvent>,
}

fn scheduler_config(settings: &Settings) -> SchedulerConfig {
    SchedulerConfig {
        download_root: settings.download_root.clone(),
        transcoded_downloads: settings.experimental_transcoded_downloads,
    }
}

impl MediaDlCore {
    /// Create a core backed by the files in `data_dir`
    pub async fn new(data_dir: PathBuf) -> Result<Self, MediaDlError> {
        let storage = Storage::new(data_dir).await?;
        let settings = storage.load_settings().await?;

        let client = ClientInfo::from_settings(&settings);
        let user_agent = format!("{}/{}", client.client, client.version);
        let parts = CoreParts {
            store: Arc::new(SqliteStore::new(storage.database_path()).await?),
            api: Arc::new(HttpMediaServer::new(client)?),
            transfer: Arc::new(HttpTransfer::new(&user_agent)?),
            fs: Arc::new(TokioFileSystem),
        };

        Self::with_parts(storage, settings, parts).await
    }

    /// Assemble a core from explicit collaborators
    pub async fn with_parts(
        storage: Storage,
        settings: Settings,
        parts: CoreParts,
    ) -> Result<Self, MediaDlError> {
        let profile: DeviceProfile = storage.load_device_profile().await?;
        let (event_tx, _) = broadcast::channel(1000);
        let alerter: Arc<dyn Alerter> = Arc::new(EventAlerter::new(event_tx.clone()));

        let negotiator = Arc::new(MediaSourceNegotiator::new(
            parts.api.clone(),
            &profile,
            settings.device_id.clone(),
        ));
        let scheduler = DownloadScheduler::new(
            SchedulerDeps {
                store: parts.store.clone(),
                api: parts.api,
                negotiator: negotiator.clone(),
                transfer: parts.transfer,
                fs: parts.fs.clone(),
                alerter: alerter.clone(),
            },
            scheduler_config(&settings),
            event_tx.clone(),
        );

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            storage,
            store: parts.store,
            fs: parts.fs,
            alerter,
            negotiator,
            scheduler,
            event_tx,
        })
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn download_root(&self) -> PathBuf {
        self.settings.read().await.download_root.clone()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Start draining pending downloads
    pub fn enable(&self) -> Option<JoinHandle<()>> {
        self.scheduler.start()
    }

    /// Stop admitting downloads; running transfers finish
    pub fn disable(&self) {
        self.scheduler.stop();
    }

    pub fn is_enabled(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Wait until every pending download has settled
    pub async fn wait_idle(&self) -> Result<(), MediaDlError> {
        self.scheduler.wait_idle().await
    }

    // ========================================================================
    // Download Operations
    // ========================================================================

    /// Add a download. A record with the same key is replaced.
    pub async fn add_download(&self, record: DownloadRecord) -> Result<DownloadRecord, MediaDlError> {
        self.store.upsert(&record).await?;
        info!("Added download {}", record.key());

        self.emit(CoreEvent::DownloadAdded {
            key: record.key(),
            title: record.title().map(str::to_string),
        });
        self.scheduler.wake();
        Ok(record)
    }

    pub async fn get_all_downloads(&self) -> Result<Vec<DownloadRecord>, MediaDlError> {
        self.store.get_all().await
    }

    /// Number of downloads per status
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>, MediaDlError> {
        self.store.count_by_status().await
    }

    pub async fn get_download(&self, key: &str) -> Result<DownloadRecord, MediaDlError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| MediaDlError::NotFound(key.to_string()))
    }

    async fn save(&self, record: &DownloadRecord) -> Result<(), MediaDlError> {
        self.store.upsert(record).await?;
        self.emit(CoreEvent::DownloadStatusChanged {
            key: record.key(),
            status: record.status,
        });
        Ok(())
    }

    /// Verify a completed download is still on disk.
    ///
    /// A complete download whose file is gone becomes `Missing` and raises an
    /// alert; a missing one whose file is back becomes `Complete` again.
    /// Presence is the only check made.
    pub async fn check_download(&self, key: &str) -> Result<DownloadRecord, MediaDlError> {
        let mut record = self.get_download(key).await?;
        if !matches!(record.status, DownloadStatus::Complete | DownloadStatus::Missing) {
            return Ok(record);
        }

        let path = record.local_file(&self.download_root().await);
        let exists = self.fs.exists(&path).await;

        match (record.status, exists) {
            (DownloadStatus::Complete, false) => {
                warn!("Download {} is missing: {}", key, path.display());
                record.status = DownloadStatus::Missing;
                self.save(&record).await?;
                self.alerter
                    .alert(Alert::download_missing(record.title().map(str::to_string)));
            }
            (DownloadStatus::Missing, true) => {
                info!("Download {} is back", key);
                record.status = DownloadStatus::Complete;
                self.save(&record).await?;
            }
            (DownloadStatus::Missing, false) => {
                self.alerter
                    .alert(Alert::download_missing(record.title().map(str::to_string)));
            }
            _ => {}
        }
        Ok(record)
    }

    /// Check a download and return its file URI for playback, clearing the new flag
    pub async fn open_download(&self, key: &str) -> Result<Url, MediaDlError> {
        let mut record = self.check_download(key).await?;
        if !record.is_complete() {
            return Err(MediaDlError::InvalidOperation(format!(
                "Download {} is {}",
                key, record.status
            )));
        }

        if record.is_new {
            record.is_new = false;
            self.store.upsert(&record).await?;
        }
        record.file_uri(&self.download_root().await)
    }

    /// Clear the new flag of a download
    pub async fn mark_played(&self, key: &str) -> Result<DownloadRecord, MediaDlError> {
        let mut record = self.get_download(key).await?;
        if record.is_new {
            record.is_new = false;
            self.store.upsert(&record).await?;
        }
        Ok(record)
    }

    /// Mark completed downloads as seen once the list has been shown.
    /// Returns how many changed.
    pub async fn refresh_new_flags(&self) -> Result<usize, MediaDlError> {
        let mut changed = 0;
        for mut record in self.store.get_all().await? {
            if record.is_new && record.is_complete() {
                record.is_new = false;
                self.store.upsert(&record).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Delete a download's record, its file and any directories it leaves
    /// empty. Downloads that are transferring cannot be deleted.
    pub async fn delete_download(&self, key: &str) -> Result<(), MediaDlError> {
        let record = self.get_download(key).await?;
        let root = self.download_root().await;

        self.scheduler.remove_idle(key).await?;
        let removed =
            remove_with_empty_parents(self.fs.as_ref(), &record.local_file(&root), &root).await?;

        info!(
            "Deleted download {} ({} empty directories removed)",
            key, removed
        );
        self.emit(CoreEvent::DownloadRemoved {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Put a failed download back in the queue
    pub async fn requeue_download(&self, key: &str) -> Result<DownloadRecord, MediaDlError> {
        let mut record = self.get_download(key).await?;
        if record.status != DownloadStatus::Failed {
            return Err(MediaDlError::InvalidOperation(format!(
                "Only failed downloads can be requeued ({} is {})",
                key, record.status
            )));
        }

        record.status = DownloadStatus::Pending;
        self.save(&record).await?;
        self.scheduler.wake();
        Ok(record)
    }

    /// Import downloads exported by the legacy app store.
    ///
    /// Keys already present are left alone. Returns the number imported.
    pub async fn import_legacy(&self, json: &str) -> Result<usize, MediaDlError> {
        let mut imported = 0;
        for record in migration::import_legacy_store(json)? {
            if self.store.get(&record.key()).await?.is_some() {
                continue;
            }
            self.store.upsert(&record).await?;
            self.emit(CoreEvent::DownloadAdded {
                key: record.key(),
                title: record.title().map(str::to_string),
            });
            imported += 1;
        }

        if imported > 0 {
            self.scheduler.wake();
        }
        Ok(imported)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn get_settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), MediaDlError> {
        self.storage.save_settings(&settings).await?;
        self.scheduler.set_config(scheduler_config(&settings));
        *self.settings.write().await = settings;
        Ok(())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Profile sent to the server when negotiating downloads
    pub fn download_profile(&self) -> &DeviceProfile {
        self.negotiator.download_profile()
    }

    /// Save a device profile (the server's JSON shape). It is used from the
    /// next time the core is created.
    pub async fn import_device_profile(&self, json: &str) -> Result<DeviceProfile, MediaDlError> {
        let profile: DeviceProfile = serde_json::from_str(json)?;
        self.storage.save_device_profile(&profile).await?;
        info!("Saved device profile {:?}", profile.name);
        Ok(profile)
    }
}

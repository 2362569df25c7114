//! Normalization of persisted download records
//!
//! Every record read back from storage goes through [`migrate_value`] so the
//! rest of the engine only ever sees the current schema.

use crate::error::MediaDlError;
use crate::record::DownloadRecord;
use mediadl_types::{DownloadStatus, MediaItem};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

/// Schema version written with every record
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Flat record shape written by the previous app store (schema version 0)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDownloadRecord {
    pub item_id: String,
    pub server_id: String,
    pub server_url: String,
    pub api_key: String,
    #[serde(default)]
    pub title: Option<String>,
    pub filename: String,
    pub download_url: String,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default = "default_is_new")]
    pub is_new: bool,
}

fn default_is_new() -> bool {
    true
}

impl LegacyDownloadRecord {
    pub fn into_record(self) -> DownloadRecord {
        let item = MediaItem {
            name: self.title,
            ..MediaItem::new(self.item_id, self.server_id)
        };

        let mut record = DownloadRecord::legacy(
            item,
            self.server_url,
            self.api_key,
            self.filename,
            self.download_url,
        );
        if self.is_complete {
            record.status = DownloadStatus::Complete;
        }
        record.is_new = self.is_new;
        record
    }
}

/// Schema version of a persisted value; absent means legacy
pub fn schema_version(value: &Value) -> Result<u32, MediaDlError> {
    match value.get("schemaVersion") {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| MediaDlError::Serialization(format!("Invalid schemaVersion: {}", v))),
    }
}

/// Normalize a persisted record of any known version to the current schema
pub fn migrate_value(value: Value) -> Result<DownloadRecord, MediaDlError> {
    match schema_version(&value)? {
        0 => {
            let legacy: LegacyDownloadRecord = serde_json::from_value(value)?;
            debug!("Migrating legacy record {}_{}", legacy.server_id, legacy.item_id);
            Ok(legacy.into_record())
        }
        CURRENT_SCHEMA_VERSION => Ok(serde_json::from_value(value)?),
        other => Err(MediaDlError::Migration(other)),
    }
}

/// Import a legacy store export.
///
/// Accepts either the full `{"downloadStore": {"downloads": {...}}}` document
/// or the bare key-to-record map. Records come back ordered by key.
pub fn import_legacy_store(json: &str) -> Result<Vec<DownloadRecord>, MediaDlError> {
    let document: Value = serde_json::from_str(json)?;

    let downloads = document
        .get("downloadStore")
        .and_then(|store| store.get("downloads"))
        .unwrap_or(&document);

    let entries = downloads.as_object().ok_or_else(|| {
        MediaDlError::Serialization("Legacy downloads must be a JSON object".to_string())
    })?;

    let mut records = Vec::with_capacity(entries.len());
    for value in entries.values() {
        records.push(migrate_value(value.clone())?);
    }

    info!("Imported {} legacy downloads", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_json() -> Value {
        json!({
            "itemId": "item-id",
            "serverId": "server-id",
            "serverUrl": "https://example.com/",
            "apiKey": "api-key",
            "title": "title",
            "filename": "file name.mkv",
            "downloadUrl": "https://example.com/download",
            "isComplete": true,
            "isNew": false
        })
    }

    #[test]
    fn test_migrate_legacy_record() {
        let record = migrate_value(legacy_json()).unwrap();

        assert_eq!(record.key(), "server-id_item-id");
        assert_eq!(record.title(), Some("title"));
        assert_eq!(record.status, DownloadStatus::Complete);
        assert!(!record.is_new);
        assert_eq!(record.relative_path(), "server-id/item-id/");
        assert_eq!(record.local_filename(), "file name.mp4");
    }

    #[test]
    fn test_migrated_dotted_filename_keeps_its_stem() {
        let mut value = legacy_json();
        value["filename"] = json!("Some.Movie.2019.mkv");

        let record = migrate_value(value).unwrap();
        assert_eq!(record.status, DownloadStatus::Complete);
        assert_eq!(record.local_filename(), "Some.Movie.2019.mp4");
    }

    #[test]
    fn test_incomplete_legacy_record_is_pending() {
        let mut value = legacy_json();
        value["isComplete"] = json!(false);
        value.as_object_mut().unwrap().remove("isNew");

        let record = migrate_value(value).unwrap();
        assert_eq!(record.status, DownloadStatus::Pending);
        assert!(record.is_new);
    }

    #[test]
    fn test_current_record_passes_through() {
        let legacy = migrate_value(legacy_json()).unwrap();
        let value = serde_json::to_value(&legacy).unwrap();

        assert_eq!(schema_version(&value).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(migrate_value(value).unwrap(), legacy);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut value = legacy_json();
        value["schemaVersion"] = json!(42);

        assert!(matches!(
            migrate_value(value),
            Err(MediaDlError::Migration(42))
        ));
    }

    #[test]
    fn test_invalid_version_is_rejected() {
        let mut value = legacy_json();
        value["schemaVersion"] = json!("one");

        assert!(matches!(
            migrate_value(value),
            Err(MediaDlError::Serialization(_))
        ));
    }

    #[test]
    fn test_import_full_legacy_document() {
        let document = json!({
            "deviceId": "device",
            "downloadStore": {
                "downloads": {
                    "server-id_item-id": legacy_json()
                }
            }
        });

        let records = import_legacy_store(&document.to_string()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key(), "server-id_item-id");
    }

    #[test]
    fn test_import_bare_map() {
        let mut second = legacy_json();
        second["itemId"] = json!("other-id");
        let document = json!({ "a": legacy_json(), "b": second });

        let records = import_legacy_store(&document.to_string()).unwrap();
        let keys: Vec<String> = records.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec!["server-id_item-id", "server-id_other-id"]);
    }

    #[test]
    fn test_import_rejects_non_object() {
        assert!(import_legacy_store("[1, 2]").is_err());
        assert!(import_legacy_store("not json").is_err());
    }
}

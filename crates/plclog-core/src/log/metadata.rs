// # Run Metadata Store
//
// One JSON document per session, for offline auditing of the durable log.
//
// ## Lifecycle
//
// - Written once when a session starts (no end timestamp yet)
// - Rewritten once when the session ends, with duration and record count
//
// Writes are atomic (temp file, then rename). The engine treats every
// failure here as a warning: a missing or stale metadata file never blocks
// the primary log.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "session_id": "6f1c…",
//   "endpoint": "opc.tcp://127.0.0.2:4840",
//   "mode": "poll",
//   "variables": ["C_TOTAL", "SENSOR_METAL"],
//   "dropped_variables": [],
//   "start_timestamp": "2025-01-09T12:00:00Z",
//   "end_timestamp": "2025-01-09T12:05:00Z",
//   "duration_seconds": 300.0,
//   "total_records": 42
// }
// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::Error;
use crate::config::AcquisitionMode;

/// Metadata file format version
const METADATA_FILE_VERSION: &str = "1.0";

/// Audit record for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub session_id: Uuid,
    pub endpoint: String,
    pub mode: AcquisitionMode,
    /// Display names of the variables resolved for this session
    pub variables: Vec<String>,
    /// Identifiers that failed to resolve
    pub dropped_variables: Vec<String>,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    /// Entries appended to the durable log during this session
    pub total_records: u64,
}

impl RunMetadata {
    /// Metadata for a session that just started
    pub fn started(
        session_id: Uuid,
        endpoint: impl Into<String>,
        mode: AcquisitionMode,
        variables: Vec<String>,
        dropped_variables: Vec<String>,
        start_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            version: METADATA_FILE_VERSION.to_string(),
            session_id,
            endpoint: endpoint.into(),
            mode,
            variables,
            dropped_variables,
            start_timestamp,
            end_timestamp: None,
            duration_seconds: None,
            total_records: 0,
        }
    }

    /// Fill in the end of the session
    pub fn finish(&mut self, end_timestamp: DateTime<Utc>, total_records: u64) {
        let millis = (end_timestamp - self.start_timestamp).num_milliseconds().max(0);
        // Two decimals
        let duration = (millis as f64 / 10.0).round() / 100.0;

        self.end_timestamp = Some(end_timestamp);
        self.duration_seconds = Some(duration);
        self.total_records = total_records;
    }
}

/// Directory of per-session metadata files, named `<session_id>.json`
#[derive(Debug, Clone)]
pub struct RunMetadataStore {
    dir: PathBuf,
}

impl RunMetadataStore {
    /// Create a store rooted at `dir`
    ///
    /// The directory is created lazily on first write.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the metadata file for `session_id`
    pub fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    /// Write (or overwrite) the metadata for one session atomically
    pub async fn write(&self, metadata: &RunMetadata) -> Result<(), Error> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create metadata directory {}: {}",
                    self.dir.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| Error::storage(format!("Failed to serialize metadata: {}", e)))?;

        let path = self.path_for(metadata.session_id);
        let mut temp_path = path.clone();
        temp_path.set_extension("tmp");

        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::storage(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, &path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::trace!("Run metadata written: {}", path.display());
        Ok(())
    }

    /// Load the metadata for one session, if present
    pub async fn load(&self, session_id: Uuid) -> Result<Option<RunMetadata>, Error> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to read metadata file {}: {}",
                path.display(),
                e
            ))
        })?;

        let metadata: RunMetadata = serde_json::from_str(&content).map_err(|e| {
            Error::storage(format!(
                "Failed to parse metadata file {}: {}",
                path.display(),
                e
            ))
        })?;

        if metadata.version != METADATA_FILE_VERSION {
            tracing::warn!(
                "Metadata file version mismatch: expected {}, got {}",
                METADATA_FILE_VERSION,
                metadata.version
            );
        }

        Ok(Some(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_then_finish() {
        let dir = tempdir().unwrap();
        let store = RunMetadataStore::new(dir.path().join("sessions"));
        let session_id = Uuid::new_v4();
        let start = Utc::now();

        let mut metadata = RunMetadata::started(
            session_id,
            "opc.tcp://127.0.0.2:4840",
            AcquisitionMode::Poll,
            vec!["C_TOTAL".to_string()],
            vec!["ns=2;i=99".to_string()],
            start,
        );
        store.write(&metadata).await.unwrap();

        let loaded = store.load(session_id).await.unwrap().unwrap();
        assert_eq!(loaded.end_timestamp, None);
        assert_eq!(loaded.dropped_variables, vec!["ns=2;i=99".to_string()]);

        metadata.finish(start + Duration::milliseconds(1234), 7);
        store.write(&metadata).await.unwrap();

        let loaded = store.load(session_id).await.unwrap().unwrap();
        assert_eq!(loaded.duration_seconds, Some(1.23));
        assert_eq!(loaded.total_records, 7);
        assert!(!store.path_for(session_id).with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_session_loads_none() {
        let dir = tempdir().unwrap();
        let store = RunMetadataStore::new(dir.path());
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}

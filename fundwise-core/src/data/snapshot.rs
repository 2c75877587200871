//! Cache-fallback store: last known-good snapshot per aggregate dataset key.
//!
//! Layout: `{cache_root}/{sanitized_key}-{hash8}.json`, one file per key,
//! overwritten on every successful live fetch and otherwise read-only.
//!
//! Features:
//! - Atomic writes (unique temp file per writer, renamed into place)
//! - Content hash recorded alongside the payload
//! - Quarantine for unreadable files ({filename}.quarantined), treated as absent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::provider::DataError;
use super::table::Table;

/// A stored snapshot of one aggregate dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub dataset_key: String,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
    pub table: Table,
}

pub struct SnapshotStore {
    cache_root: PathBuf,
}

impl SnapshotStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// File holding the snapshot for `dataset_key`. The short hash keeps keys
    /// that sanitize to the same text from colliding.
    pub fn path_for(&self, dataset_key: &str) -> PathBuf {
        let hash = blake3::hash(dataset_key.as_bytes()).to_hex();
        self.cache_root
            .join(format!("{}-{}.json", sanitize_key(dataset_key), &hash[..8]))
    }

    /// Overwrite the snapshot for `dataset_key`.
    pub fn write(
        &self,
        dataset_key: &str,
        table: &Table,
        fetched_at: DateTime<Utc>,
    ) -> Result<Snapshot, DataError> {
        fs::create_dir_all(&self.cache_root)
            .map_err(|e| DataError::Cache(format!("failed to create cache dir: {e}")))?;

        let snapshot = Snapshot {
            dataset_key: dataset_key.to_string(),
            fetched_at,
            content_hash: table.content_hash(),
            table: table.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| DataError::Cache(format!("snapshot serialization: {e}")))?;

        // Each writer gets its own temp file so concurrent write-throughs of
        // one key never share a path; the last rename wins.
        let path = self.path_for(dataset_key);
        let mut tmp = tempfile::Builder::new()
            .prefix(".snapshot-")
            .suffix(".tmp")
            .tempfile_in(&self.cache_root)
            .map_err(|e| DataError::Cache(format!("snapshot temp file: {e}")))?;
        tmp.write_all(&json)
            .map_err(|e| DataError::Cache(format!("snapshot write: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| DataError::Cache(format!("atomic rename failed: {}", e.error)))?;

        Ok(snapshot)
    }

    /// Most recent snapshot for `dataset_key`, if one exists and is readable.
    pub fn read(&self, dataset_key: &str) -> Option<Snapshot> {
        let path = self.path_for(dataset_key);
        let bytes = fs::read(&path).ok()?;

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) if snapshot.dataset_key == dataset_key => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    path = %path.display(),
                    expected = dataset_key,
                    found = %snapshot.dataset_key,
                    "snapshot key mismatch, ignoring"
                );
                None
            }
            Err(e) => {
                let quarantine = path.with_extension("json.quarantined");
                warn!(path = %path.display(), error = %e, "quarantining corrupt snapshot");
                let _ = fs::rename(&path, &quarantine);
                None
            }
        }
    }
}

/// Filesystem-safe rendering of a key: anything outside `[A-Za-z0-9._-]`
/// becomes `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

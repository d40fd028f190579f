use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use chain_query_key::CacheKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{store::CacheEntry, PersistenceError};

/// Version of the snapshot format written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A serialized copy of the result cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Format version
    pub version: u32,
    /// Entries by cache key
    pub entries: BTreeMap<CacheKey, CacheEntry>,
}

impl Snapshot {
    /// Constructs a snapshot of the current format from the provided entries.
    pub fn new(entries: impl IntoIterator<Item = (CacheKey, CacheEntry)>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: entries.into_iter().collect(),
        }
    }
}

/// Writes a snapshot to `path`.
///
/// The snapshot is written to a temporary file in the same directory first
/// and then moved into place, so readers never observe a partial file.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), PersistenceError> {
    let contents = serde_json::to_string(snapshot)?;

    let directory = snapshot_directory(path);
    tokio::fs::DirBuilder::new()
        .recursive(true)
        .create(&directory)
        .await?;

    let tmp_path = directory.join(format!(".{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp_path, contents).await?;

    // Atomic on Unix platforms.
    if let Err(error) = tokio::fs::rename(&tmp_path, path).await {
        if let Err(remove_error) = tokio::fs::remove_file(&tmp_path).await {
            log::error!(
                "Failed to remove temporary snapshot file '{}': {remove_error}",
                tmp_path.display()
            );
        }

        return Err(error.into());
    }

    log::debug!(
        "Persisted {} cache entries to '{}'",
        snapshot.entries.len(),
        path.display()
    );

    Ok(())
}

/// Reads a snapshot from `path`. Returns `None` if the file doesn't exist.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
pub async fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, PersistenceError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };

    let snapshot: Snapshot = serde_json::from_str(&contents)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }

    Ok(Some(snapshot))
}

fn snapshot_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

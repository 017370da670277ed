//! Explicit artifact cache over [`SqliteStorage`].
//!
//! Each artifact is stored with the fingerprint of the sources it was built
//! from. A lookup whose fingerprint differs is a miss and the artifact is
//! rebuilt in full; nothing is ever patched incrementally.

use crate::model::{LoadError, StorageError};
use crate::storage::sqlite::SqliteStorage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Modification times of the source files plus any build parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFingerprint(String);

impl SourceFingerprint {
    pub fn of_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, LoadError> {
        let mut parts = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let modified = fs::metadata(path)
                .and_then(|meta| meta.modified())
                .map_err(|source| LoadError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            let modified: DateTime<Utc> = modified.into();
            parts.push(format!("{}@{}", path.display(), modified.to_rfc3339()));
        }
        Ok(Self(parts.join(";")))
    }

    /// Folds a build parameter into the fingerprint.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.push_str(&format!(";{}={}", key, value));
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub struct ArtifactCache {
    storage: SqliteStorage,
}

impl ArtifactCache {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Returns the cached artifact when its fingerprint matches, otherwise builds and stores it.
    pub fn get_or_build<T, E, F>(
        &self,
        name: &str,
        fingerprint: &SourceFingerprint,
        build: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StorageError>,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.lookup(name, fingerprint)? {
            return Ok(value);
        }

        info!("Building artifact {}...", name);
        let value = build()?;
        let payload = serde_json::to_vec(&value).map_err(StorageError::from)?;
        self.storage.save(name, fingerprint.as_str(), &payload)?;
        debug!("Stored artifact {} ({} bytes)", name, payload.len());
        Ok(value)
    }

    fn lookup<T: DeserializeOwned>(
        &self,
        name: &str,
        fingerprint: &SourceFingerprint,
    ) -> Result<Option<T>, StorageError> {
        let Some(stored) = self.storage.load(name)? else {
            debug!("Artifact {} not cached", name);
            return Ok(None);
        };
        if stored.fingerprint != fingerprint.as_str() {
            info!("Artifact {} is stale (built {})", name, stored.built_at);
            return Ok(None);
        }
        match serde_json::from_slice(&stored.payload) {
            Ok(value) => {
                info!("Using cached artifact {} (built {})", name, stored.built_at);
                Ok(Some(value))
            }
            Err(e) => {
                warn!("Cached artifact {} is unreadable, rebuilding: {}", name, e);
                Ok(None)
            }
        }
    }

    /// Forgets one artifact so the next lookup rebuilds it.
    pub fn invalidate(&self, name: &str) -> Result<(), StorageError> {
        if self.storage.remove(name)? {
            info!("Invalidated artifact {}", name);
        }
        Ok(())
    }

    /// Forgets every artifact.
    pub fn rebuild(&self) -> Result<(), StorageError> {
        let removed = self.storage.clear()?;
        info!("Cleared {} cached artifacts", removed);
        Ok(())
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }
}

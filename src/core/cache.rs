use crate::domain::model::{CacheEntry, LocationKey};
use crate::domain::ports::CacheStore;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// One JSON file per location under a cache directory.
///
/// Writes go through a single in-process lock and land via temp file + rename,
/// so concurrent workers never leave a half-written entry behind.
#[derive(Debug)]
pub struct FileCacheStore {
    dir: PathBuf,
    read_only: bool,
    write_lock: Mutex<()>,
}

impl FileCacheStore {
    /// Opens (creating if needed) the cache directory.
    ///
    /// A directory that can be read but not written yields a read-only store;
    /// one that can be neither is fatal.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let writable = match Self::check_writable(&dir).await {
            Ok(()) => true,
            Err(e) => {
                if tokio::fs::read_dir(&dir).await.is_err() {
                    return Err(EtlError::CacheUnavailable {
                        path: dir.display().to_string(),
                        message: e.to_string(),
                    });
                }
                tracing::warn!(
                    "⚠️ Cache directory {} is not writable ({}); running read-only",
                    dir.display(),
                    e
                );
                false
            }
        };

        tracing::debug!("Cache store opened at {} (writable: {})", dir.display(), writable);

        Ok(Self {
            dir,
            read_only: !writable,
            write_lock: Mutex::new(()),
        })
    }

    async fn check_writable(dir: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let marker = dir.join(".write-check");
        tokio::fs::write(&marker, b"ok").await?;
        tokio::fs::remove_file(&marker).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn entry_path(&self, key: &LocationKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.storage_id()))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &LocationKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&data)?;
        // 檔名相同但內容屬於別的地點（理論上不會發生）時視為未命中
        if &entry.key != key {
            tracing::warn!(
                "⚠️ Cache file {} belongs to {}, not {}",
                path.display(),
                entry.key,
                key
            );
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put(&self, key: &LocationKey, payload: &str) -> Result<CacheEntry> {
        if self.read_only {
            return Err(EtlError::IoError(std::io::Error::new(
                ErrorKind::PermissionDenied,
                format!("cache directory {} is read-only", self.dir.display()),
            )));
        }

        let entry = CacheEntry {
            key: key.clone(),
            payload: payload.to_string(),
            fetched_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&entry)?;
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        tracing::debug!("💾 Cached {} at {}", key, path.display());
        Ok(entry)
    }
}

/// In-memory cache, used where persistence across runs is not wanted (tests).
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<LocationKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, key: &LocationKey) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &LocationKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &LocationKey, payload: &str) -> Result<CacheEntry> {
        let entry = CacheEntry {
            key: key.clone(),
            payload: payload.to_string(),
            fetched_at: Utc::now(),
        };
        self.entries.write().await.insert(key.clone(), entry.clone());
        Ok(entry)
    }
}

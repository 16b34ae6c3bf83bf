//! Persistent tier: one JSON record per cache key in a dedicated directory.

use crate::cache::CacheEntry;
use crate::PreviewError;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Opens the store, creating its directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, PreviewError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened preview cache directory");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{RECORD_EXTENSION}"))
    }

    pub async fn read(&self, key: &str) -> Result<Option<CacheEntry>, PreviewError> {
        let bytes = match fs::read(self.record_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry = serde_json::from_slice(&bytes)?;
        Ok(Some(entry))
    }

    /// Writes through a uniquely named temporary file and a rename, so
    /// readers never see a half-written record and concurrent writers of one
    /// key never share a temporary file.
    pub async fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), PreviewError> {
        let bytes = serde_json::to_vec(entry)?;
        fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(key);
        let tmp = self
            .dir
            .join(format!("{key}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns whether a record existed.
    pub async fn delete(&self, key: &str) -> Result<bool, PreviewError> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the whole directory and recreates it empty.
    pub async fn clear(&self) -> Result<(), PreviewError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Deletes every record that expired at or before `now`, plus records
    /// that no longer decode. Returns how many were removed.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, PreviewError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let stale = match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(entry) => !entry.is_valid_at(now),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Dropping undecodable cache record");
                        true
                    }
                },
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if stale {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        debug!(removed, "Expired cache records swept");
        Ok(removed)
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> Result<usize, PreviewError> {
        let mut count = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            if dir_entry.path().extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PreviewData;
    use std::time::Duration;

    fn entry(url: &str, ttl: Duration) -> CacheEntry {
        CacheEntry::new(PreviewData::new(url).with_title("t"), ttl)
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("previews")).await.unwrap();

        let stored = entry("https://a.example", Duration::from_secs(60));
        store.write("abc", &stored).await.unwrap();

        assert_eq!(store.read("abc").await.unwrap(), Some(stored));
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.delete("abc").await.unwrap());
        assert!(!store.delete("abc").await.unwrap());
        assert_eq!(store.read("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        store
            .write("k1", &entry("https://a.example", Duration::from_secs(60)))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("k1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["data"]["url"], "https://a.example");
        assert_eq!(value["data"]["title"], "t");
        assert!(value["expiration"].is_string());
        assert!(value.get("version").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        assert!(matches!(
            store.read("bad").await,
            Err(PreviewError::SerializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        store
            .write("fresh", &entry("https://fresh.example", Duration::from_secs(3600)))
            .await
            .unwrap();
        store
            .write("stale", &entry("https://stale.example", Duration::ZERO))
            .await
            .unwrap();
        std::fs::write(dir.path().join("junk.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        let removed = store
            .remove_expired(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert!(store.read("fresh").await.unwrap().is_some());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let url = format!("https://writer{i}.example");
                    store.write("shared", &entry(&url, Duration::from_secs(60))).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.read("shared").await.unwrap().unwrap();
        assert!(stored.data.url.starts_with("https://writer"));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_clear_recreates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("c")).await.unwrap();
        store
            .write("a", &entry("https://a.example", Duration::from_secs(60)))
            .await
            .unwrap();

        store.clear().await.unwrap();

        assert!(store.dir().is_dir());
        assert_eq!(store.len().await.unwrap(), 0);
    }
}

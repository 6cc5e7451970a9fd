//! Local filesystem backing store
//!
//! Layout: `<root>/<first 2 digest chars>/<digest>`. Writes land in
//! `<root>/.tmp/` first and are renamed into place, so a reader never sees a
//! partially written object.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{BlobStore, StorageError, StoreOutcome, StoredLocation, StoredObject};
use crate::digest::ContentDigest;

/// Directory for in-flight writes, relative to the root
const TEMP_DIR: &str = ".tmp";

/// Local filesystem blob storage
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Attach to the root, creating it if missing
    pub async fn open(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| self.init_error(e))?;

        tracing::info!(root = %self.root.display(), "Opened local storage");
        Ok(())
    }

    fn object_path(&self, digest: &ContentDigest) -> PathBuf {
        self.root.join(digest.shard_prefix()).join(digest.as_str())
    }

    fn init_error(&self, e: std::io::Error) -> StorageError {
        StorageError::Init {
            location: self.root.display().to_string(),
            reason: e.to_string(),
        }
    }

    async fn write_atomically(
        &self,
        digest: &ContentDigest,
        path: &Path,
        data: &[u8],
    ) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_dir = self.root.join(TEMP_DIR);
        tokio::fs::create_dir_all(&temp_dir).await?;
        let tmp = temp_dir.join(format!("{}.{}", digest, Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        written
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn init(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir(&self.root)
            .await
            .map_err(|e| self.init_error(e))?;

        tracing::info!(root = %self.root.display(), "Initialized local storage");
        Ok(())
    }

    async fn store(
        &self,
        digest: &ContentDigest,
        data: &[u8],
    ) -> Result<StoreOutcome, StorageError> {
        if data.is_empty() {
            return Err(StorageError::write(digest, "refusing to store empty content"));
        }

        let path = self.object_path(digest);
        let location = path.display().to_string();

        match tokio::fs::metadata(&path).await {
            Ok(existing) if existing.len() == data.len() as u64 => {
                tracing::debug!(digest = %digest, "Object already present, skipping write");
                return Ok(StoreOutcome {
                    location,
                    written: false,
                });
            }
            Ok(existing) => {
                return Err(StorageError::write(
                    digest,
                    format!(
                        "existing object holds {} bytes, upload has {}",
                        existing.len(),
                        data.len()
                    ),
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::write(digest, e)),
        }

        self.write_atomically(digest, &path, data)
            .await
            .map_err(|e| StorageError::write(digest, e))?;

        tracing::debug!(
            digest = %digest,
            size = data.len(),
            path = %location,
            "Stored object"
        );

        Ok(StoreOutcome {
            location,
            written: true,
        })
    }

    async fn load(&self, digest: &ContentDigest) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(digest);
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::NotFound(format!("{}: {}", digest, e)))
    }

    async fn remove(&self, digest: &ContentDigest) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.object_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Backend(format!(
                "Failed to remove {}: {}",
                digest, e
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<StoredObject>, StorageError> {
        let backend = |e: std::io::Error| StorageError::Backend(e.to_string());

        let mut shards = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(backend(e)),
        };

        let mut objects = Vec::new();
        while let Some(shard) = shards.next_entry().await.map_err(backend)? {
            if shard.file_name() == TEMP_DIR || !shard.file_type().await.map_err(backend)?.is_dir() {
                continue;
            }

            let mut entries = tokio::fs::read_dir(shard.path()).await.map_err(backend)?;
            while let Some(entry) = entries.next_entry().await.map_err(backend)? {
                let name = entry.file_name();
                let Some(digest) = name.to_str().and_then(|n| ContentDigest::parse(n).ok()) else {
                    continue;
                };
                let size = entry.metadata().await.map_err(backend)?.len();
                objects.push(StoredObject { digest, size });
            }
        }

        objects.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(objects)
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let count = self.list().await?.len();

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        }

        tracing::info!(root = %self.root.display(), removed = count, "Cleared local storage");
        Ok(count)
    }

    fn location(&self, digest: &ContentDigest) -> StoredLocation {
        self.object_path(digest).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;
    use tempfile::TempDir;

    fn store_in(temp_dir: &TempDir) -> LocalBlobStore {
        LocalBlobStore::new(temp_dir.path().join("store"))
    }

    #[tokio::test]
    async fn test_init_is_strict() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        store.init().await.unwrap();
        let second = store.init().await;
        assert!(matches!(second, Err(StorageError::Init { .. })));

        // open tolerates an existing root
        store.open().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.init().await.unwrap();

        let data = b"hello";
        let digest = digest_bytes(data);

        let outcome = store.store(&digest, data).await.unwrap();
        assert!(outcome.written);
        assert_eq!(outcome.location, store.location(&digest));
        assert!(outcome.location.ends_with(digest.as_str()));

        let loaded = store.load(&digest).await.unwrap();
        assert_eq!(loaded, data);

        // No temp files are left behind
        let mut tmp = tokio::fs::read_dir(store.root().join(TEMP_DIR)).await.unwrap();
        assert!(tmp.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_rejects_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.init().await.unwrap();

        let digest = digest_bytes(b"");
        let result = store.store(&digest, b"").await;
        assert!(matches!(result, Err(StorageError::Write { .. })));
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.init().await.unwrap();

        let data = b"same bytes";
        let digest = digest_bytes(data);

        let first = store.store(&digest, data).await.unwrap();
        let second = store.store(&digest, data).await.unwrap();
        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.location, second.location);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_detects_mismatched_collision() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.init().await.unwrap();

        let digest = digest_bytes(b"original");
        store.store(&digest, b"original").await.unwrap();

        let result = store.store(&digest, b"longer payload").await;
        assert!(matches!(result, Err(StorageError::Write { .. })));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.init().await.unwrap();

        let result = store.load(&digest_bytes(b"never stored")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.init().await.unwrap();

        let a = digest_bytes(b"first");
        let b = digest_bytes(b"second file");
        store.store(&a, b"first").await.unwrap();
        store.store(&b, b"second file").await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&StoredObject { digest: a.clone(), size: 5 }));
        assert!(listed.contains(&StoredObject { digest: b.clone(), size: 11 }));

        store.remove(&a).await.unwrap();
        store.remove(&a).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);

        let removed = store.clear().await.unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(store.load(&b).await, Err(StorageError::NotFound(_))));
        assert!(store.list().await.unwrap().is_empty());

        // A cleared store can be initialized again
        store.init().await.unwrap();
    }
}

//! Upload Workflow
//!
//! Received -> Digested -> (Stored | Skipped) -> Registered -> Acknowledged,
//! with Failed reachable from every step. Bytes are written before the
//! registry is touched; if registration then fails, freshly written bytes are
//! removed again so neither side is left with an orphan.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

use super::locks::DigestLocks;
use super::types::{UploadError, UploadReceipt, UploadRequest, UploadStage};
use crate::digest::{digest_bytes, digest_reader, ContentDigest};
use crate::registry::{ContentKind, ContentMetadata, Registry};
use crate::storage::BlobStore;

/// Drives uploads against a backing store and a registry
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

struct UploaderInner {
    store: Arc<dyn BlobStore>,
    registry: Registry,
    locks: DigestLocks,

    /// Uploads hold this shared; `reset` holds it exclusively
    gate: RwLock<()>,

    /// Maximum upload size in bytes (0 = unlimited)
    max_bytes: u64,
}

impl Uploader {
    pub fn new(store: Arc<dyn BlobStore>, registry: Registry) -> Self {
        Self::with_max_bytes(store, registry, 0)
    }

    pub fn with_max_bytes(store: Arc<dyn BlobStore>, registry: Registry, max_bytes: u64) -> Self {
        Self {
            inner: Arc::new(UploaderInner {
                store,
                registry,
                locks: DigestLocks::new(),
                gate: RwLock::new(()),
                max_bytes,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Upload an in-memory buffer
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError> {
        let mut stage = UploadStage::Received;
        let origin = request.origin.clone();

        let result = match self.check_received(&request) {
            Ok(()) => {
                let digest = digest_bytes(&request.data);
                self.advance(&mut stage, UploadStage::Digested, &digest);
                self.complete(request, digest, &mut stage).await
            }
            Err(e) => Err(e),
        };

        self.finish(result, stage, &origin)
    }

    /// Upload from a stream; the digest is computed while reading
    pub async fn upload_reader<R>(
        &self,
        reader: R,
        origin: impl Into<String>,
        name: Option<String>,
        kind: Option<ContentKind>,
    ) -> Result<UploadReceipt, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut stage = UploadStage::Received;
        let origin = origin.into();

        // Read at most one byte past the limit so oversized input fails fast
        let limit = match self.inner.max_bytes {
            0 => u64::MAX,
            max => max.saturating_add(1),
        };

        let result = match digest_reader(reader.take(limit)).await {
            Ok((digest, data)) => {
                let request = UploadRequest {
                    data,
                    origin: origin.clone(),
                    name,
                    kind,
                };
                match self.check_received(&request) {
                    Ok(()) => {
                        self.advance(&mut stage, UploadStage::Digested, &digest);
                        self.complete(request, digest, &mut stage).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(UploadError::DigestComputation(e)),
        };

        self.finish(result, stage, &origin)
    }

    /// Upload a local file, using its path as the origin
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<UploadReceipt, UploadError> {
        let path = path.as_ref();
        let origin = path.display().to_string();

        let file = tokio::fs::File::open(path)
            .await
            .map_err(UploadError::DigestComputation)?;

        self.upload_reader(file, origin, None, None).await
    }

    /// Wipe the registry and the backing store, then re-initialize the store.
    ///
    /// Waits for in-flight uploads and blocks new ones until done. Records
    /// go first: if the store half fails, the leftover bytes are orphans that
    /// a later upload of the same content simply reuses.
    pub async fn reset(&self) -> Result<(), UploadError> {
        let _exclusive = self.inner.gate.write().await;

        let records = self.inner.registry.clear().await?;
        let objects = self.inner.store.clear().await?;
        self.inner.store.init().await?;

        tracing::warn!(objects = objects, records = records, "Registry reset");
        Ok(())
    }

    // ========================================================================
    // Stages
    // ========================================================================

    fn check_received(&self, request: &UploadRequest) -> Result<(), UploadError> {
        if request.data.is_empty() {
            return Err(UploadError::EmptyInput(request.origin.clone()));
        }

        let size = request.data.len() as u64;
        if self.inner.max_bytes > 0 && size > self.inner.max_bytes {
            return Err(UploadError::TooLarge {
                size,
                max: self.inner.max_bytes,
            });
        }

        Ok(())
    }

    async fn complete(
        &self,
        request: UploadRequest,
        digest: ContentDigest,
        stage: &mut UploadStage,
    ) -> Result<UploadReceipt, UploadError> {
        let name = request.resolved_name();
        let metadata = ContentMetadata {
            kind: request.kind.unwrap_or_else(|| ContentKind::infer(&name)),
            size: request.data.len() as u64,
            name,
        };

        let _shared = self.inner.gate.read().await;
        let _guard = self.inner.locks.lock(&digest).await;

        let known = self.inner.registry.contains(&digest).await?;
        let location = if known {
            self.advance(stage, UploadStage::Skipped, &digest);
            self.inner.store.location(&digest)
        } else {
            let outcome = self.inner.store.store(&digest, &request.data).await?;
            // Bytes already present belong to another writer; never compensate for them
            let next = if outcome.written {
                UploadStage::Stored
            } else {
                UploadStage::Skipped
            };
            self.advance(stage, next, &digest);
            outcome.location
        };

        let registration = match self
            .inner
            .registry
            .register_origin(&digest, &request.origin, &metadata)
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                if *stage == UploadStage::Stored {
                    self.discard(&digest).await;
                }
                return Err(e.into());
            }
        };
        self.advance(stage, UploadStage::Registered, &digest);

        let receipt = UploadReceipt {
            status: registration,
            digest,
            size: metadata.size,
            location,
        };
        self.advance(stage, UploadStage::Acknowledged, &receipt.digest);

        Ok(receipt)
    }

    /// Undo a fresh store after a failed registration
    async fn discard(&self, digest: &ContentDigest) {
        if let Err(e) = self.inner.store.remove(digest).await {
            tracing::error!(
                digest = %digest,
                error = %e,
                "Failed to remove bytes after registration failure"
            );
        }
    }

    fn advance(&self, stage: &mut UploadStage, next: UploadStage, digest: &ContentDigest) {
        tracing::debug!(digest = %digest, from = ?stage, to = ?next, "Upload stage");
        *stage = next;
    }

    fn finish(
        &self,
        result: Result<UploadReceipt, UploadError>,
        stage: UploadStage,
        origin: &str,
    ) -> Result<UploadReceipt, UploadError> {
        match &result {
            Ok(receipt) => {
                tracing::info!(
                    digest = %receipt.digest,
                    origin = %origin,
                    size = receipt.size,
                    status = receipt.status.as_str(),
                    "Upload acknowledged"
                );
            }
            Err(e) => {
                tracing::warn!(
                    origin = %origin,
                    failed_at = ?stage,
                    to = ?UploadStage::Failed,
                    code = e.code(),
                    error = %e,
                    "Upload failed"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::registry::Registration;
    use crate::storage::{LocalBlobStore, StorageError, StoreOutcome, StoredLocation, StoredObject};
    use std::collections::BTreeSet;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    const HELLO_SHA384: &str = "59e1748777448c69de6b800d7a33bbfb9ff1b463e44354c3553bcdb9c666fa90125a3c79f90397bdf5f6a13de828684f";

    async fn test_uploader(temp_dir: &TempDir) -> Uploader {
        let store = LocalBlobStore::new(temp_dir.path().join("store"));
        store.init().await.unwrap();

        let url = format!("sqlite://{}", temp_dir.path().join("registry.db").display());
        let registry = Registry::new(create_pool(&url).await.unwrap());

        Uploader::new(Arc::new(store), registry)
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;

        let first = uploader
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();
        assert_eq!(first.status, Registration::Created);
        assert_eq!(first.digest.as_str(), HELLO_SHA384);
        assert_eq!(first.size, 5);

        let second = uploader
            .upload(UploadRequest::new(b"hello".to_vec(), "/b/y.txt"))
            .await
            .unwrap();
        assert_eq!(second.status, Registration::Linked);
        assert_eq!(second.location, first.location);

        let record = uploader.registry().find(&first.digest).await.unwrap().unwrap();
        assert_eq!(
            record.origins,
            BTreeSet::from(["/a/x.txt".to_string(), "/b/y.txt".to_string()])
        );
        assert_eq!(record.name, "x.txt");
        assert_eq!(record.kind, ContentKind::Text);

        let third = uploader
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();
        assert_eq!(third.status, Registration::NoOp);

        let stored = uploader.store().load(&first.digest).await.unwrap();
        assert_eq!(stored, b"hello");
        assert_eq!(uploader.store().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_upload_metadata_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;

        let data = b"col_a,col_b\n1,2\n".to_vec();
        let first = uploader
            .upload(UploadRequest::new(data.clone(), "/runs/one.csv"))
            .await
            .unwrap();
        uploader
            .upload(
                UploadRequest::new(data, "/runs/two.dat")
                    .with_name("renamed")
                    .with_kind(ContentKind::Binary),
            )
            .await
            .unwrap();

        let record = uploader.registry().find(&first.digest).await.unwrap().unwrap();
        assert_eq!(record.name, "one.csv");
        assert_eq!(record.kind, ContentKind::Csv);
        assert_eq!(record.size, 16);
        assert_eq!(record.origins.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_upload_fails_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;

        let result = uploader.upload(UploadRequest::new(Vec::new(), "/empty")).await;
        assert!(matches!(result, Err(UploadError::EmptyInput(_))));

        assert_eq!(uploader.registry().count().await.unwrap(), 0);
        assert!(uploader.store().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let base = test_uploader(&temp_dir).await;
        let uploader = Uploader::with_max_bytes(base.store().clone(), base.registry().clone(), 4);

        let result = uploader.upload(UploadRequest::new(b"12345".to_vec(), "/big")).await;
        assert!(matches!(result, Err(UploadError::TooLarge { size: 5, max: 4 })));

        uploader.upload(UploadRequest::new(b"1234".to_vec(), "/ok")).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;
        let n = 12;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let uploader = uploader.clone();
                tokio::spawn(async move {
                    uploader
                        .upload(UploadRequest::new(b"same content".to_vec(), format!("/host{}/f.bin", i)))
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let statuses: Vec<Registration> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().status)
            .collect();

        assert_eq!(statuses.iter().filter(|s| **s == Registration::Created).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == Registration::Linked).count(), n - 1);

        let digest = digest_bytes(b"same content");
        assert_eq!(uploader.registry().count().await.unwrap(), 1);
        assert_eq!(uploader.registry().origins(&digest).await.unwrap().len(), n);
        assert_eq!(uploader.store().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_reader_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;

        let path = temp_dir.path().join("input.json");
        tokio::fs::write(&path, br#"{"k":1}"#).await.unwrap();

        let from_file = uploader.upload_file(&path).await.unwrap();
        assert_eq!(from_file.status, Registration::Created);
        assert_eq!(from_file.digest, digest_bytes(br#"{"k":1}"#));

        let from_reader = uploader
            .upload_reader(&br#"{"k":1}"#[..], "/elsewhere/copy.json", None, None)
            .await
            .unwrap();
        assert_eq!(from_reader.status, Registration::Linked);

        let record = uploader.registry().find(&from_file.digest).await.unwrap().unwrap();
        assert_eq!(record.kind, ContentKind::Json);
        assert!(record.origins.contains(&path.display().to_string()));

        let missing = uploader.upload_file(temp_dir.path().join("absent")).await;
        assert!(matches!(missing, Err(UploadError::DigestComputation(_))));
    }

    /// Store whose writes always fail
    struct FailingStore {
        inner: LocalBlobStore,
    }

    #[async_trait::async_trait]
    impl BlobStore for FailingStore {
        async fn init(&self) -> Result<(), StorageError> {
            self.inner.init().await
        }

        async fn store(&self, digest: &ContentDigest, _data: &[u8]) -> Result<StoreOutcome, StorageError> {
            Err(StorageError::write(digest, "disk full"))
        }

        async fn load(&self, digest: &ContentDigest) -> Result<Vec<u8>, StorageError> {
            self.inner.load(digest).await
        }

        async fn remove(&self, digest: &ContentDigest) -> Result<(), StorageError> {
            self.inner.remove(digest).await
        }

        async fn list(&self) -> Result<Vec<StoredObject>, StorageError> {
            self.inner.list().await
        }

        async fn clear(&self) -> Result<usize, StorageError> {
            self.inner.clear().await
        }

        fn location(&self, digest: &ContentDigest) -> StoredLocation {
            self.inner.location(digest)
        }
    }

    #[tokio::test]
    async fn test_storage_failure_creates_no_record() {
        let temp_dir = TempDir::new().unwrap();
        let base = test_uploader(&temp_dir).await;
        let store = FailingStore {
            inner: LocalBlobStore::new(temp_dir.path().join("store")),
        };
        let uploader = Uploader::new(Arc::new(store), base.registry().clone());

        let result = uploader.upload(UploadRequest::new(b"lost".to_vec(), "/x")).await;
        assert!(matches!(
            result,
            Err(UploadError::Storage(StorageError::Write { .. }))
        ));
        assert_eq!(uploader.registry().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_registration_failure_discards_fresh_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;

        // Whitespace-only origin passes intake but is refused by the registry
        let result = uploader.upload(UploadRequest::new(b"orphan?".to_vec(), "   ").with_name("n")).await;
        assert!(matches!(result, Err(UploadError::Registry(_))));

        assert!(uploader.store().list().await.unwrap().is_empty());
        assert_eq!(uploader.registry().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;

        let receipt = uploader
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();

        uploader.reset().await.unwrap();

        assert!(matches!(
            uploader.store().load(&receipt.digest).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(uploader.registry().find(&receipt.digest).await.unwrap().is_none());

        // Reset leaves the store initialized and ready for uploads
        let again = uploader
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();
        assert_eq!(again.status, Registration::Created);
        assert_eq!(uploader.store().load(&again.digest).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_registration_failure_keeps_bytes_it_did_not_write() {
        let temp_dir = TempDir::new().unwrap();
        let uploader = test_uploader(&temp_dir).await;
        let data = b"written by another process";
        let digest = digest_bytes(data);

        // Another writer placed the bytes but has not registered them yet
        let outcome = uploader.store().store(&digest, data).await.unwrap();
        assert!(outcome.written);

        let result = uploader
            .upload(UploadRequest::new(data.to_vec(), "   ").with_name("shared"))
            .await;
        assert!(matches!(result, Err(UploadError::Registry(_))));

        assert_eq!(uploader.store().load(&digest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_reset_with_failing_registry_keeps_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(LocalBlobStore::new(temp_dir.path().join("store")));
        store.init().await.unwrap();

        let url = format!("sqlite://{}", temp_dir.path().join("registry.db").display());
        let pool = create_pool(&url).await.unwrap();
        let uploader = Uploader::new(store.clone(), Registry::new(pool.clone()));

        let receipt = uploader
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();

        pool.close().await;
        assert!(uploader.reset().await.is_err());

        // The record survived, so its bytes must too
        let reopened = Registry::new(create_pool(&url).await.unwrap());
        assert!(reopened.contains(&receipt.digest).await.unwrap());
        assert_eq!(store.load(&receipt.digest).await.unwrap(), b"hello");
    }

    /// Reader that fails on every read
    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "read past the upload limit",
            )))
        }
    }

    #[tokio::test]
    async fn test_upload_reader_stops_at_max_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let base = test_uploader(&temp_dir).await;
        let uploader = Uploader::with_max_bytes(base.store().clone(), base.registry().clone(), 4);

        // Reading beyond the fifth byte would hit the broken tail
        let oversized = (&b"12345"[..]).chain(BrokenReader);
        let result = uploader.upload_reader(oversized, "/big", None, None).await;
        assert!(matches!(result, Err(UploadError::TooLarge { size: 5, max: 4 })));

        let fits = uploader
            .upload_reader(&b"1234"[..], "/ok", None, None)
            .await
            .unwrap();
        assert_eq!(fits.status, Registration::Created);
        assert_eq!(uploader.registry().count().await.unwrap(), 1);
    }
}

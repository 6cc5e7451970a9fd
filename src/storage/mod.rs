//! Backing Store
//!
//! Durable byte storage keyed by content digest. Two backends:
//! - `LocalBlobStore`: a directory tree, written via temp file + rename
//! - `S3BlobStore`: MinIO, Cloudflare R2, Backblaze B2 or AWS S3

mod local;
mod s3;

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

use std::sync::Arc;

use serde::Serialize;

use crate::config::{StorageBackend, StorageConfig};
use crate::digest::ContentDigest;

/// Resolved location of a stored object (filesystem path or `s3://` URL)
pub type StoredLocation = String;

// ============================================================================
// Error Types
// ============================================================================

/// Backing store errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Could not initialize storage at {location}: {reason}")]
    Init { location: String, reason: String },

    #[error("Failed to store {digest}: {reason}")]
    Write { digest: String, reason: String },

    #[error("Could not read stored content: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn write(digest: &ContentDigest, reason: impl ToString) -> Self {
        Self::Write {
            digest: digest.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Blob Store Trait
// ============================================================================

/// An object held by a backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub digest: ContentDigest,
    pub size: u64,
}

/// Result of a `store` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    pub location: StoredLocation,
    /// False when an identical object was already present and nothing was written
    pub written: bool,
}

/// Trait for backing store implementations
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Prepare the storage root. Fails if the root already exists.
    async fn init(&self) -> Result<(), StorageError>;

    /// Persist bytes under their digest.
    ///
    /// Storing a digest that is already present with the same length is a
    /// no-op (`written: false`); a length mismatch is reported as a write error.
    async fn store(&self, digest: &ContentDigest, data: &[u8])
        -> Result<StoreOutcome, StorageError>;

    /// Load previously stored bytes
    async fn load(&self, digest: &ContentDigest) -> Result<Vec<u8>, StorageError>;

    /// Delete a single object. Missing objects are not an error.
    async fn remove(&self, digest: &ContentDigest) -> Result<(), StorageError>;

    /// Enumerate stored objects
    async fn list(&self) -> Result<Vec<StoredObject>, StorageError>;

    /// Remove everything. Must not run concurrently with uploads.
    async fn clear(&self) -> Result<usize, StorageError>;

    /// Where an object with this digest lives (or would live)
    fn location(&self, digest: &ContentDigest) -> StoredLocation;
}

// ============================================================================
// Factory
// ============================================================================

/// Build the configured backend and attach to its root, creating it if
/// missing. Wiping the store is left to `Uploader::reset`, which clears the
/// registry alongside it.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    let store: Arc<dyn BlobStore> = match config.backend {
        StorageBackend::Local => {
            let local = LocalBlobStore::new(config.root.clone());
            local.open().await?;
            Arc::new(local)
        }
        StorageBackend::S3 => {
            let s3_config = config.s3.as_ref().ok_or_else(|| StorageError::Init {
                location: "s3".to_string(),
                reason: "S3 backend selected but no S3 settings were provided".to_string(),
            })?;
            let s3 = S3BlobStore::connect(s3_config).await;
            s3.init().await?;
            Arc::new(s3)
        }
    };

    Ok(store)
}

//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::registry::Registry;
use crate::storage::{self, BlobStore};
use crate::upload::Uploader;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uploader: Uploader,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn BlobStore>, registry: Registry) -> Self {
        let uploader = Uploader::with_max_bytes(store, registry, config.upload.max_bytes);

        Self {
            inner: Arc::new(AppStateInner { config, uploader }),
        }
    }

    /// Connect storage and database from configuration.
    ///
    /// With `reset_on_start` the registry and the store are wiped together.
    pub async fn connect(config: Config) -> Result<Self> {
        let store = storage::connect(&config.storage).await?;

        let pool = db::create_pool(&config.database.url).await?;
        tracing::info!("Database initialized at {}", config.database.url);

        let reset = config.storage.reset_on_start;
        let state = Self::new(config, store, Registry::new(pool));

        if reset {
            state.uploader().reset().await?;
            tracing::warn!("Registry and storage reset on start");
        }

        Ok(state)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload workflow
    pub fn uploader(&self) -> &Uploader {
        &self.inner.uploader
    }

    /// Get the registry
    pub fn registry(&self) -> &Registry {
        self.inner.uploader.registry()
    }

    /// Get the backing store
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        self.inner.uploader.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registration;
    use crate::upload::UploadRequest;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir, reset_on_start: bool) -> Config {
        let mut config = Config::default();
        config.storage.root = temp_dir.path().join("store");
        config.storage.reset_on_start = reset_on_start;
        config.database.url = format!("sqlite://{}", temp_dir.path().join("registry.db").display());
        config
    }

    #[tokio::test]
    async fn test_restart_keeps_records_and_bytes() {
        let temp_dir = TempDir::new().unwrap();

        let first = AppState::connect(test_config(&temp_dir, false)).await.unwrap();
        let receipt = first
            .uploader()
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();
        drop(first);

        let restarted = AppState::connect(test_config(&temp_dir, false)).await.unwrap();
        assert!(restarted.registry().contains(&receipt.digest).await.unwrap());
        assert_eq!(restarted.store().load(&receipt.digest).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_reset_on_start_clears_registry_with_store() {
        let temp_dir = TempDir::new().unwrap();

        let first = AppState::connect(test_config(&temp_dir, false)).await.unwrap();
        first
            .uploader()
            .upload(UploadRequest::new(b"hello".to_vec(), "/a/x.txt"))
            .await
            .unwrap();
        drop(first);

        let restarted = AppState::connect(test_config(&temp_dir, true)).await.unwrap();
        assert_eq!(restarted.registry().count().await.unwrap(), 0);

        let again = restarted
            .uploader()
            .upload(UploadRequest::new(b"hello".to_vec(), "/b/y.txt"))
            .await
            .unwrap();
        assert_eq!(again.status, Registration::Created);
        assert_eq!(restarted.store().load(&again.digest).await.unwrap(), b"hello");
    }
}

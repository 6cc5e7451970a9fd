//! S3-compatible backing store
//!
//! Objects are keyed `<prefix>/<first 2 digest chars>/<digest>`. A PUT is
//! atomic to readers, so no temp object is needed.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};

use super::{BlobStore, StorageError, StoreOutcome, StoredLocation, StoredObject};
use crate::config::S3Config;
use crate::digest::ContentDigest;

/// S3-compatible blob storage
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3BlobStore {
    /// Create a client from configuration
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "file-registry",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
        }
    }

    fn object_key(&self, digest: &ContentDigest) -> String {
        let key = format!("{}/{}", digest.shard_prefix(), digest);
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn list_prefix(&self) -> Option<String> {
        (!self.prefix.is_empty()).then(|| format!("{}/", self.prefix))
    }

    async fn object_keys(&self) -> Result<Vec<(String, StoredObject)>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(self.list_prefix())
                .set_continuation_token(continuation_token.take())
                .max_keys(1000)
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to list objects: {}", e)))?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                let Some(digest) = key
                    .rsplit('/')
                    .next()
                    .and_then(|name| ContentDigest::parse(name).ok())
                else {
                    continue;
                };
                let size = obj.size().unwrap_or(0).max(0) as u64;
                objects.push((key.to_string(), StoredObject { digest, size }));
            }

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            continuation_token = response.next_continuation_token().map(|s| s.to_string());
        }

        Ok(objects)
    }
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn init(&self) -> Result<(), StorageError> {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            tracing::info!(bucket = %self.bucket, "Connected to S3 bucket");
            return Ok(());
        }

        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Init {
                location: format!("s3://{}", self.bucket),
                reason: e.to_string(),
            })?;

        tracing::info!(bucket = %self.bucket, "Created S3 bucket");
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

        let key = self.object_key(digest);
        let location = self.location(digest);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(existing) => {
                let existing_len = existing.content_length().unwrap_or(-1);
                if existing_len == data.len() as i64 {
                    tracing::debug!(digest = %digest, "Object already present, skipping upload");
                    return Ok(StoreOutcome {
                        location,
                        written: false,
                    });
                }
                return Err(StorageError::write(
                    digest,
                    format!(
                        "existing object holds {} bytes, upload has {}",
                        existing_len,
                        data.len()
                    ),
                ));
            }
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => {}
            Err(e) => return Err(StorageError::write(digest, e)),
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| StorageError::write(digest, e))?;

        tracing::debug!(digest = %digest, size = data.len(), key = %key, "Stored object");
        Ok(StoreOutcome {
            location,
            written: true,
        })
    }

    async fn load(&self, digest: &ContentDigest) -> Result<Vec<u8>, StorageError> {
        let key = self.object_key(digest);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::NotFound(format!("{}: {}", key, e)))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::NotFound(format!("{}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn remove(&self, digest: &ContentDigest) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(digest))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to remove {}: {}", digest, e)))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredObject>, StorageError> {
        let mut objects: Vec<StoredObject> = self
            .object_keys()
            .await?
            .into_iter()
            .map(|(_, obj)| obj)
            .collect();
        objects.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(objects)
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.object_keys().await?;
        let count = keys.len();

        let deletes = keys.into_iter().map(|(key, _)| {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            async move {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| StorageError::Backend(format!("Failed to delete {}: {}", key, e)))
            }
        });
        futures::future::try_join_all(deletes).await?;

        tracing::info!(bucket = %self.bucket, removed = count, "Cleared S3 storage");
        Ok(count)
    }

    fn location(&self, digest: &ContentDigest) -> StoredLocation {
        format!("s3://{}/{}", self.bucket, self.object_key(digest))
    }
}

//! SQLite-backed registry operations

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::types::{ContentKind, ContentMetadata, ContentRecord, OriginRecord, Registration};
use super::RegistryError;
use crate::digest::ContentDigest;

type Result<T> = std::result::Result<T, RegistryError>;

/// Content row as stored
#[derive(Debug, sqlx::FromRow)]
struct ContentRow {
    digest: String,
    name: String,
    kind: String,
    size: i64,
    created_at: String,
    updated_at: String,
}

impl ContentRow {
    fn into_record(self, origins: BTreeSet<String>) -> Result<ContentRecord> {
        Ok(ContentRecord {
            digest: ContentDigest::parse(&self.digest)?,
            kind: self.kind.parse::<ContentKind>().map_err(RegistryError::Corrupt)?,
            size: u64::try_from(self.size)
                .map_err(|_| RegistryError::Corrupt(format!("negative size for {}", self.digest)))?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            name: self.name,
            origins,
        })
    }
}

/// Origin row as stored
#[derive(Debug, sqlx::FromRow)]
struct OriginRow {
    content_digest: String,
    path: String,
    created_at: String,
}

impl OriginRow {
    fn into_record(self) -> Result<OriginRecord> {
        Ok(OriginRecord {
            content_digest: ContentDigest::parse(&self.content_digest)?,
            created_at: parse_timestamp(&self.created_at)?,
            path: self.path,
        })
    }
}

/// Fixed-width RFC 3339 in UTC, so text order matches time order
fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RegistryError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

/// Registry of content records and their origins
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a content record with its full origin set
    pub async fn find(&self, digest: &ContentDigest) -> Result<Option<ContentRecord>> {
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT digest, name, kind, size, created_at, updated_at
            FROM contents
            WHERE digest = ?
            "#,
        )
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let origins = self.origin_paths(digest).await?;
                Ok(Some(row.into_record(origins)?))
            }
            None => Ok(None),
        }
    }

    /// Whether a content record exists for this digest
    pub async fn contains(&self, digest: &ContentDigest) -> Result<bool> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM contents WHERE digest = ?")
            .bind(digest.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    /// Origin records owned by a digest
    pub async fn origins(&self, digest: &ContentDigest) -> Result<Vec<OriginRecord>> {
        let rows = sqlx::query_as::<_, OriginRow>(
            r#"
            SELECT content_digest, path, created_at
            FROM origins
            WHERE content_digest = ?
            ORDER BY path ASC
            "#,
        )
        .bind(digest.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OriginRow::into_record).collect()
    }

    async fn origin_paths(&self, digest: &ContentDigest) -> Result<BTreeSet<String>> {
        let paths = sqlx::query_scalar::<_, String>(
            "SELECT path FROM origins WHERE content_digest = ?",
        )
        .bind(digest.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(paths.into_iter().collect())
    }

    /// Create-or-attach for one (digest, path) pair.
    ///
    /// Runs in a single transaction. The content insert is conflict-ignoring,
    /// so a concurrent writer that loses the race falls through to the
    /// linked/no-op path. Metadata of an existing record is never touched
    /// (first write wins); `updated_at` moves only when an origin is added.
    pub async fn register_origin(
        &self,
        digest: &ContentDigest,
        path: &str,
        metadata: &ContentMetadata,
    ) -> Result<Registration> {
        if path.trim().is_empty() {
            return Err(RegistryError::Validation("origin path is required".to_string()));
        }
        if metadata.name.trim().is_empty() {
            return Err(RegistryError::Validation("content name is required".to_string()));
        }

        let now = timestamp_now();
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            r#"
            INSERT INTO contents (digest, name, kind, size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(digest) DO NOTHING
            "#,
        )
        .bind(digest.as_str())
        .bind(&metadata.name)
        .bind(metadata.kind.as_str())
        .bind(metadata.size as i64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let attached = sqlx::query(
            r#"
            INSERT INTO origins (content_digest, path, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(content_digest, path) DO NOTHING
            "#,
        )
        .bind(digest.as_str())
        .bind(path)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let registration = match (created, attached) {
            (true, _) => Registration::Created,
            (false, true) => {
                sqlx::query("UPDATE contents SET updated_at = ? WHERE digest = ?")
                    .bind(&now)
                    .bind(digest.as_str())
                    .execute(&mut *tx)
                    .await?;
                Registration::Linked
            }
            (false, false) => Registration::NoOp,
        };

        if !created {
            let existing: Option<(String, String)> =
                sqlx::query_as("SELECT name, kind FROM contents WHERE digest = ?")
                    .bind(digest.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;

            if let Some((name, kind)) = existing {
                if name != metadata.name || kind != metadata.kind.as_str() {
                    tracing::debug!(
                        digest = %digest,
                        stored_name = %name,
                        stored_kind = %kind,
                        offered_name = %metadata.name,
                        offered_kind = %metadata.kind,
                        "Keeping first-written metadata"
                    );
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            digest = %digest,
            path = %path,
            registration = registration.as_str(),
            "Registered origin"
        );

        Ok(registration)
    }

    /// Content records that were uploaded from a given origin path
    pub async fn find_by_origin(&self, path: &str) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT c.digest, c.name, c.kind, c.size, c.created_at, c.updated_at
            FROM contents c
            JOIN origins o ON o.content_digest = c.digest
            WHERE o.path = ?
            ORDER BY c.created_at ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    /// Page through content records, newest first
    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT digest, name, kind, size, created_at, updated_at
            FROM contents
            ORDER BY created_at DESC, digest ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn hydrate(&self, rows: Vec<ContentRow>) -> Result<Vec<ContentRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let digest = ContentDigest::parse(&row.digest)?;
            let origins = self.origin_paths(&digest).await?;
            records.push(row.into_record(origins)?);
        }
        Ok(records)
    }

    /// Number of content records
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contents")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    /// Delete every content record; origins go with them
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM contents")
            .execute(&self.pool)
            .await?;

        tracing::info!(removed = result.rows_affected(), "Cleared registry");
        Ok(result.rows_affected())
    }
}

//! Registry
//!
//! Persistence boundary mapping digest -> content record. Identity and
//! dedup are enforced by the schema: the digest is the primary key of
//! `contents`, and `(content_digest, path)` is the primary key of `origins`.

mod repository;
mod types;

pub use repository::Registry;
pub use types::*;

use crate::digest::InvalidDigest;

/// Registry error types
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Corrupt registry row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
            let busy = matches!(db.code().as_deref(), Some("5") | Some("6") | Some("517"));
            if busy || db.is_unique_violation() {
                return Self::Conflict(db.message().to_string());
            }
        }
        Self::Database(e)
    }
}

impl From<InvalidDigest> for RegistryError {
    fn from(e: InvalidDigest) -> Self {
        Self::Validation(e.to_string())
    }
}

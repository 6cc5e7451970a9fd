//! Upload types

use serde::Serialize;

use crate::digest::ContentDigest;
use crate::registry::{ContentKind, Registration, RegistryError};
use crate::storage::{StorageError, StoredLocation};

// ============================================================================
// Request / Receipt
// ============================================================================

/// One upload: the bytes plus where they came from
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Raw file content
    pub data: Vec<u8>,

    /// Origin path or name as supplied by the caller
    pub origin: String,

    /// Display name; defaults to the last component of the origin
    pub name: Option<String>,

    /// Declared kind; inferred from the name when absent
    pub kind: Option<ContentKind>,
}

impl UploadRequest {
    pub fn new(data: impl Into<Vec<u8>>, origin: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            origin: origin.into(),
            name: None,
            kind: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Name to record if this upload creates the content record
    pub fn resolved_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| origin_file_name(&self.origin))
    }
}

/// Last path component of an origin, accepting both separators
pub fn origin_file_name(origin: &str) -> String {
    origin
        .trim()
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Successful upload acknowledgement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub status: Registration,
    pub digest: ContentDigest,
    pub size: u64,
    pub location: StoredLocation,
}

// ============================================================================
// Workflow Stages
// ============================================================================

/// Per-upload state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Received,
    Digested,
    Stored,
    Skipped,
    Registered,
    Acknowledged,
    Failed,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Refusing to register empty content from {0}")]
    EmptyInput(String),

    #[error("Failed to compute digest: {0}")]
    DigestComputation(#[source] std::io::Error),

    #[error("Upload too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl UploadError {
    /// Stable code for each error kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput(_) => "EMPTY_INPUT",
            Self::DigestComputation(_) => "DIGEST_COMPUTATION",
            Self::TooLarge { .. } => "VALIDATION",
            Self::Storage(StorageError::Init { .. }) => "STORAGE_INIT",
            Self::Storage(StorageError::Write { .. }) => "STORAGE_WRITE",
            Self::Storage(StorageError::NotFound(_)) => "STORAGE_NOT_FOUND",
            Self::Storage(StorageError::Backend(_)) => "STORAGE_BACKEND",
            Self::Registry(RegistryError::Conflict(_)) => "REGISTRY_CONFLICT",
            Self::Registry(RegistryError::Validation(_)) => "VALIDATION",
            Self::Registry(RegistryError::Corrupt(_)) => "REGISTRY_CORRUPT",
            Self::Registry(RegistryError::Database(_)) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::EmptyInput(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Registry(RegistryError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Registry(RegistryError::Conflict(_)) => StatusCode::CONFLICT,
            Self::DigestComputation(_)
            | Self::Storage(_)
            | Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

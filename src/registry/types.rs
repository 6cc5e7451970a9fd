//! Content and origin records

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;

// ============================================================================
// Content Kind
// ============================================================================

/// Closed classification of stored content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Csv,
    Json,
    Xml,
    Pdf,
    Epub,
    Image,
    Archive,
    Binary,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Image => "image",
            Self::Archive => "archive",
            Self::Binary => "binary",
        }
    }

    /// Classify a MIME type
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "text/csv" => Self::Csv,
            "application/json" => Self::Json,
            "application/xml" | "text/xml" => Self::Xml,
            "application/pdf" => Self::Pdf,
            "application/epub+zip" => Self::Epub,
            "application/zip"
            | "application/gzip"
            | "application/x-gzip"
            | "application/x-tar"
            | "application/x-bzip2"
            | "application/x-xz"
            | "application/x-7z-compressed" => Self::Archive,
            m if m.starts_with("image/") => Self::Image,
            m if m.starts_with("text/") => Self::Text,
            _ => Self::Binary,
        }
    }

    /// Infer the kind from a file name's extension
    pub fn infer(name: &str) -> Self {
        mime_guess::from_path(name)
            .first()
            .map(|mime| Self::from_mime(mime.essence_str()))
            .unwrap_or(Self::Binary)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "pdf" => Ok(Self::Pdf),
            "epub" => Ok(Self::Epub),
            "image" => Ok(Self::Image),
            "archive" => Ok(Self::Archive),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown content kind: {}", other)),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Metadata captured from the first upload of a digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMetadata {
    pub name: String,
    pub kind: ContentKind,
    pub size: u64,
}

/// One record per distinct digest, owning its set of origin paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub digest: ContentDigest,
    pub name: String,
    pub kind: ContentKind,
    pub size: u64,
    pub origins: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One record per (digest, origin path)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginRecord {
    pub content_digest: ContentDigest,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of registering an origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Registration {
    /// First sighting of the digest; content and origin rows created
    Created,
    /// Known digest, new origin attached
    Linked,
    /// Digest and origin were both already known
    NoOp,
}

impl Registration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Linked => "linked",
            Self::NoOp => "no-op",
        }
    }
}

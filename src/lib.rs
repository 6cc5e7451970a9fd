//! File Registry
//!
//! Content-addressable file registry: every upload is identified by the
//! SHA-384 digest of its bytes, stored at most once, and linked to each
//! distinct path it was uploaded from.

pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod registry;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

pub use digest::ContentDigest;
pub use registry::{ContentKind, ContentRecord, Registration, Registry};
pub use upload::{UploadError, UploadReceipt, UploadRequest, Uploader};

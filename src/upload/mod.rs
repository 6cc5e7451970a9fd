//! Upload Module
//!
//! Ties the digest engine, backing store and registry together:
//! - SHA-384 content identity
//! - bytes stored at most once per digest
//! - every distinct origin recorded against its content
//!
//! Flow:
//! 1. Reject empty input
//! 2. Digest the bytes
//! 3. Store them unless the registry already knows the digest
//! 4. Register the origin (created / linked / no-op)

pub mod locks;
pub mod types;
pub mod workflow;

pub use locks::DigestLocks;
pub use types::*;
pub use workflow::Uploader;

//! Digest Engine
//!
//! Content identity is the lowercase hex SHA-384 of the file bytes. The same
//! bytes always produce the same digest, independent of origin, name or time.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Minimum accepted digest length
pub const MIN_DIGEST_LEN: usize = 1;

/// Maximum accepted digest length
pub const MAX_DIGEST_LEN: usize = 128;

/// Read block size used when digesting a stream: 64KB
const READ_BLOCK_SIZE: usize = 64 * 1024;

/// Rejected digest string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidDigest {
    #[error("digest must be 1-128 characters, got {0}")]
    Length(usize),

    #[error("digest contains a non-alphanumeric character: {0:?}")]
    Character(char),
}

/// Canonical identity of a piece of content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Validate an externally supplied digest string.
    ///
    /// Digests double as storage keys, so anything other than ASCII
    /// alphanumerics is refused.
    pub fn parse(value: &str) -> Result<Self, InvalidDigest> {
        let len = value.chars().count();
        if !(MIN_DIGEST_LEN..=MAX_DIGEST_LEN).contains(&len) {
            return Err(InvalidDigest::Length(len));
        }
        if let Some(c) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(InvalidDigest::Character(c));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two character prefix used to fan stored objects out into directories
    pub fn shard_prefix(&self) -> &str {
        &self.0[..2.min(self.0.len())]
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the digest of an in-memory buffer
pub fn digest_bytes(data: &[u8]) -> ContentDigest {
    let mut hasher = Sha384::new();
    hasher.update(data);
    ContentDigest(hex::encode(hasher.finalize()))
}

/// Read a stream to the end, hashing as it goes.
///
/// Returns the digest together with the bytes read. Any read failure is
/// returned as-is; no partial digest is ever produced.
pub async fn digest_reader<R>(mut reader: R) -> std::io::Result<(ContentDigest, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha384::new();
    let mut data = Vec::new();
    let mut block = vec![0u8; READ_BLOCK_SIZE];

    loop {
        let n = reader.read(&mut block).await?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
        data.extend_from_slice(&block[..n]);
    }

    Ok((ContentDigest(hex::encode(hasher.finalize())), data))
}

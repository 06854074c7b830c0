//! Content fingerprinting for duplicate-transfer suppression.
//!
//! The fingerprint is derived from file metadata only (name, size,
//! modification time, MIME type), never from the bytes, so it costs the same
//! for a 1 KB note and a 1 GB video. It is a concurrency key, not a security
//! digest.

use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata describing a candidate file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size_bytes: u64,
    /// Last modification time, milliseconds since the Unix epoch
    pub modified_ms: i64,
    pub mime_type: String,
}

impl FileDescriptor {
    pub fn new(
        name: impl Into<String>,
        size_bytes: u64,
        modified_ms: i64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            modified_ms,
            mime_type: mime_type.into(),
        }
    }

    /// Read a descriptor from file metadata, inferring the MIME type from the extension
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Ok(Self {
            mime_type: infer_mime_type(&name),
            name,
            size_bytes: metadata.len(),
            modified_ms,
        })
    }

    /// The string both strategies hash: `name-size-mtime-type`
    pub fn descriptor_string(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.name, self.size_bytes, self.modified_ms, self.mime_type
        )
    }
}

/// Infer the MIME type from a filename extension
pub fn infer_mime_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .to_string()
}

/// Hash used to derive fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStrategy {
    /// SHA-256 of the descriptor string, hex encoded
    #[default]
    Sha256,
    /// 32-bit multiplicative string hash, for hosts without a crypto backend
    Fast,
}

/// Stable deduplication key for a file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the fingerprint of a file descriptor
pub fn fingerprint(descriptor: &FileDescriptor, strategy: FingerprintStrategy) -> Fingerprint {
    let input = descriptor.descriptor_string();
    let digest = match strategy {
        FingerprintStrategy::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
        FingerprintStrategy::Fast => fast_hash(&input),
    };
    Fingerprint(digest)
}

/// `h = h * 31 + unit` over UTF-16 code units with 32-bit wraparound,
/// rendered as the hex of the absolute value.
fn fast_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    format!("{:x}", hash.unsigned_abs())
}

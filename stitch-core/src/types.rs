//! Core data types for stitch

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::SystemTime;

/// Position of a chunk within its upload. Byte order of the assembled
/// artifact is ascending `ChunkIndex`, never arrival order.
pub type ChunkIndex = u64;

/// Unique upload identifier using ULID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UploadId(ulid::Ulid);

impl UploadId {
    /// Generate a fresh id
    pub fn new() -> Self {
        UploadId(ulid::Ulid::new())
    }

    /// Create id from ULID
    pub fn from_ulid(ulid: ulid::Ulid) -> Self {
        UploadId(ulid)
    }

    /// Get the underlying ULID
    pub fn as_ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UploadId {
    type Err = crate::StitchError;

    fn from_str(s: &str) -> crate::Result<Self> {
        ulid::Ulid::from_string(s)
            .map(UploadId)
            .map_err(|e| crate::StitchError::InvalidId(format!("'{}': {}", s, e)))
    }
}

/// Opaque reference to bytes held by a chunk backend.
///
/// Only the backend that issued a handle knows how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    pub fn new(raw: impl Into<String>) -> Self {
        Handle(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an upload. The only transition is `Open -> Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Open,
    Finalized,
}

impl UploadState {
    pub fn is_finalized(&self) -> bool {
        matches!(self, UploadState::Finalized)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadState::Open => f.write_str("open"),
            UploadState::Finalized => f.write_str("finalized"),
        }
    }
}

/// Content hash for integrity verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create hash from data using BLAKE3
    pub fn new(data: &[u8]) -> Self {
        ContentHash(blake3::hash(data).into())
    }

    /// Create from existing hash bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ContentHash(bytes)
    }

    /// Get hash as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get hash as hex string
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        ContentHash(hash.into())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(hex: String) -> std::result::Result<Self, Self::Error> {
        blake3::Hash::from_hex(hex.as_str())
            .map(ContentHash::from)
            .map_err(|e| e.to_string())
    }
}

/// Client-supplied metadata fixed at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub name: String,
    pub content_type: String,
}

impl UploadMetadata {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        UploadMetadata {
            name: name.into(),
            content_type: content_type.into(),
        }
    }
}

/// Point-in-time view of an upload, safe to hand to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInfo {
    pub id: UploadId,
    pub name: String,
    pub content_type: String,
    pub state: UploadState,
    /// Chunks currently held while open, or chunks assembled once finalized
    pub chunk_count: usize,
    /// Artifact length in bytes; zero while open
    pub size: u64,
    pub digest: Option<ContentHash>,
    pub created_at: SystemTime,
    pub finalized_at: Option<SystemTime>,
}

impl UploadInfo {
    pub fn is_finalized(&self) -> bool {
        self.state.is_finalized()
    }
}

//! Chunk storage backends
//!
//! A backend owns raw bytes under handles it issues. It knows nothing about
//! upload state; the registry decides which handles are live.

use async_trait::async_trait;
use bytes::Bytes;
use stitch_core::*;
use tokio::io::AsyncRead;

pub mod fs;
pub mod keyspace;

pub use fs::FsBackend;
pub use keyspace::KeyspaceBackend;

/// Readable byte stream handed out by backends and accepted by `put`
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Wrap an in-memory payload as a [`ByteStream`]
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    Box::new(std::io::Cursor::new(data.into()))
}

/// Durable storage for chunk payloads and assembled artifacts
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &'static str;

    /// Allocate the scratch area for a new upload.
    /// Fails if the area already exists.
    async fn create_area(&self, upload: &UploadId) -> Result<()>;

    /// Consume `reader` to the end and store it under a fresh handle.
    ///
    /// The handle is only issued after the payload is fully durable; a put
    /// that fails or is dropped part way never yields a readable handle.
    async fn put(&self, upload: &UploadId, index: ChunkIndex, reader: ByteStream) -> Result<Handle>;

    /// Open the bytes behind a handle from the start
    async fn get(&self, handle: &Handle) -> Result<ByteStream>;

    /// Delete the bytes behind a handle
    async fn remove(&self, handle: &Handle) -> Result<()>;

    /// Start writing a new assembled artifact for `upload`
    async fn create_artifact(&self, upload: &UploadId) -> Result<Box<dyn ArtifactSink>>;

    /// Delete the scratch area and everything stored in it
    async fn remove_area(&self, upload: &UploadId) -> Result<()>;

    /// Release storage at end of life. The root itself is removed only if
    /// this backend created it.
    async fn teardown(&self) -> Result<()>;
}

/// Sequential writer for an artifact that becomes visible only on commit
#[async_trait]
pub trait ArtifactSink: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Make the artifact durable and return its handle
    async fn commit(self: Box<Self>) -> Result<Handle>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>) -> Result<()>;
}

//! Shared helpers for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stitch_core::*;
use stitch_engine::*;
use tokio::io::AsyncReadExt;

pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

/// Read an upload's artifact, panicking on any error
pub async fn read_artifact(store: &UploadStore, id: &UploadId) -> (UploadInfo, Vec<u8>) {
    match store.read(id).await {
        Ok((info, stream)) => (info, read_all(stream).await),
        Err(e) => panic!("read of {} failed: {}", id, e),
    }
}

/// Kind of the error returned by `read`
pub async fn read_error(store: &UploadStore, id: &UploadId) -> ErrorKind {
    match store.read(id).await {
        Ok(_) => panic!("read of {} unexpectedly succeeded", id),
        Err(e) => e.kind(),
    }
}

/// Filesystem backend with switchable faults
pub struct FaultyBackend {
    pub inner: FsBackend,
    pub fail_create_area: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_remove: AtomicBool,
    pub artifacts_created: AtomicUsize,
    /// Delay before each artifact is created, to widen race windows
    pub assembly_delay: Duration,
}

impl FaultyBackend {
    pub async fn new(root: impl AsRef<std::path::Path>) -> Arc<Self> {
        Self::with_delay(root, Duration::ZERO).await
    }

    pub async fn with_delay(root: impl AsRef<std::path::Path>, assembly_delay: Duration) -> Arc<Self> {
        Arc::new(FaultyBackend {
            inner: FsBackend::new(root).await.unwrap(),
            fail_create_area: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            artifacts_created: AtomicUsize::new(0),
            assembly_delay,
        })
    }

    fn injected(op: &str) -> StitchError {
        StitchError::StorageUnavailable(format!("injected {} failure", op))
    }
}

#[async_trait]
impl ChunkBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn create_area(&self, upload: &UploadId) -> Result<()> {
        if self.fail_create_area.load(Ordering::SeqCst) {
            return Err(Self::injected("create_area"));
        }
        self.inner.create_area(upload).await
    }

    async fn put(&self, upload: &UploadId, index: ChunkIndex, reader: ByteStream) -> Result<Handle> {
        self.inner.put(upload, index, reader).await
    }

    async fn get(&self, handle: &Handle) -> Result<ByteStream> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(handle).await
    }

    async fn remove(&self, handle: &Handle) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Self::injected("remove"));
        }
        self.inner.remove(handle).await
    }

    async fn create_artifact(&self, upload: &UploadId) -> Result<Box<dyn ArtifactSink>> {
        if !self.assembly_delay.is_zero() {
            tokio::time::sleep(self.assembly_delay).await;
        }
        self.artifacts_created.fetch_add(1, Ordering::SeqCst);
        self.inner.create_artifact(upload).await
    }

    async fn remove_area(&self, upload: &UploadId) -> Result<()> {
        self.inner.remove_area(upload).await
    }

    async fn teardown(&self) -> Result<()> {
        self.inner.teardown().await
    }
}

/// Store over a [`FaultyBackend`] rooted in `dir`
pub async fn faulty_store(dir: &tempfile::TempDir, delay: Duration) -> (UploadStore, Arc<FaultyBackend>) {
    let root = dir.path().join("uploads");
    let backend = FaultyBackend::with_delay(&root, delay).await;
    let store = UploadStore::with_backend(backend.clone(), StoreConfig::new(root));
    (store, backend)
}

//! Chunk backend on an embedded fjall keyspace
//!
//! All uploads share one partition. Keys are prefixed with the upload id:
//! `<upload>/area` marks the scratch area, `<upload>/chunk/<index>/<nonce>`
//! holds chunk payloads and `<upload>/final` the assembled artifact.

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stitch_core::*;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::fs::{remove_dir_if_present, root_exists};
use super::{ArtifactSink, ByteStream, ChunkBackend};

const PARTITION: &str = "uploads";

/// Chunk backend storing payloads as values in an LSM-tree
#[derive(Clone)]
pub struct KeyspaceBackend {
    keyspace: Arc<Keyspace>,
    partition: Arc<PartitionHandle>,
    root: PathBuf,
    /// `open` created the directory, so teardown may remove it
    owns_root: bool,
}

impl KeyspaceBackend {
    /// Open (or create) a keyspace at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let owns_root = !root_exists(&root).await?;

        let path = root.clone();
        let (keyspace, partition) = blocking("open keyspace", move || {
            let keyspace = Config::new(path).open()?;
            let partition = keyspace.open_partition(PARTITION, PartitionCreateOptions::default())?;
            Ok((keyspace, partition))
        })
        .await?;

        Ok(KeyspaceBackend {
            keyspace: Arc::new(keyspace),
            partition: Arc::new(partition),
            root,
            owns_root,
        })
    }

    fn area_key(upload: &UploadId) -> String {
        format!("{}/area", upload)
    }

    fn upload_prefix(upload: &UploadId) -> String {
        format!("{}/", upload)
    }

    /// Insert a value and persist the journal before returning
    async fn insert_durable(&self, op: &'static str, key: String, value: Vec<u8>) -> Result<()> {
        let keyspace = Arc::clone(&self.keyspace);
        let partition = Arc::clone(&self.partition);
        blocking(op, move || {
            partition.insert(key.as_bytes(), value)?;
            keyspace.persist(PersistMode::SyncAll)
        })
        .await
    }

    /// Remove every key starting with `prefix`
    async fn remove_prefix(&self, op: &'static str, prefix: String) -> Result<usize> {
        let keyspace = Arc::clone(&self.keyspace);
        let partition = Arc::clone(&self.partition);
        blocking(op, move || {
            let mut keys = Vec::new();
            for item in partition.prefix(prefix.as_bytes()) {
                let (key, _value) = item?;
                keys.push(key.to_vec());
            }
            for key in &keys {
                partition.remove(key.as_slice())?;
            }
            keyspace.persist(PersistMode::SyncAll)?;
            Ok(keys.len())
        })
        .await
    }
}

/// Run a fjall call off the async runtime
async fn blocking<T, F>(op: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> fjall::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StitchError::storage(op, e))?
        .map_err(|e| StitchError::storage(op, e))
}

#[async_trait]
impl ChunkBackend for KeyspaceBackend {
    fn name(&self) -> &'static str {
        "keyspace"
    }

    async fn create_area(&self, upload: &UploadId) -> Result<()> {
        let key = Self::area_key(upload);
        let partition = Arc::clone(&self.partition);
        let marker = key.clone();
        let exists = blocking("check scratch area", move || partition.contains_key(marker.as_bytes())).await?;
        if exists {
            return Err(StitchError::StorageUnavailable(format!(
                "scratch area for {} already exists",
                upload
            )));
        }
        self.insert_durable("create scratch area", key, Vec::new()).await
    }

    async fn put(&self, upload: &UploadId, index: ChunkIndex, mut reader: ByteStream) -> Result<Handle> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StitchError::storage(&format!("read chunk {}", index), e))?;

        let key = format!("{}/chunk/{:020}/{}", upload, index, ulid::Ulid::new());
        let size = data.len();
        self.insert_durable("write chunk", key.clone(), data).await?;

        debug!("Stored chunk {} of {} ({} bytes)", index, upload, size);
        Ok(Handle::new(key))
    }

    async fn get(&self, handle: &Handle) -> Result<ByteStream> {
        let partition = Arc::clone(&self.partition);
        let key = handle.as_str().to_string();
        let value = blocking("read value", move || partition.get(key.as_bytes())).await?;

        match value {
            Some(data) => Ok(Box::new(std::io::Cursor::new(data.to_vec()))),
            None => Err(StitchError::StorageUnavailable(format!("no value under handle '{}'", handle))),
        }
    }

    async fn remove(&self, handle: &Handle) -> Result<()> {
        let keyspace = Arc::clone(&self.keyspace);
        let partition = Arc::clone(&self.partition);
        let key = handle.as_str().to_string();
        blocking("remove value", move || {
            partition.remove(key.as_bytes())?;
            keyspace.persist(PersistMode::SyncAll)
        })
        .await
    }

    async fn create_artifact(&self, upload: &UploadId) -> Result<Box<dyn ArtifactSink>> {
        Ok(Box::new(KeyspaceArtifact {
            backend: self.clone(),
            key: format!("{}/final", upload),
            buffer: Vec::new(),
        }))
    }

    async fn remove_area(&self, upload: &UploadId) -> Result<()> {
        let removed = self.remove_prefix("remove scratch area", Self::upload_prefix(upload)).await?;
        debug!("Removed {} records of {}", removed, upload);
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let removed = self.remove_prefix("clear keyspace", String::new()).await?;
        debug!("Cleared {} records from keyspace", removed);

        if self.owns_root {
            remove_dir_if_present(&self.root).await?;
            debug!("Removed keyspace directory {}", self.root.display());
        }
        Ok(())
    }
}

/// Artifact buffered in memory and inserted as one value on commit
struct KeyspaceArtifact {
    backend: KeyspaceBackend,
    key: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl ArtifactSink for KeyspaceArtifact {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(buf);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<Handle> {
        let KeyspaceArtifact { backend, key, buffer } = *self;
        backend.insert_durable("write artifact", key.clone(), buffer).await?;
        Ok(Handle::new(key))
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

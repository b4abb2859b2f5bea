//! Upload registry: lifecycle state for every upload
//!
//! The registry is the only owner of upload records. Each record sits behind
//! its own async mutex, so work on one upload never waits on another.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use stitch_core::*;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assembly::{self, Assembled};
use crate::backend::{bytes_stream, ByteStream, ChunkBackend};
use crate::config::StoreConfig;

/// Registry record of one upload
#[derive(Debug)]
struct Upload {
    id: UploadId,
    metadata: UploadMetadata,
    state: UploadState,
    chunk_locations: HashMap<ChunkIndex, Handle>,
    final_location: Option<Handle>,
    assembled: Option<Assembled>,
    created_at: SystemTime,
    finalized_at: Option<SystemTime>,
}

impl Upload {
    fn new(id: UploadId, metadata: UploadMetadata) -> Self {
        Upload {
            id,
            metadata,
            state: UploadState::Open,
            chunk_locations: HashMap::new(),
            final_location: None,
            assembled: None,
            created_at: SystemTime::now(),
            finalized_at: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            UploadState::Open => Ok(()),
            UploadState::Finalized => Err(StitchError::AlreadyFinalized { id: self.id }),
        }
    }

    /// Flip to `Finalized`, returning the consumed chunk handles
    fn finish(&mut self, assembled: Assembled) -> Vec<Handle> {
        self.state = UploadState::Finalized;
        self.final_location = Some(assembled.location.clone());
        self.assembled = Some(assembled);
        self.finalized_at = Some(SystemTime::now());
        self.chunk_locations.drain().map(|(_, handle)| handle).collect()
    }

    fn info(&self) -> UploadInfo {
        let (chunk_count, size, digest) = match &self.assembled {
            Some(a) => (a.chunk_count, a.size, Some(a.digest)),
            None => (self.chunk_locations.len(), 0, None),
        };

        UploadInfo {
            id: self.id,
            name: self.metadata.name.clone(),
            content_type: self.metadata.content_type.clone(),
            state: self.state,
            chunk_count,
            size,
            digest,
            created_at: self.created_at,
            finalized_at: self.finalized_at,
        }
    }
}

/// Chunk-assembly store: register, append, finalize and read uploads
pub struct UploadStore {
    backend: Arc<dyn ChunkBackend>,
    uploads: DashMap<UploadId, Arc<Mutex<Upload>>>,
    config: StoreConfig,
}

impl UploadStore {
    /// Build the configured backend and an empty registry
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let backend = config.create_backend().await?;
        info!(
            "Upload store ready (backend: {}, root: {})",
            backend.name(),
            config.root.display()
        );
        Ok(Self::with_backend(backend, config))
    }

    /// Use an already constructed backend
    pub fn with_backend(backend: Arc<dyn ChunkBackend>, config: StoreConfig) -> Self {
        UploadStore {
            backend,
            uploads: DashMap::new(),
            config,
        }
    }

    /// Create a store in a temporary directory for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn temp() -> Result<(Self, tempfile::TempDir)> {
        let (config, dir) = StoreConfig::temp()?;
        let store = Self::open(config).await?;
        Ok((store, dir))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ChunkBackend {
        self.backend.as_ref()
    }

    /// Number of registered uploads
    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    fn lookup(&self, id: &UploadId) -> Result<Arc<Mutex<Upload>>> {
        self.uploads
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StitchError::NotFound { id: *id })
    }

    /// Register a new upload and allocate its scratch area
    pub async fn register(&self, name: impl Into<String>, content_type: impl Into<String>) -> Result<UploadId> {
        let metadata = UploadMetadata::new(name, content_type);

        loop {
            let id = UploadId::new();
            if self.uploads.contains_key(&id) {
                continue;
            }

            self.backend.create_area(&id).await?;

            match self.uploads.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(Upload::new(id, metadata.clone()))));
                }
                Entry::Occupied(_) => {
                    warn!("Upload id {} collided, drawing another", id);
                    continue;
                }
            }

            info!(
                "Registered upload {} (name: {}, content type: {})",
                id, metadata.name, metadata.content_type
            );
            return Ok(id);
        }
    }

    /// Store one chunk. A later chunk with the same index replaces this one.
    ///
    /// The payload is written without holding the upload's lock, so chunks of
    /// one upload can be written in parallel. The chunk only becomes part of
    /// the upload once its payload is fully durable.
    pub async fn append_chunk<R>(&self, id: &UploadId, index: ChunkIndex, reader: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let upload = self.lookup(id)?;
        upload.lock().await.ensure_open()?;

        let handle = self.backend.put(id, index, Box::new(reader)).await?;

        let superseded = {
            let mut record = upload.lock().await;
            if let Err(e) = record.ensure_open() {
                drop(record);
                // Finalized while the payload was in flight
                self.discard(id, &handle).await;
                return Err(e);
            }
            record.chunk_locations.insert(index, handle)
        };

        if let Some(old) = superseded {
            debug!("Chunk {} of {} overwritten", index, id);
            self.discard(id, &old).await;
        }

        debug!("Accepted chunk {} of {}", index, id);
        Ok(())
    }

    /// [`append_chunk`](Self::append_chunk) for an in-memory payload
    pub async fn append_bytes(&self, id: &UploadId, index: ChunkIndex, data: impl Into<bytes::Bytes>) -> Result<()> {
        self.append_chunk(id, index, bytes_stream(data)).await
    }

    /// Assemble all chunks into the final artifact and seal the upload.
    ///
    /// Holds the upload's lock for the whole assembly: concurrent appends wait
    /// and then see `AlreadyFinalized`, a concurrent finalize sees the same.
    /// On failure the upload stays open and may be finalized again.
    pub async fn finalize(&self, id: &UploadId) -> Result<()> {
        let upload = self.lookup(id)?;
        let mut record = upload.lock().await;
        record.ensure_open()?;

        let chunks: Vec<(ChunkIndex, Handle)> = record
            .chunk_locations
            .iter()
            .map(|(index, handle)| (*index, handle.clone()))
            .collect();

        let assembled = match assembly::assemble(self.backend.as_ref(), id, chunks).await {
            Ok(assembled) => assembled,
            Err(e) => {
                warn!("Finalize of {} failed, upload stays open: {}", id, e);
                return Err(e);
            }
        };

        info!(
            "Finalized upload {} ({} chunks, {} bytes, blake3 {})",
            id,
            assembled.chunk_count,
            assembled.size,
            assembled.digest.to_hex()
        );
        let consumed = record.finish(assembled);
        drop(record);

        if self.config.cleanup_chunks {
            let total = consumed.len();
            let removed = assembly::reclaim(self.backend.as_ref(), id, consumed).await;
            debug!("Reclaimed {}/{} chunks of {}", removed, total, id);
        }

        Ok(())
    }

    /// Metadata and a stream over the assembled artifact
    pub async fn read(&self, id: &UploadId) -> Result<(UploadInfo, ByteStream)> {
        let upload = self.lookup(id)?;
        let (info, location) = {
            let record = upload.lock().await;
            match &record.final_location {
                Some(location) if record.state.is_finalized() => (record.info(), location.clone()),
                _ => return Err(StitchError::NotReady { id: *id }),
            }
        };

        let stream = self.backend.get(&location).await?;
        Ok((info, stream))
    }

    /// Current view of an upload in any state
    pub async fn info(&self, id: &UploadId) -> Result<UploadInfo> {
        let upload = self.lookup(id)?;
        let record = upload.lock().await;
        Ok(record.info())
    }

    /// Release storage at end of life, if configured to
    pub async fn shutdown(&self) -> Result<()> {
        if !self.config.purge_on_shutdown {
            info!("Leaving storage root {} in place", self.config.root.display());
            return Ok(());
        }

        let ids: Vec<UploadId> = self.uploads.iter().map(|entry| *entry.key()).collect();
        self.uploads.clear();

        for id in &ids {
            if let Err(e) = self.backend.remove_area(id).await {
                warn!("Failed to remove scratch area of {}: {}", id, e);
            }
        }
        self.backend.teardown().await?;
        info!("Purged storage root {}", self.config.root.display());
        Ok(())
    }

    async fn discard(&self, id: &UploadId, handle: &Handle) {
        if let Err(e) = self.backend.remove(handle).await {
            warn!("Failed to discard chunk {} of {}: {}", handle, id, e);
        }
    }
}

//! Reassembly of chunk payloads into one artifact
//!
//! Byte order of the artifact is ascending chunk index. Gaps in the index
//! sequence are not an error: whatever indices are present are concatenated.

use stitch_core::*;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::backend::{ArtifactSink, ChunkBackend};

/// Size of the buffer used to copy chunk bytes into the artifact
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of a successful assembly
#[derive(Debug, Clone)]
pub struct Assembled {
    pub location: Handle,
    pub size: u64,
    pub digest: ContentHash,
    pub chunk_count: usize,
}

/// Order chunk locations by ascending index
pub fn assembly_order(chunks: impl IntoIterator<Item = (ChunkIndex, Handle)>) -> Vec<(ChunkIndex, Handle)> {
    let mut plan: Vec<_> = chunks.into_iter().collect();
    plan.sort_unstable_by_key(|(index, _)| *index);
    plan
}

/// Concatenate the given chunks into a fresh artifact.
///
/// Each chunk is copied in full before the next one is opened. The artifact
/// is committed only after every chunk was copied; on any failure it is
/// aborted and the error returned, leaving no artifact behind.
pub async fn assemble(
    backend: &dyn ChunkBackend,
    upload: &UploadId,
    chunks: impl IntoIterator<Item = (ChunkIndex, Handle)>,
) -> Result<Assembled> {
    let plan = assembly_order(chunks);
    let mut sink = backend.create_artifact(upload).await?;

    match copy_chunks(backend, &plan, sink.as_mut()).await {
        Ok((size, digest)) => {
            let location = sink.commit().await?;
            debug!("Assembled {} chunks of {} into {} ({} bytes)", plan.len(), upload, location, size);
            Ok(Assembled {
                location,
                size,
                digest,
                chunk_count: plan.len(),
            })
        }
        Err(e) => {
            if let Err(abort_err) = sink.abort().await {
                warn!("Failed to abort artifact of {}: {}", upload, abort_err);
            }
            Err(e)
        }
    }
}

async fn copy_chunks(
    backend: &dyn ChunkBackend,
    plan: &[(ChunkIndex, Handle)],
    sink: &mut dyn ArtifactSink,
) -> Result<(u64, ContentHash)> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut size = 0u64;

    for (index, handle) in plan {
        let mut reader = backend.get(handle).await?;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| StitchError::storage(&format!("read chunk {}", index), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            sink.write(&buf[..n]).await?;
            size += n as u64;
        }
    }

    Ok((size, hasher.finalize().into()))
}

/// Best-effort removal of consumed chunk payloads. Failures are logged only.
pub async fn reclaim(backend: &dyn ChunkBackend, upload: &UploadId, handles: Vec<Handle>) -> usize {
    let mut removed = 0;
    for handle in handles {
        match backend.remove(&handle).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to reclaim chunk {} of {}: {}", handle, upload, e),
        }
    }
    removed
}

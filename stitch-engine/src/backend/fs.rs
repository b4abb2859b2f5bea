//! Filesystem chunk backend
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<upload>/<index>-<nonce>.chunk      one file per accepted chunk
//! <root>/<upload>/<upload>.final             assembled artifact
//! <root>/<upload>/*.partial                  in-flight writes, never handed out
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use stitch_core::*;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ArtifactSink, ByteStream, ChunkBackend};

const PARTIAL_SUFFIX: &str = ".partial";

/// Chunk backend storing one directory per upload below `root`
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    /// `new` created the root, so teardown may remove it
    owns_root: bool,
}

impl FsBackend {
    /// Create the backend, creating `root` if needed
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let owns_root = !root_exists(&root).await?;
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StitchError::storage(&format!("create storage root {}", root.display()), e))?;
        debug!("Filesystem backend rooted at {}", root.display());
        Ok(FsBackend { root, owns_root })
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory of an upload
    pub fn area_path(&self, upload: &UploadId) -> PathBuf {
        self.root.join(upload.to_string())
    }

    fn handle_for(upload: &UploadId, file_name: &str) -> Handle {
        Handle::new(format!("{}/{}", upload, file_name))
    }

    /// Map a handle issued by this backend back to a path inside the root
    fn resolve(&self, handle: &Handle) -> Result<PathBuf> {
        let invalid = || StitchError::StorageUnavailable(format!("unrecognised handle '{}'", handle));

        let (area, file_name) = handle.as_str().split_once('/').ok_or_else(invalid)?;
        let upload: UploadId = area.parse().map_err(|_| invalid())?;

        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.starts_with('.')
        {
            return Err(invalid());
        }

        Ok(self.area_path(&upload).join(file_name))
    }
}

#[async_trait]
impl ChunkBackend for FsBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn create_area(&self, upload: &UploadId) -> Result<()> {
        let area = self.area_path(upload);
        fs::create_dir(&area)
            .await
            .map_err(|e| StitchError::storage(&format!("create scratch area {}", area.display()), e))
    }

    async fn put(&self, upload: &UploadId, index: ChunkIndex, mut reader: ByteStream) -> Result<Handle> {
        let file_name = format!("{:020}-{}.chunk", index, ulid::Ulid::new());
        let final_path = self.area_path(upload).join(&file_name);
        let mut partial = PartialFile::create(final_path.with_file_name(format!("{}{}", file_name, PARTIAL_SUFFIX)))
            .await?;

        let written = tokio::io::copy(&mut reader, partial.file_mut())
            .await
            .map_err(|e| StitchError::storage(&format!("write chunk {}", index), e))?;
        partial.persist(&final_path).await?;

        debug!("Stored chunk {} of {} ({} bytes)", index, upload, written);
        Ok(Self::handle_for(upload, &file_name))
    }

    async fn get(&self, handle: &Handle) -> Result<ByteStream> {
        let path = self.resolve(handle)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| StitchError::storage(&format!("open {}", handle), e))?;
        Ok(Box::new(file))
    }

    async fn remove(&self, handle: &Handle) -> Result<()> {
        let path = self.resolve(handle)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| StitchError::storage(&format!("remove {}", handle), e))
    }

    async fn create_artifact(&self, upload: &UploadId) -> Result<Box<dyn ArtifactSink>> {
        let file_name = format!("{}.final", upload);
        let final_path = self.area_path(upload).join(&file_name);
        let partial = PartialFile::create(
            final_path.with_file_name(format!("{}.{}{}", file_name, ulid::Ulid::new(), PARTIAL_SUFFIX)),
        )
        .await?;

        Ok(Box::new(FsArtifact {
            partial,
            final_path,
            handle: Self::handle_for(upload, &file_name),
        }))
    }

    async fn remove_area(&self, upload: &UploadId) -> Result<()> {
        remove_dir_if_present(&self.area_path(upload)).await
    }

    async fn teardown(&self) -> Result<()> {
        if !self.owns_root {
            debug!("Storage root {} existed before the store, leaving it", self.root.display());
            return Ok(());
        }
        remove_dir_if_present(&self.root).await?;
        debug!("Removed storage root {}", self.root.display());
        Ok(())
    }
}

pub(crate) async fn root_exists(root: &Path) -> Result<bool> {
    fs::try_exists(root)
        .await
        .map_err(|e| StitchError::storage(&format!("inspect storage root {}", root.display()), e))
}

pub(crate) async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StitchError::storage(&format!("remove {}", path.display()), e)),
    }
}

/// A file being written under a temporary name.
///
/// Renamed into place by `persist`; deleted on drop otherwise, so a write
/// abandoned by its caller leaves nothing that looks complete.
struct PartialFile {
    file: fs::File,
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    async fn create(path: PathBuf) -> Result<Self> {
        let file = fs::File::create(&path)
            .await
            .map_err(|e| StitchError::storage(&format!("create {}", path.display()), e))?;
        Ok(PartialFile {
            file,
            path,
            persisted: false,
        })
    }

    fn file_mut(&mut self) -> &mut fs::File {
        &mut self.file
    }

    async fn persist(&mut self, target: &Path) -> Result<()> {
        self.file.flush().await?;
        self.file
            .sync_all()
            .await
            .map_err(|e| StitchError::storage(&format!("sync {}", self.path.display()), e))?;
        fs::rename(&self.path, target)
            .await
            .map_err(|e| StitchError::storage(&format!("publish {}", target.display()), e))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial file {}: {}", self.path.display(), e);
            }
        }
    }
}

struct FsArtifact {
    partial: PartialFile,
    final_path: PathBuf,
    handle: Handle,
}

#[async_trait]
impl ArtifactSink for FsArtifact {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.partial
            .file_mut()
            .write_all(buf)
            .await
            .map_err(|e| StitchError::storage("write artifact", e))
    }

    async fn commit(self: Box<Self>) -> Result<Handle> {
        let FsArtifact {
            mut partial,
            final_path,
            handle,
        } = *self;
        partial.persist(&final_path).await?;
        Ok(handle)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        // Dropping the partial file removes it
        drop(self);
        Ok(())
    }
}

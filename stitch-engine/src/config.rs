//! Configuration for the upload store and its chunk backend

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use stitch_core::*;
use tracing::{info, warn};

use crate::backend::{ChunkBackend, FsBackend, KeyspaceBackend};

pub const ENV_STORAGE_ROOT: &str = "STITCH_STORAGE_ROOT";
pub const ENV_BACKEND: &str = "STITCH_BACKEND";
pub const ENV_CLEANUP_CHUNKS: &str = "STITCH_CLEANUP_CHUNKS";
pub const ENV_PURGE_ON_SHUTDOWN: &str = "STITCH_PURGE_ON_SHUTDOWN";

/// Available chunk backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Filesystem,
    Keyspace,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" | "local" => Ok(BackendKind::Filesystem),
            "keyspace" | "lsm" | "fjall" => Ok(BackendKind::Keyspace),
            _ => Err(format!("Unknown chunk backend: {}", s)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Filesystem => f.write_str("filesystem"),
            BackendKind::Keyspace => f.write_str("keyspace"),
        }
    }
}

/// Configuration for the upload store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding every upload's scratch area
    pub root: PathBuf,
    pub backend: BackendKind,
    /// Delete chunk payloads once an upload is finalized
    pub cleanup_chunks: bool,
    /// On shutdown remove every scratch area, and the root if the store created it
    pub purge_on_shutdown: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from("./data/uploads"),
            backend: BackendKind::default(),
            cleanup_chunks: true,
            purge_on_shutdown: true,
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_cleanup_chunks(mut self, cleanup: bool) -> Self {
        self.cleanup_chunks = cleanup;
        self
    }

    pub fn with_purge_on_shutdown(mut self, purge: bool) -> Self {
        self.purge_on_shutdown = purge;
        self
    }

    /// Create a configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let root = env::var(ENV_STORAGE_ROOT)
            .map(PathBuf::from)
            .unwrap_or(defaults.root);

        let backend = match env::var(ENV_BACKEND) {
            Ok(value) => match value.parse::<BackendKind>() {
                Ok(backend) => {
                    info!("Using chunk backend from environment: {}", backend);
                    backend
                }
                Err(e) => {
                    warn!("Invalid chunk backend in environment: {}. Using default {}.", e, defaults.backend);
                    defaults.backend
                }
            },
            Err(_) => defaults.backend,
        };

        StoreConfig {
            root,
            backend,
            cleanup_chunks: env_flag(ENV_CLEANUP_CHUNKS, defaults.cleanup_chunks),
            purge_on_shutdown: env_flag(ENV_PURGE_ON_SHUTDOWN, defaults.purge_on_shutdown),
        }
    }

    /// Configuration rooted in a fresh temporary directory
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let dir = tempfile::tempdir().map_err(|e| StitchError::storage("create temp dir", e))?;
        Ok((Self::new(dir.path().join("uploads")), dir))
    }

    /// Construct the configured backend, creating the storage root
    pub async fn create_backend(&self) -> Result<Arc<dyn ChunkBackend>> {
        let backend: Arc<dyn ChunkBackend> = match self.backend {
            BackendKind::Filesystem => Arc::new(FsBackend::new(&self.root).await?),
            BackendKind::Keyspace => Arc::new(KeyspaceBackend::open(&self.root).await?),
        };
        Ok(backend)
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => parse_flag(&value).unwrap_or_else(|| {
            warn!("Invalid boolean in {}: '{}'. Using default {}.", name, value, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

//! Chunk-assembly store
//!
//! Uploads arrive as independently transmitted chunks in any order. The
//! [`UploadStore`] tracks each upload from registration to finalization,
//! keeps every accepted chunk durable through a [`ChunkBackend`], and on
//! finalize concatenates the chunks in ascending index order.

pub mod assembly;
pub mod backend;
pub mod config;
pub mod registry;

pub use assembly::{assemble, assembly_order, Assembled};
pub use backend::{bytes_stream, ArtifactSink, ByteStream, ChunkBackend, FsBackend, KeyspaceBackend};
pub use config::{BackendKind, StoreConfig};
pub use registry::UploadStore;

//! Core data models and types for stitch

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Result type alias for stitch operations
pub type Result<T> = std::result::Result<T, StitchError>;

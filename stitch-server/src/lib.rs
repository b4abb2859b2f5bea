//! HTTP front end for the stitch upload store

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ServerError};
pub use handlers::{handle_request, PrepareResponse, Route, UploadView};
pub use server::StitchServer;

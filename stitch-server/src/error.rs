//! Error types for the HTTP adapter

use hyper::StatusCode;
use stitch_core::{ErrorKind, StitchError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StitchError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No route for {0}")]
    NoRoute(String),
}

impl ApiError {
    /// Transport status for this error. Every store error kind has its own.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::AlreadyFinalized => StatusCode::CONFLICT,
                ErrorKind::NotReady => StatusCode::PRECONDITION_FAILED,
                ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::InvalidId => StatusCode::BAD_REQUEST,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NoRoute(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Stable machine-readable code for the response body
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Store(e) => e.kind().code(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NoRoute(_) => "no_route",
        }
    }
}

/// Errors that stop the server itself
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to accept connection: {0}")]
    Accept(#[from] std::io::Error),
}

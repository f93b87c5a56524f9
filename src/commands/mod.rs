//! HTTP command handlers
//!
//! Each handler takes the shared [`Vfs`](crate::vfs::Vfs) and turns service
//! results into JSON replies or [`ApiError`] rejections.

pub mod changes;
pub mod files;

pub use changes::*;
pub use files::*;

use std::io;
use thiserror::Error;
use warp::http::StatusCode;

use crate::vfs::{TranslateError, UnknownKind, VfsError};

/// Errors returned to HTTP callers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownKind(_) | ApiError::Translate(_) => StatusCode::BAD_REQUEST,
            ApiError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Vfs(_) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let denied = ApiError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let bad_kind = ApiError::from("Folder".parse::<crate::vfs::ScriptKind>().unwrap_err());
        assert_eq!(bad_kind.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rejection_keeps_api_error() {
        let rejection: warp::Rejection = ApiError::from(io::Error::from(io::ErrorKind::NotFound)).into();

        let found = rejection.find::<ApiError>().map(ApiError::status);
        assert_eq!(found, Some(StatusCode::NOT_FOUND));
    }
}

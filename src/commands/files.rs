use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use warp::http::header::CONTENT_TYPE;
use warp::http::Response;

use super::ApiError;
use crate::utils::atomic_write;
use crate::vfs::{ObjectIdentity, ScriptKind, Vfs};

/// Script listing response
#[derive(Serialize)]
pub struct FilesResponse {
    pub files: Vec<ObjectIdentity>,
}

/// Write acknowledgement
#[derive(Serialize)]
pub struct WriteResponse {
    pub success: bool,
}

fn identity(name: String, kind: &str) -> Result<ObjectIdentity, ApiError> {
    Ok(ObjectIdentity::new(name, kind.parse::<ScriptKind>()?))
}

/// List every script under the root directory
pub async fn list_files(vfs: Arc<Vfs>) -> Result<impl warp::Reply, warp::Rejection> {
    // Directory scans block; keep them off the async workers
    let files = tokio::task::spawn_blocking(move || vfs.list_all())
        .await
        .map_err(ApiError::from)?
        .map_err(ApiError::from)?;

    Ok(warp::reply::json(&FilesResponse { files }))
}

/// Stream the raw contents of a script
pub async fn read_file(
    name: String,
    kind: String,
    vfs: Arc<Vfs>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let identity = identity(name, &kind)?;
    let path = vfs.resolve_read_path(&identity).map_err(ApiError::from)?;

    let contents = tokio::fs::read(&path).await.map_err(ApiError::from)?;

    Response::builder()
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(contents)
        .map_err(|e| ApiError::Io(std::io::Error::other(e)).into())
}

/// Create or overwrite a script with the request body
pub async fn write_file(
    name: String,
    kind: String,
    body: Bytes,
    vfs: Arc<Vfs>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let identity = identity(name, &kind)?;
    let path = vfs.resolve_write_path(&identity).map_err(ApiError::from)?;

    let size = body.len();
    let target = path.clone();
    tokio::task::spawn_blocking(move || atomic_write(&target, &body))
        .await
        .map_err(ApiError::from)?
        .map_err(ApiError::from)?;

    tracing::info!(size, path = %path.display(), "Wrote script");
    Ok(warp::reply::json(&WriteResponse { success: true }))
}

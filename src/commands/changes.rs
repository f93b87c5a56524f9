use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

use crate::vfs::Vfs;

/// Clock reading response
#[derive(Serialize)]
pub struct NowResponse {
    pub now: f64,
}

/// Current clock reading
pub async fn get_now(vfs: Arc<Vfs>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&NowResponse { now: vfs.now() }))
}

/// Changes at or after `timestamp`, with the clock reading for the next poll
pub async fn get_changed_since(timestamp: f64, vfs: Arc<Vfs>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&vfs.changes_since(timestamp)))
}

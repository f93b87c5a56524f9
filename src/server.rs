//! HTTP server
//!
//! Exposes the change tracking service to the sync plugin.

use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

use crate::commands::{self, ApiError};
use crate::vfs::Vfs;

/// Largest accepted script upload
pub const MAX_BODY_SIZE: u64 = 25 * 1024 * 1024;

/// Bumped when the wire format changes incompatibly
pub const PROTOCOL_VERSION: u64 = 0;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfo {
    server_version: &'static str,
    protocol_version: u64,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn with_vfs(vfs: Arc<Vfs>) -> impl Filter<Extract = (Arc<Vfs>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&vfs))
}

/// All routes, with rejections turned into JSON error replies
pub fn routes(
    vfs: Arc<Vfs>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let index = warp::path::end().and(warp::get()).map(|| {
        warp::reply::json(&ServerInfo {
            server_version: env!("CARGO_PKG_VERSION"),
            protocol_version: PROTOCOL_VERSION,
        })
    });

    let version = warp::path!("version")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "version": env!("CARGO_PKG_VERSION") })));

    let now = warp::path!("now")
        .and(warp::get())
        .and(with_vfs(vfs.clone()))
        .and_then(commands::get_now);

    let changed_since = warp::path!("changed-since" / f64)
        .and(warp::get())
        .and(with_vfs(vfs.clone()))
        .and_then(commands::get_changed_since);

    let list = warp::path!("files")
        .and(warp::get())
        .and(with_vfs(vfs.clone()))
        .and_then(commands::list_files);

    let read = warp::path!("files" / String / String)
        .and(warp::get())
        .and(with_vfs(vfs.clone()))
        .and_then(commands::read_file);

    let write = warp::path!("files" / String / String)
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_SIZE))
        .and(warp::body::bytes())
        .and(with_vfs(vfs))
        .and_then(commands::write_file);

    index
        .or(version)
        .or(now)
        .or(changed_since)
        .or(list)
        .or(read)
        .or(write)
        .with(warp::trace::request())
        .recover(handle_rejection)
}

async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(api) = err.find::<ApiError>() {
        (api.status(), api.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        (StatusCode::BAD_REQUEST, format!("{:?}", err))
    };

    if status.is_server_error() {
        tracing::warn!("Request failed: {}", message);
    }

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        status,
    ))
}

/// Serve on localhost until `shutdown` resolves
pub async fn serve(
    vfs: Arc<Vfs>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), warp::Error> {
    let (addr, server) = warp::serve(routes(vfs))
        .try_bind_with_graceful_shutdown(SocketAddr::from(([127, 0, 0, 1], port)), shutdown)?;

    tracing::info!("Server listening on port {}", addr.port());
    server.await;
    tracing::info!("Server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::watcher::{ManualWatchHandle, ManualWatchSource, WatchEvent};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn setup(root_object: &str) -> (TempDir, Arc<Vfs>, ManualWatchHandle) {
        let dir = tempdir().unwrap();
        let (source, handle) = ManualWatchSource::new();
        let vfs = Vfs::new(dir.path(), root_object, Box::new(source)).unwrap();
        (dir, Arc::new(vfs), handle)
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_index_and_version() {
        let (_dir, vfs, _handle) = setup("");
        let api = routes(vfs);

        let res = warp::test::request().path("/").reply(&api).await;
        assert_eq!(res.status(), 200);
        assert_eq!(json(res.body())["protocolVersion"], 0);

        let res = warp::test::request().path("/version").reply(&api).await;
        assert_eq!(json(res.body())["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_now_is_non_decreasing() {
        let (_dir, vfs, _handle) = setup("");
        let api = routes(vfs);

        let first = warp::test::request().path("/now").reply(&api).await;
        let second = warp::test::request().path("/now").reply(&api).await;

        let a = json(first.body())["now"].as_f64().unwrap();
        let b = json(second.body())["now"].as_f64().unwrap();
        assert!(b >= a);
    }

    #[tokio::test]
    async fn test_changed_since() {
        let (_dir, vfs, handle) = setup("Game");
        let root = vfs.root_directory().to_path_buf();

        vfs.start_watching().unwrap();
        handle.push(WatchEvent::changed(root.join("a/b.server.lua")));
        vfs.stop_watching();

        let api = routes(Arc::clone(&vfs));
        let res = warp::test::request().path("/changed-since/0").reply(&api).await;
        assert_eq!(res.status(), 200);

        let body = json(res.body());
        assert_eq!(body["changed"][0]["type"], "change");
        assert_eq!(body["changed"][0]["object"]["name"], "Game.a.b");
        assert_eq!(body["changed"][0]["object"]["type"], "Script");

        let now = body["now"].as_f64().unwrap();
        let res = warp::test::request()
            .path(&format!("/changed-since/{}", now + 1.0))
            .reply(&api)
            .await;
        assert_eq!(json(res.body())["changed"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_list_files() {
        let (dir, vfs, _handle) = setup("");
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.lua"), "return {}").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();

        let api = routes(vfs);
        let res = warp::test::request().path("/files").reply(&api).await;

        assert_eq!(res.status(), 200);
        assert_eq!(
            json(res.body()),
            serde_json::json!({ "files": [{ "name": "lib.util", "type": "ModuleScript" }] })
        );
    }

    #[tokio::test]
    async fn test_write_then_read_file() {
        let (_dir, vfs, _handle) = setup("Game");
        let api = routes(Arc::clone(&vfs));

        let res = warp::test::request()
            .method("POST")
            .path("/files/Game.net.remote/LocalScript")
            .body("print('client')")
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(json(res.body()), serde_json::json!({ "success": true }));

        let on_disk = vfs.root_directory().join("net").join("remote.client.lua");
        assert_eq!(fs::read_to_string(on_disk).unwrap(), "print('client')");

        let res = warp::test::request()
            .path("/files/Game.net.remote/Client")
            .reply(&api)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body().as_ref(), b"print('client')");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let (_dir, vfs, _handle) = setup("");
        let api = routes(vfs);

        let res = warp::test::request().path("/files/missing/ModuleScript").reply(&api).await;
        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_bad_kind_and_name_are_rejected() {
        let (_dir, vfs, _handle) = setup("");
        let api = routes(vfs);

        let res = warp::test::request().path("/files/a/Folder").reply(&api).await;
        assert_eq!(res.status(), 400);

        let res = warp::test::request().path("/files/a..b/Script").reply(&api).await;
        assert_eq!(res.status(), 400);
    }
}

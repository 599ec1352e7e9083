// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Static serving of the observer UI directory.
//!
//! The UI itself is an external collaborator; this module only hands its
//! files out. `/` maps to `index.html`.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{Response, StatusCode};
use std::convert::Infallible;
use std::path::Path;

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

fn not_found() -> Response<BoxBody<Bytes, Infallible>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("not found")).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("not found")).boxed()))
}

/// Serve one file from `static_dir` for the given request path.
pub async fn serve(static_dir: &str, request_path: &str) -> Response<BoxBody<Bytes, Infallible>> {
    let relative = match request_path {
        "/" | "" => "index.html",
        p => p.trim_start_matches('/'),
    };

    // No escaping the served directory.
    if relative.split('/').any(|seg| seg == "..") {
        return not_found();
    }

    let full = Path::new(static_dir).join(relative);
    match tokio::fs::read(&full).await {
        Ok(contents) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", content_type_for(&full))
            .body(Full::new(Bytes::from(contents)).boxed())
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()).boxed())),
        Err(_) => not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tokio::fs;
    use uuid::Uuid;

    async fn make_static_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("wirelens_static_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).await.expect("create dir");
        fs::write(dir.join("index.html"), "<html>lens</html>")
            .await
            .expect("write index");
        fs::write(dir.join("app.js"), "console.log(1)")
            .await
            .expect("write js");
        dir
    }

    #[tokio::test]
    async fn root_serves_index_html() {
        let dir = make_static_dir().await;
        let resp = serve(dir.to_str().expect("utf8 path"), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/html; charset=utf-8")
        );
        let body = resp.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(body.as_ref(), b"<html>lens</html>");
        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn js_gets_its_content_type() {
        let dir = make_static_dir().await;
        let resp = serve(dir.to_str().expect("utf8 path"), "/app.js").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/javascript; charset=utf-8")
        );
        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let dir = make_static_dir().await;
        let resp = serve(dir.to_str().expect("utf8 path"), "/nope.html").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = make_static_dir().await;
        let resp = serve(dir.to_str().expect("utf8 path"), "/../../etc/passwd").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let _ = fs::remove_dir_all(&dir).await;
    }
}

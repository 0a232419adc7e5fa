//! Built web client

use axum::Router;
use axum::http::{StatusCode, Uri};
use log::warn;
use std::path::Path;
use tower::ServiceBuilder;
use tower_http::services::{ServeDir, ServeFile};

/// Serves the client build with single-page-app fallback to `index.html`.
///
/// Without a build every non-API path answers 404 with a hint.
pub fn router(build_dir: &Path) -> Router {
    if build_dir.is_dir() {
        let index = build_dir.join("index.html");
        Router::new().fallback_service(
            ServiceBuilder::new().service(ServeDir::new(build_dir).fallback(ServeFile::new(index))),
        )
    } else {
        warn!(
            "client build directory {} not found, serving API only",
            build_dir.display()
        );
        Router::new().fallback(missing_build)
    }
}

async fn missing_build(uri: Uri) -> (StatusCode, &'static str) {
    if uri.path().starts_with("/api") {
        (StatusCode::NOT_FOUND, "Not found")
    } else {
        (
            StatusCode::NOT_FOUND,
            "Client build not found. Build the web client or point CLIENT_BUILD_DIR at it.",
        )
    }
}

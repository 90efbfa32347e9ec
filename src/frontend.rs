//! 前端静态资源：首页、图标与 `/assets` 目录。

use axum::Router;
use std::path::Path;
use tower_http::services::{ServeDir, ServeFile};

/// 从静态目录提供 `index.html`、`favicon.ico` 与 `assets/`。
pub fn static_routes(static_dir: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .route_service("/favicon.ico", ServeFile::new(static_dir.join("favicon.ico")))
        .nest_service("/assets", ServeDir::new(static_dir.join("assets")))
}

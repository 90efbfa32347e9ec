//! justfiles server binary.
//!
//! Shares one directory over HTTP: listing, multipart upload, directory
//! creation and zip download of whole subtrees. Every client path is confined
//! to the configured root; archives are generated into a private scratch
//! directory that is removed on shutdown.

mod archive;
mod atomic;
mod config;
mod error;
mod files;
mod frontend;
mod http;
mod locking;
mod logging;
mod storage;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::archive::{Archiver, ScratchDir};
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::storage::Storage;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.root_dir))?);
    storage.ensure_root().await?;
    let archiver = Arc::new(Archiver::new(ScratchDir::create()?));
    let share_config = Arc::new(args.share_config());
    info!(
        root = %storage.root_path().display(),
        scratch = %archiver.scratch().path().display(),
        keep_archives = share_config.keep_archives,
        "sharing directory"
    );

    let mut app = Router::new()
        .route("/files", get(files::list_root))
        .route("/files/", get(files::list_root))
        .route("/files/{*path}", get(files::list_files))
        .route(
            "/upload",
            post(upload::upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route("/mkdir/{*path}", post(files::create_directory))
        .route("/download-zip/", get(files::download_root_zip))
        .route("/download-zip/{*path}", get(files::download_zip))
        .merge(frontend::static_routes(&PathBuf::from(&args.static_dir)))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(archiver.clone()))
        .layer(Extension(share_config));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", addr);
    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::spawn(shutdown_signal(handle));
    // archives may still be streaming until the graceful drain finishes
    let result = server.await;
    archiver.scratch().teardown();
    result
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}

//! 目录列表、目录创建与目录打包下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::stream::StreamExt;
use std::sync::Arc;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::archive::{Archiver, RemoveOnDrop};
use crate::config::ShareConfig;
use crate::error::ApiError;
use crate::storage::{DirListing, Storage, StorageError};

/// 列出共享根目录。
pub async fn list_root(
    storage: Extension<Arc<Storage>>,
    config: Extension<Arc<ShareConfig>>,
) -> Result<JsonResponse<DirListing>, ApiError> {
    list_files(Path(String::new()), storage, config).await
}

/// 列出目录中的文件与子目录（各自按名称排序）。
pub async fn list_files(
    Path(path): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<ShareConfig>>,
) -> Result<JsonResponse<DirListing>, ApiError> {
    let listing = storage.list_dir(&path, config.show_hidden).await?;
    info!(
        path,
        files = listing.files.len(),
        folders = listing.folders.len(),
        "list files"
    );
    Ok(JsonResponse(listing))
}

/// 创建单级目录。
pub async fn create_directory(
    Path(path): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<StatusCode, ApiError> {
    storage.create_dir(&path).await.map_err(|err| match err {
        StorageError::Io(err) => ApiError::internal(err),
        other => other.into(),
    })?;
    info!(path, "create directory");
    Ok(StatusCode::CREATED)
}

/// 打包并下载共享根目录。
pub async fn download_root_zip(
    storage: Extension<Arc<Storage>>,
    archiver: Extension<Arc<Archiver>>,
    config: Extension<Arc<ShareConfig>>,
) -> Result<Response, ApiError> {
    download_zip(Path(String::new()), storage, archiver, config).await
}

/// 打包目录为 zip 并以附件形式返回。
pub async fn download_zip(
    Path(path): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(archiver): Extension<Arc<Archiver>>,
    Extension(config): Extension<Arc<ShareConfig>>,
) -> Result<Response, ApiError> {
    let source = storage.resolve(&path)?;
    let metadata = fs::metadata(&source).await.map_err(StorageError::from)?;
    if !metadata.is_dir() {
        return Err(ApiError::BadRequest("path is not a directory".into()));
    }

    let archive = archiver
        .build(storage.root_path(), &source, &path)
        .await?;
    let mime = mime_guess::from_path(&archive.file_name).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", archive.file_name))
            .map_err(|_| ApiError::Internal("invalid header".into()))?,
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&archive.size.to_string())
            .map_err(|_| ApiError::Internal("invalid header".into()))?,
    );

    info!(
        path,
        file_name = archive.file_name,
        size = archive.size,
        keep = config.keep_archives,
        "download zip"
    );
    let stream = ReaderStream::new(fs::File::from_std(archive.file));
    let body = if config.keep_archives {
        AxumBody::from_stream(stream)
    } else {
        let guard = RemoveOnDrop(archive.path);
        AxumBody::from_stream(stream.map(move |chunk| {
            let _guard = &guard;
            chunk
        }))
    };
    Ok((StatusCode::OK, headers, body).into_response())
}

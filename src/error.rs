//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io::{self, ErrorKind};
use tracing::error;

use crate::archive::ArchiveError;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    /// 服务端 I/O 故障：记录完整错误，响应中只保留错误类别。
    pub fn internal(err: io::Error) -> Self {
        error!(error = %err, "io failure");
        ApiError::Internal(err.kind().to_string())
    }

    fn not_found(err: io::Error) -> Self {
        tracing::debug!(error = %err, "not found");
        ApiError::NotFound(err.kind().to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, class, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };
        (status, Json(json!({ "error": class, "message": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::not_found(err),
                _ => ApiError::internal(err),
            },
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(error: ArchiveError) -> Self {
        match error {
            ArchiveError::Busy => ApiError::Conflict("archive busy".into()),
            ArchiveError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::not_found(err),
                _ => ApiError::internal(err),
            },
        }
    }
}

//! 多文件表单上传：逐个文件原子写入共享目录。

use axum::extract::{Extension, Multipart};
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::config::ShareConfig;
use crate::error::ApiError;
use crate::storage::Storage;

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    message: &'static str,
}

/// 接收 multipart 文件并写入共享根目录。
///
/// Each part is staged next to its target and renamed into place, so a failed
/// part never leaves a truncated file behind. Parts without a filename are
/// ignored.
pub async fn upload_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<ShareConfig>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let mut uploaded = 0usize;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            debug!(field = field.name().unwrap_or(""), "skipping non-file field");
            continue;
        };
        let target = storage.resolve(&name)?;
        if target == storage.root_path() {
            return Err(ApiError::BadRequest("file name is required".into()));
        }

        let mut atomic = AtomicFile::new(&target).await.map_err(ApiError::internal)?;
        let write_result: Result<u64, ApiError> = async {
            let mut written: u64 = 0;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| ApiError::BadRequest(err.body_text()))?
            {
                atomic
                    .file_mut()
                    .write_all(&chunk)
                    .await
                    .map_err(ApiError::internal)?;
                written += chunk.len() as u64;
            }
            Ok(written)
        }
        .await;
        let size = match write_result {
            Ok(size) => size,
            Err(err) => {
                warn!(name, "upload aborted");
                atomic.cleanup().await;
                return Err(err);
            }
        };
        atomic
            .finalize(config.file_mode)
            .await
            .map_err(ApiError::internal)?;

        info!(name, size, "file uploaded");
        uploaded += 1;
    }

    if uploaded == 0 {
        return Err(ApiError::BadRequest("no files uploaded".into()));
    }
    Ok(JsonResponse(UploadResponse {
        message: "Files uploaded successfully",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use tempfile::tempdir;

    const BOUNDARY: &str = "justfiles-test-boundary";

    fn make_state() -> (tempfile::TempDir, Arc<Storage>, Arc<ShareConfig>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("share");
        std::fs::create_dir_all(&root).expect("create share root");
        let storage = Arc::new(Storage::new(root).expect("storage"));
        (temp, storage, Arc::new(ShareConfig::default()))
    }

    async fn multipart_of(parts: &[(&str, Option<&str>, &str)]) -> Multipart {
        let mut body = String::new();
        for (field, file_name, contents) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match file_name {
                Some(file_name) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{field}\"\r\n\r\n"
                )),
            }
            body.push_str(contents);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request");
        Multipart::from_request(request, &())
            .await
            .unwrap_or_else(|_| panic!("multipart extraction failed"))
    }

    #[tokio::test]
    async fn upload_then_list_shows_file() {
        let (_temp, storage, config) = make_state();
        let multipart = multipart_of(&[("files", Some("x.bin"), "payload")]).await;

        let JsonResponse(response) =
            upload_files(Extension(storage.clone()), Extension(config), multipart)
                .await
                .unwrap_or_else(|_| panic!("upload failed"));
        assert_eq!(response.message, "Files uploaded successfully");

        let listing = storage.list_dir("", false).await.expect("list");
        assert_eq!(listing.files, vec!["x.bin"]);
        let contents = std::fs::read(storage.root_path().join("x.bin")).expect("read");
        assert_eq!(contents, b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn upload_applies_configured_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, storage, _config) = make_state();
        let config = Arc::new(ShareConfig {
            file_mode: 0o640,
            ..ShareConfig::default()
        });
        let multipart = multipart_of(&[("files", Some("mode.txt"), "m")]).await;
        upload_files(Extension(storage.clone()), Extension(config), multipart)
            .await
            .unwrap_or_else(|_| panic!("upload failed"));

        let mode = std::fs::metadata(storage.root_path().join("mode.txt"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn upload_writes_every_file_part() {
        let (_temp, storage, config) = make_state();
        let multipart = multipart_of(&[
            ("note", None, "not a file"),
            ("files", Some("one.txt"), "1"),
            ("files", Some("two.txt"), "2"),
        ])
        .await;
        upload_files(Extension(storage.clone()), Extension(config), multipart)
            .await
            .unwrap_or_else(|_| panic!("upload failed"));

        let listing = storage.list_dir("", false).await.expect("list");
        assert_eq!(listing.files, vec!["one.txt", "two.txt"]);
    }

    #[tokio::test]
    async fn upload_rejects_traversal_name() {
        let (temp, storage, config) = make_state();
        let multipart = multipart_of(&[("files", Some("../escape.txt"), "nope")]).await;
        let result = upload_files(Extension(storage), Extension(config), multipart).await;

        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn upload_without_files_is_bad_request() {
        let (_temp, storage, config) = make_state();
        let multipart = multipart_of(&[("note", None, "text only")]).await;
        let result = upload_files(Extension(storage), Extension(config), multipart).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn abandoned_upload_leaves_no_temp_file() {
        use futures_util::stream::{self, StreamExt};

        let (_temp, storage, config) = make_state();
        let head = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"x.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             first half of the payload"
        );
        // the client stalls mid-body and never finishes
        let body = stream::iter(vec![Ok::<_, std::io::Error>(head)]).chain(stream::pending());
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from_stream(body))
            .expect("request");
        let multipart = Multipart::from_request(request, &())
            .await
            .unwrap_or_else(|_| panic!("multipart extraction failed"));

        let upload = upload_files(Extension(storage.clone()), Extension(config), multipart);
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(100), upload).await;
        assert!(timed_out.is_err(), "upload should still be waiting for the body");

        let leftovers: Vec<_> = std::fs::read_dir(storage.root_path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }
}

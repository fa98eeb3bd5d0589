//! Streaming file downloads.
//!
//! Content type comes from the file extension, content length from the
//! metadata of the opened handle, so both describe the inode that is
//! actually streamed.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// Fallback content type for unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors that can occur before the first byte of a transfer is sent.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The path is no longer a regular file.
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content type for `path`, guessed from its extension.
pub fn content_type_for(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    HeaderValue::from_str(mime.essence_str())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
}

/// Streams regular files into HTTP responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransfer;

impl FileTransfer {
    pub fn new() -> Self {
        Self
    }

    /// Open `path` and build a streaming `200 OK` response for it.
    ///
    /// Read errors after the headers are sent are logged and end the body
    /// stream, which aborts the connection; nothing is retried.
    pub async fn download(&self, path: &Path) -> Result<Response, TransferError> {
        let file = File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.to_path_buf()));
        }

        let size = metadata.len();
        debug!(path = %path.display(), size, "streaming file");

        let stream_path = path.to_path_buf();
        let stream = ReaderStream::new(file).inspect_err(move |e| {
            error!(path = %stream_path.display(), error = %e, "file read failed mid-transfer");
        });

        Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type_for(path)),
                (header::CONTENT_LENGTH, HeaderValue::from(size)),
            ],
            Body::from_stream(stream),
        )
            .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a.html")), "text/html");
        assert_eq!(content_type_for(Path::new("a.txt")), "text/plain");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a.unknownext")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("noext")), DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_download_sets_headers_and_body() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        fs::write(&path, &data).unwrap();

        let response = FileTransfer::new().download(&path).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            DEFAULT_CONTENT_TYPE
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100000");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_download_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.txt");
        fs::write(&path, "").unwrap();

        let response = FileTransfer::new().download(&path).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "0");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn test_download_directory_rejected() {
        let temp_dir = TempDir::new().unwrap();

        let result = FileTransfer::new().download(temp_dir.path()).await;
        assert!(matches!(result, Err(TransferError::NotAFile(_))));
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let temp_dir = TempDir::new().unwrap();

        let result = FileTransfer::new()
            .download(&temp_dir.path().join("missing"))
            .await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }
}

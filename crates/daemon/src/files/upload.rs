//! Single-file multipart uploads into confined directories.
//!
//! Uploads never overwrite: the destination is created with `O_EXCL`, and a
//! destination that this request created but could not fill is removed
//! again.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::resolver::{EntryKind, PathResolver, ResolveError, ResolvedPath};

/// Name of the form field carrying the file.
pub const FILE_FIELD: &str = "file";

/// Default ceiling for the whole multipart body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15_485_760;

/// Errors that can occur while accepting an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The target is not a directory.
    #[error("cannot upload to non-directory: {0}")]
    NotADirectory(PathBuf),

    /// The request does not carry a multipart form.
    #[error("not a multipart request: {0}")]
    NotMultipart(#[from] MultipartRejection),

    /// The body is not a well-formed multipart form or exceeds the ceiling.
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    /// No file field named `file` was sent.
    #[error("missing `file` field")]
    MissingFile,

    /// More than one file field named `file` was sent.
    #[error("more than one `file` field")]
    DuplicateFile,

    /// The client-supplied file name is not a single path component.
    #[error("invalid file name: {0}")]
    InvalidFileName(#[source] ResolveError),

    /// Something already exists at the destination.
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    /// IO error while creating or writing the destination.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status for the multipart failure, if this is one.
    pub fn multipart_status(&self) -> Option<StatusCode> {
        match self {
            UploadError::NotMultipart(e) => Some(e.status()),
            UploadError::Multipart(e) => Some(e.status()),
            _ => None,
        }
    }
}

/// Accepts uploads into directories resolved by a [`PathResolver`].
#[derive(Debug, Clone)]
pub struct UploadHandler {
    resolver: PathResolver,
}

impl UploadHandler {
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Store the `file` field of the multipart `request` inside `target`.
    ///
    /// Preconditions are checked in order: the target is a directory, the
    /// body parses, a `file` field is present, its name is a single
    /// component, and nothing exists at the destination. A second `file`
    /// field, or a body that fails after the file, rejects the whole upload
    /// and removes the stored file. Returns the path of the created file.
    ///
    /// The body limit is whatever `DefaultBodyLimit` the request carries.
    pub async fn upload(
        &self,
        target: &ResolvedPath,
        request: Request,
    ) -> Result<PathBuf, UploadError> {
        if target.kind != EntryKind::Directory {
            return Err(UploadError::NotADirectory(target.path.clone()));
        }

        let mut multipart = Multipart::from_request(request, &()).await?;

        let mut stored = None;
        if let Err(e) = self.receive(target, &mut multipart, &mut stored).await {
            if let Some((path, _)) = stored {
                remove_partial(&path).await;
            }
            return Err(e);
        }

        match stored {
            Some((path, size)) => {
                info!(path = %path.display(), size, "upload stored");
                Ok(path)
            }
            None => Err(UploadError::MissingFile),
        }
    }

    /// Drain the form, storing the single `file` field into `stored`.
    async fn receive(
        &self,
        target: &ResolvedPath,
        multipart: &mut Multipart,
        stored: &mut Option<(PathBuf, u64)>,
    ) -> Result<(), UploadError> {
        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            let Some(file_name) = field.file_name().map(str::to_string) else {
                continue;
            };
            if stored.is_some() {
                return Err(UploadError::DuplicateFile);
            }

            let destination = self
                .resolver
                .resolve_child(target, &file_name)
                .map_err(UploadError::InvalidFileName)?;

            let size = self.store(&destination, field).await?;
            *stored = Some((destination, size));
        }

        Ok(())
    }

    async fn store(&self, destination: &Path, field: Field<'_>) -> Result<u64, UploadError> {
        // Also catches dangling symlinks, which `exists()` would not.
        if fs::symlink_metadata(destination).await.is_ok() {
            return Err(UploadError::AlreadyExists(destination.to_path_buf()));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    UploadError::AlreadyExists(destination.to_path_buf())
                } else {
                    UploadError::Io(e)
                }
            })?;

        match copy_field(file, field).await {
            Ok(size) => Ok(size),
            Err(e) => {
                remove_partial(destination).await;
                Err(e)
            }
        }
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    } else {
        debug!(path = %path.display(), "removed partial upload");
    }
}

async fn copy_field(mut file: fs::File, mut field: Field<'_>) -> Result<u64, UploadError> {
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;
    use std::fs as stdfs;
    use tempfile::TempDir;

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart(body: Vec<u8>) -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn setup() -> (TempDir, PathResolver, UploadHandler) {
        let temp_dir = TempDir::new().unwrap();
        stdfs::create_dir_all(temp_dir.path().join("inbox")).unwrap();
        stdfs::write(temp_dir.path().join("file.txt"), "Hello").unwrap();
        let resolver = PathResolver::new(temp_dir.path()).unwrap();
        let handler = UploadHandler::new(resolver.clone());
        (temp_dir, resolver, handler)
    }

    #[tokio::test]
    async fn test_upload_creates_file() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("inbox").unwrap();

        let body = multipart_body(&[
            ("comment", None, b"ignored"),
            ("file", Some("hello.txt"), b"uploaded bytes"),
        ]);
        let path = handler.upload(&target, multipart(body)).await.unwrap();

        assert_eq!(path, resolver.root().join("inbox/hello.txt"));
        assert_eq!(stdfs::read(&path).unwrap(), b"uploaded bytes");
    }

    #[tokio::test]
    async fn test_upload_never_overwrites() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("").unwrap();

        let body = multipart_body(&[("file", Some("file.txt"), b"replacement")]);
        let result = handler.upload(&target, multipart(body)).await;

        assert!(matches!(result, Err(UploadError::AlreadyExists(_))));
        assert_eq!(stdfs::read(resolver.root().join("file.txt")).unwrap(), b"Hello");
    }

    #[tokio::test]
    async fn test_upload_over_dangling_symlink_rejected() {
        let (temp_dir, resolver, handler) = setup();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("planted.txt"),
            temp_dir.path().join("inbox/trap.txt"),
        )
        .unwrap();
        let target = resolver.resolve("inbox").unwrap();

        let body = multipart_body(&[("file", Some("trap.txt"), b"payload")]);
        let result = handler.upload(&target, multipart(body)).await;

        assert!(matches!(result, Err(UploadError::AlreadyExists(_))));
        assert!(!outside.path().join("planted.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_to_file_rejected() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("file.txt").unwrap();

        let body = multipart_body(&[("file", Some("x.txt"), b"x")]);
        let result = handler.upload(&target, multipart(body)).await;
        assert!(matches!(result, Err(UploadError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_upload_to_missing_rejected() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("nowhere").unwrap();

        let body = multipart_body(&[("file", Some("x.txt"), b"x")]);
        let result = handler.upload(&target, multipart(body)).await;
        assert!(matches!(result, Err(UploadError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn test_upload_missing_file_field() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("inbox").unwrap();

        let body = multipart_body(&[
            ("other", Some("x.txt"), b"x"),
            ("file", None, b"not a file"),
        ]);
        let result = handler.upload(&target, multipart(body)).await;
        assert!(matches!(result, Err(UploadError::MissingFile)));
    }

    #[tokio::test]
    async fn test_upload_second_file_field_rejected() {
        let (temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("inbox").unwrap();

        let body = multipart_body(&[
            ("file", Some("one.txt"), b"first"),
            ("file", Some("two.txt"), b"second"),
        ]);
        let result = handler.upload(&target, multipart(body)).await;

        assert!(matches!(result, Err(UploadError::DuplicateFile)));
        assert!(!temp_dir.path().join("inbox/one.txt").exists());
        assert!(!temp_dir.path().join("inbox/two.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_traversal_file_name_rejected() {
        let (temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("inbox").unwrap();

        let body = multipart_body(&[("file", Some("../escape.txt"), b"x")]);
        let result = handler.upload(&target, multipart(body)).await;

        assert!(matches!(result, Err(UploadError::InvalidFileName(_))));
        assert!(!temp_dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_malformed_body() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("inbox").unwrap();

        let result = handler
            .upload(&target, multipart(b"garbage without boundary".to_vec()))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, UploadError::Multipart(_)));
        assert!(err.multipart_status().is_some());
    }

    #[tokio::test]
    async fn test_upload_requires_multipart_content_type() {
        let (_temp_dir, resolver, handler) = setup();
        let target = resolver.resolve("inbox").unwrap();

        let request = http::Request::builder()
            .method("POST")
            .uri("/inbox")
            .header("content-type", "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let err = handler.upload(&target, request).await.unwrap_err();

        assert!(matches!(err, UploadError::NotMultipart(_)));
        assert_eq!(err.multipart_status(), Some(StatusCode::BAD_REQUEST));
    }
}

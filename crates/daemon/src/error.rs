//! Request-level errors and their HTTP mapping.
//!
//! Every component error funnels into [`ServeError`], which knows its status
//! code and a fixed client-facing message. Internal paths and error details
//! only go to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, warn};

use crate::files::{BrowserError, ResolveError, TransferError, UploadError};

/// Result type for request handling.
pub type ServeResult<T> = Result<T, ServeError>;

/// Errors that can end a request.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The target could not be resolved inside the serve root.
    #[error("unresolvable target: {0}")]
    Resolve(#[source] ResolveError),

    /// Nothing exists at the target.
    #[error("not found")]
    NotFound,

    /// Enumerating a directory failed.
    #[error("listing failed: {0}")]
    Listing(#[from] BrowserError),

    /// Opening a file for download failed.
    #[error("transfer failed: {0}")]
    Transfer(#[source] TransferError),

    /// Creating or writing an upload failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// A blocking filesystem task panicked or was cancelled.
    #[error("filesystem task failed: {0}")]
    Task(#[from] JoinError),

    /// An upload precondition was not met.
    #[error("upload rejected: {0}")]
    Upload(#[source] UploadError),

    /// Uploads are disabled for this server.
    #[error("uploads not allowed")]
    UploadsDisabled,

    /// No handler for this method and target kind.
    #[error("unhandled request")]
    Unhandled,
}

impl ServeError {
    /// The HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServeError::Resolve(_) | ServeError::NotFound => StatusCode::NOT_FOUND,
            ServeError::Listing(_)
            | ServeError::Transfer(_)
            | ServeError::Write(_)
            | ServeError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServeError::UploadsDisabled => StatusCode::FORBIDDEN,
            ServeError::Unhandled => StatusCode::BAD_REQUEST,
            ServeError::Upload(e) => match e {
                UploadError::NotADirectory(_) | UploadError::AlreadyExists(_) => {
                    StatusCode::FORBIDDEN
                }
                UploadError::NotMultipart(_) | UploadError::Multipart(_) => e
                    .multipart_status()
                    .unwrap_or(StatusCode::BAD_REQUEST),
                UploadError::MissingFile
                | UploadError::DuplicateFile
                | UploadError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
                UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// The fixed plain-text body sent to the client.
    pub fn client_message(&self) -> &'static str {
        match self {
            ServeError::Resolve(_) | ServeError::NotFound => "Not Found",
            ServeError::Listing(_)
            | ServeError::Transfer(_)
            | ServeError::Write(_)
            | ServeError::Task(_) => "Internal Server Error",
            ServeError::UploadsDisabled => "Uploads not allowed",
            ServeError::Unhandled => "unhandled",
            ServeError::Upload(e) => match e {
                UploadError::NotADirectory(_) => "Cannot upload to non-directory file",
                UploadError::AlreadyExists(_) => "File already exists",
                UploadError::NotMultipart(_) | UploadError::Multipart(_)
                    if self.status() == StatusCode::PAYLOAD_TOO_LARGE =>
                {
                    "Upload too large"
                }
                UploadError::NotMultipart(_) | UploadError::Multipart(_) => {
                    "Invalid multipart body"
                }
                UploadError::MissingFile => "Missing file field",
                UploadError::DuplicateFile => "Only one file field allowed",
                UploadError::InvalidFileName(_) => "Invalid file name",
                UploadError::Io(_) => "Internal Server Error",
            },
        }
    }
}

impl From<ResolveError> for ServeError {
    fn from(err: ResolveError) -> Self {
        ServeError::Resolve(err)
    }
}

impl From<TransferError> for ServeError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ServeError::NotFound
            }
            other => ServeError::Transfer(other),
        }
    }
}

impl From<UploadError> for ServeError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io(e) => ServeError::Write(e),
            other => ServeError::Upload(other),
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, self.client_message()).into_response()
    }
}

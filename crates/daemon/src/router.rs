//! Request router for dispatching requests to the appropriate handler.
//!
//! This module provides the `RequestRouter` struct that resolves each request
//! target through the [`PathResolver`] and routes it to the listing renderer,
//! the file transfer or the upload handler based on method and target kind.
//! Nothing here touches the filesystem before resolution succeeded.

use std::path::{Path, PathBuf};

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use tokio::task;
use tracing::{debug, warn};

use crate::error::{ServeError, ServeResult};
use crate::files::{
    DirectoryBrowser, EntryKind, FileTransfer, ListingRenderer, PathResolver, ResolvedPath,
    UploadHandler, DEFAULT_MAX_UPLOAD_BYTES,
};
use crate::privilege::Reduced;

/// Immutable runtime configuration handed to the router.
///
/// Can only be built from a [`Reduced`] token, so a server configured with
/// it never runs with elevated privileges.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    root: PathBuf,
    allow_uploads: bool,
    max_upload_bytes: usize,
}

impl ServeConfig {
    pub fn new(reduced: &Reduced, allow_uploads: bool, max_upload_bytes: usize) -> Self {
        Self {
            root: reduced.root().to_path_buf(),
            allow_uploads,
            max_upload_bytes,
        }
    }

    /// Uploads disabled, default body ceiling.
    pub fn read_only(reduced: &Reduced) -> Self {
        Self::new(reduced, false, DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allow_uploads(&self) -> bool {
        self.allow_uploads
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }
}

/// Dispatches resolved requests to the file handlers.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    resolver: PathResolver,
    browser: DirectoryBrowser,
    renderer: ListingRenderer,
    transfer: FileTransfer,
    uploads: Option<UploadHandler>,
}

impl RequestRouter {
    /// Create a router for `config`. Fails if the serve root is not an
    /// accessible directory.
    pub fn new(config: &ServeConfig) -> std::io::Result<Self> {
        let resolver = PathResolver::new(config.root())?;
        let uploads = config
            .allow_uploads()
            .then(|| UploadHandler::new(resolver.clone()));

        Ok(Self {
            resolver,
            browser: DirectoryBrowser::new(),
            renderer: ListingRenderer::new(config.allow_uploads()),
            transfer: FileTransfer::new(),
            uploads,
        })
    }

    /// Route one request whose decoded target is `target`.
    pub async fn route(&self, target: &str, request: Request) -> Response {
        match self.dispatch(target, request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    async fn dispatch(&self, target: &str, request: Request) -> ServeResult<Response> {
        let method = request.method().clone();
        let resolved = match self.resolve(target).await {
            Ok(resolved) => resolved,
            // A POST is refused for any target while uploads are off.
            Err(_) if method == Method::POST && self.uploads.is_none() => {
                return Err(ServeError::UploadsDisabled);
            }
            Err(e) => return Err(e),
        };
        debug!(path = %resolved.path.display(), kind = ?resolved.kind, "resolved target");

        match method {
            Method::GET | Method::HEAD => match resolved.kind {
                EntryKind::Directory => self.handle_listing(resolved).await,
                EntryKind::RegularFile => self.handle_download(&resolved).await,
                EntryKind::Missing => Err(ServeError::NotFound),
                EntryKind::Other => Err(ServeError::Unhandled),
            },
            Method::POST => self.handle_upload(&resolved, request).await,
            _ => Err(ServeError::Unhandled),
        }
    }

    async fn resolve(&self, target: &str) -> ServeResult<ResolvedPath> {
        let resolver = self.resolver.clone();
        let target = target.to_string();
        let result = task::spawn_blocking(move || resolver.resolve(&target)).await?;

        result.map_err(|e| {
            if e.is_containment_violation() {
                warn!(error = %e, "Containment violation");
            }
            ServeError::from(e)
        })
    }

    async fn handle_listing(&self, dir: ResolvedPath) -> ServeResult<Response> {
        let browser = self.browser;
        let path = dir.path.clone();
        let entries = task::spawn_blocking(move || browser.list_directory(&path))
            .await??;

        Ok(Html(self.renderer.render(&dir, &entries)).into_response())
    }

    async fn handle_download(&self, file: &ResolvedPath) -> ServeResult<Response> {
        Ok(self.transfer.download(&file.path).await?)
    }

    async fn handle_upload(&self, dir: &ResolvedPath, request: Request) -> ServeResult<Response> {
        let Some(uploads) = &self.uploads else {
            return Err(ServeError::UploadsDisabled);
        };

        // Redirect back to the path the client asked for, not the normalized one.
        let location = request.uri().path().to_string();
        uploads.upload(dir, request).await?;

        Ok(found_redirect(&location))
    }
}

/// `302 Found` pointing at `location`.
fn found_redirect(location: &str) -> Response {
    let location =
        HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

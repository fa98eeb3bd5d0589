//! HTTP server assembly.
//!
//! [`build_app`] turns a [`ServeConfig`] into an axum [`Router`] with a
//! single catch-all route, the upload body ceiling and the access-log
//! middleware. [`serve`] runs it on an already bound listener.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tracing::Instrument;

use crate::router::{RequestRouter, ServeConfig};

#[derive(Clone)]
struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    router: RequestRouter,
}

/// Build the application for `config`.
///
/// Fails if the serve root is not an accessible directory.
pub fn build_app(config: ServeConfig) -> io::Result<Router> {
    let router = RequestRouter::new(&config)?;
    let state = AppState {
        inner: Arc::new(AppInner { router }),
    };

    Ok(Router::new()
        .route("/", any(serve_root))
        .route("/{*path}", any(serve_path))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
        .layer(middleware::from_fn(log_request))
        .with_state(state))
}

/// Bind a non-blocking std listener, usable before any runtime exists.
pub fn bind(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// Must be called from within a tokio runtime.
pub async fn serve<F>(listener: std::net::TcpListener, app: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn serve_root(State(state): State<AppState>, request: Request) -> Response {
    state.inner.router.route("", request).await
}

async fn serve_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    state.inner.router.route(&path, request).await
}

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Access log: one line per request, inside a `request` span.
async fn log_request(req: Request, next: Next) -> Response {
    let remote = peer_addr(&req)
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let span = tracing::info_span!(
        "request",
        remote = %remote,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        tracing::info!("REQ: {} \"{} {} {:?}\"", remote, req.method(), req.uri(), req.version());
        let response = next.run(req).await;
        tracing::debug!(status = response.status().as_u16(), "response");
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privilege::{Elevated, NoopReducer, RootConfinement};
    use axum::body::Body;
    use axum::http::{self, StatusCode};
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir, allow_uploads: bool, max_upload_bytes: usize) -> Router {
        let reduced = Elevated::new(dir.path())
            .unwrap()
            .reduce(&NoopReducer, RootConfinement::Disabled)
            .unwrap();
        build_app(ServeConfig::new(&reduced, allow_uploads, max_upload_bytes)).unwrap()
    }

    fn get(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_and_nested_routes() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("docs")).unwrap();
        fs::write(temp_dir.path().join("docs/a b.txt"), "spaced").unwrap();
        let app = app(&temp_dir, false, 1024);

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/docs/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Percent-encoded targets are decoded before resolution.
        let response = app.oneshot(get("/docs/a%20b.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_encoded_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(&temp_dir, false, 1024);

        let response = app.oneshot(get("/%2e%2e/%2e%2e/etc/passwd")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_body_limit_applies_to_uploads() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(&temp_dir, true, 64);

        let body = format!(
            "--X\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\r\n{}\r\n--X--\r\n",
            "x".repeat(1024)
        );
        let request = http::Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "multipart/form-data; boundary=X")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!temp_dir.path().join("big.bin").exists());
    }
}

//! # jailserve
//!
//! A minimal HTTP daemon that serves one directory tree as a file browser,
//! optionally accepting single-file uploads, while confining itself to that
//! tree and giving up its OS privileges before the first request.
//!
//! ## Overview
//!
//! - **Path containment**: every request target is resolved through
//!   [`PathResolver`], which rejects `..` escapes and symlinks leading out of
//!   the serve root.
//! - **Listings and downloads**: directories render as escaped HTML listings,
//!   regular files stream with Content-Type and Content-Length.
//! - **Uploads**: one `file` field per POST, never overwriting.
//! - **Privilege reduction**: `chroot(2)` into the serve root and clearing
//!   all capabilities, exactly once, before serving.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   axum app (server)                          │
//! │        access-log middleware → catch-all route               │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    RequestRouter                             │
//! │                         │                                    │
//! │                    PathResolver                              │
//! │          ┌──────────────┼────────────────┐                   │
//! │  ListingRenderer   FileTransfer    UploadHandler             │
//! └──────────────────────────────────────────────────────────────┘
//!            ▲ built only from a `Reduced` privilege token
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jailserve::privilege::{Elevated, RootConfinement, SystemReducer};
//! use jailserve::{build_app, ServeConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let elevated = Elevated::new("/srv/files")?;
//!     let listener = jailserve::server::bind("0.0.0.0:8000".parse()?)?;
//!     let reduced = elevated.reduce(&SystemReducer::default(), RootConfinement::Required)?;
//!
//!     let app = build_app(ServeConfig::read_only(&reduced))?;
//!     tokio::runtime::Runtime::new()?.block_on(async {
//!         jailserve::server::serve(listener, app, std::future::pending()).await
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, environment overrides, validation
//! - [`files`]: Path resolution, listing, download and upload
//! - [`html`]: Escaping HTML builder
//! - [`privilege`]: One-time privilege reduction
//! - [`router`]: Per-request dispatch
//! - [`server`]: axum application and listener

pub mod config;
pub mod error;
pub mod files;
pub mod html;
pub mod privilege;
pub mod router;
pub mod server;

// Re-export config types for convenience
pub use config::Config;

// Re-export error types for convenience
pub use error::{ServeError, ServeResult};

// Re-export files types for convenience
pub use files::{
    DirectoryBrowser, DirectoryEntry, EntryKind, FileTransfer, ListingRenderer, PathResolver,
    ResolveError, ResolvedPath, UploadHandler,
};

// Re-export privilege types for convenience
pub use privilege::{
    Elevated, PrivilegeError, PrivilegeReducer, PrivilegeState, Reduced, RootConfinement,
};

// Re-export router and server types for convenience
pub use router::{RequestRouter, ServeConfig};
pub use server::build_app;

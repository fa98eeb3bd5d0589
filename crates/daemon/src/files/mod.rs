//! Filesystem side of the server: resolution, listing, download and upload.
//!
//! # Security
//!
//! Every request target goes through [`PathResolver`] first. Targets are
//! normalized lexically, then canonicalized so symlinks cannot lead out of
//! the serve root. The other components only ever see resolved paths.

pub mod browser;
pub mod listing;
pub mod resolver;
pub mod transfer;
pub mod upload;

pub use browser::{BrowserError, DirectoryBrowser, DirectoryEntry, ListingEntryType};
pub use listing::ListingRenderer;
pub use resolver::{EntryKind, PathResolver, ResolveError, ResolvedPath};
pub use transfer::{content_type_for, FileTransfer, TransferError};
pub use upload::{UploadError, UploadHandler, DEFAULT_MAX_UPLOAD_BYTES, FILE_FIELD};

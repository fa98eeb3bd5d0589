//! Request path resolution with containment checks.
//!
//! Every handler goes through [`PathResolver`] before touching the
//! filesystem. A request target is normalized lexically against the serve
//! root, then canonicalized so that symlinks pointing outside the root are
//! caught. Targets that do not exist are classified as
//! [`EntryKind::Missing`] and checked against the lexical path instead.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during path resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The target resolves outside the serve root.
    #[error("path is outside the serve root: {0}")]
    OutsideRoot(PathBuf),

    /// A `..` segment climbs above the serve root.
    #[error("path traversal above the serve root: {0}")]
    Traversal(String),

    /// A segment or file name that can never name a child of the root.
    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),

    /// IO error while canonicalizing or inspecting the target.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ResolveError {
    /// Whether this error is a containment violation rather than an IO problem.
    pub fn is_containment_violation(&self) -> bool {
        !matches!(self, ResolveError::Io(_))
    }
}

/// Classification of a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Missing,
    Other,
}

impl EntryKind {
    fn from_metadata(metadata: &fs::Metadata) -> Self {
        if metadata.is_dir() {
            EntryKind::Directory
        } else if metadata.is_file() {
            EntryKind::RegularFile
        } else {
            EntryKind::Other
        }
    }
}

/// A request target that passed the containment check.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Canonical path for existing targets, lexical path for missing ones.
    pub path: PathBuf,
    /// Normalized request-space segments, relative to the serve root.
    pub segments: Vec<String>,
    /// What the path points at.
    pub kind: EntryKind,
}

impl ResolvedPath {
    /// The normalized request path, always starting with `/`.
    pub fn request_path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Resolves untrusted request targets against a fixed serve root.
///
/// Cloning is cheap; the root is shared.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: Arc<Path>,
}

impl PathResolver {
    /// Create a resolver for `root`, which is canonicalized once here.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let canonical = fs::canonicalize(root.as_ref())?;
        if !fs::metadata(&canonical)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("serve root is not a directory: {}", canonical.display()),
            ));
        }
        Ok(Self {
            root: Arc::from(canonical),
        })
    }

    /// The canonical serve root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` lies at or below the serve root (component-wise).
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Resolve a request target such as `"docs/../a.txt"`.
    ///
    /// Leading, trailing and repeated slashes are ignored. The empty target
    /// is the serve root.
    pub fn resolve(&self, target: &str) -> Result<ResolvedPath, ResolveError> {
        let segments = normalize_segments(target)?;

        let mut lexical = self.root.to_path_buf();
        lexical.extend(&segments);

        let (path, kind) = match fs::canonicalize(&lexical) {
            Ok(canonical) => {
                let metadata = fs::metadata(&canonical)?;
                (canonical, EntryKind::from_metadata(&metadata))
            }
            Err(e) if is_missing(&e) => (lexical, EntryKind::Missing),
            Err(e) => return Err(ResolveError::Io(e)),
        };

        if !self.contains(&path) {
            return Err(ResolveError::OutsideRoot(path));
        }

        Ok(ResolvedPath {
            path,
            segments,
            kind,
        })
    }

    /// Validate a client-supplied file name for creation inside `dir`.
    ///
    /// The name must be exactly one normal path component. Returns the
    /// destination path; nothing is created or opened here.
    pub fn resolve_child(&self, dir: &ResolvedPath, name: &str) -> Result<PathBuf, ResolveError> {
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(ResolveError::InvalidSegment(name.to_string()));
        }

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(ResolveError::InvalidSegment(name.to_string())),
        }

        let destination = dir.path.join(name);
        if destination.parent() != Some(dir.path.as_path()) || !self.contains(&destination) {
            return Err(ResolveError::OutsideRoot(destination));
        }

        Ok(destination)
    }
}

/// Split a request target into segments, applying `.` and `..` lexically.
///
/// A `..` with nothing left to pop would leave the root, which is rejected
/// before any filesystem access.
fn normalize_segments(target: &str) -> Result<Vec<String>, ResolveError> {
    let mut segments: Vec<String> = Vec::new();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(ResolveError::Traversal(target.to_string()));
                }
            }
            s if s.contains('\0') => {
                return Err(ResolveError::InvalidSegment(s.to_string()));
            }
            s => segments.push(s.to_string()),
        }
    }
    Ok(segments)
}

fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

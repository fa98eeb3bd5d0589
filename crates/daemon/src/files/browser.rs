//! Directory enumeration for listings.
//!
//! The browser only ever receives paths that already passed
//! [`PathResolver`](super::resolver::PathResolver); it does no containment
//! checks of its own.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors that can occur during directory browsing.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The requested path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type of a listed entry, with symlinks followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingEntryType {
    Directory,
    File,
    Other,
}

/// A directory entry with metadata.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub entry_type: ListingEntryType,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.entry_type, ListingEntryType::Directory)
    }
}

/// Lists the children of confined directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryBrowser;

impl DirectoryBrowser {
    pub fn new() -> Self {
        Self
    }

    /// List contents of a directory.
    ///
    /// Every direct child is returned, hidden ones included. Entries whose
    /// metadata cannot be read (dangling symlinks, races with deletion) are
    /// still listed, as [`ListingEntryType::Other`]. Names that are not
    /// valid UTF-8 are skipped: no request target can address them.
    pub fn list_directory(&self, path: &Path) -> Result<Vec<DirectoryEntry>, BrowserError> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(BrowserError::NotADirectory(path.to_path_buf()));
        }

        let mut results = Vec::new();

        for entry_result in fs::read_dir(path)? {
            let entry = entry_result?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!(name = ?raw, "skipping entry with non-UTF-8 name");
                    continue;
                }
            };

            // Follow symlinks so linked directories are shown as directories.
            let entry_type = match fs::metadata(entry.path()) {
                Ok(m) if m.is_dir() => ListingEntryType::Directory,
                Ok(m) if m.is_file() => ListingEntryType::File,
                Ok(_) | Err(_) => ListingEntryType::Other,
            };

            results.push(DirectoryEntry { name, entry_type });
        }

        sort_entries(&mut results);

        Ok(results)
    }
}

/// Sort by name, directories first.
fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| match (a.is_dir(), b.is_dir()) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    });
}

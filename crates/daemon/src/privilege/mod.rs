//! One-time privilege reduction at startup.
//!
//! The process starts [`Elevated`]. [`Elevated::reduce`] consumes it,
//! confines the filesystem root to the serve root and discards every
//! capability, and yields a [`Reduced`] token. The HTTP application can only
//! be built from a `Reduced` token, so no request can be served before the
//! reduction has happened.
//!
//! Capabilities are per-thread on Linux. The reduction must therefore run
//! on the main thread before any runtime worker threads are spawned.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

#[cfg(target_os = "linux")]
pub mod linux;
pub mod noop;

pub use noop::NoopReducer;

/// The reducer for the platform this binary was built for.
#[cfg(target_os = "linux")]
pub type SystemReducer = linux::LinuxReducer;

/// The reducer for the platform this binary was built for.
#[cfg(not(target_os = "linux"))]
pub type SystemReducer = noop::NoopReducer;

/// Errors that can occur while reducing privileges.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The serve root could not be prepared.
    #[error("invalid serve root {path}: {source}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Changing the process root directory failed.
    #[error("root confinement to {path} failed: {reason}")]
    Confinement { path: PathBuf, reason: String },

    /// Discarding capabilities failed.
    #[error("dropping capabilities failed: {0}")]
    Capabilities(String),

    /// The platform has no implementation of this step.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// The reduction already ran in this process.
    #[error("privileges were already reduced")]
    AlreadyReduced,
}

/// Performs the platform-specific reduction steps.
///
/// Implementations are called exactly once per process, root confinement
/// first.
pub trait PrivilegeReducer {
    /// Make `root` the filesystem root of the process.
    ///
    /// Returns the path under which the serve root is reachable afterwards.
    fn confine_root(&self, root: &Path) -> Result<PathBuf, PrivilegeError>;

    /// Clear every capability set of the process and commit it.
    fn drop_capabilities(&self) -> Result<(), PrivilegeError>;
}

/// How strictly root confinement is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootConfinement {
    /// Attempt confinement; log loudly and continue if it fails.
    #[default]
    BestEffort,
    /// Attempt confinement; failure aborts startup.
    Required,
    /// Skip confinement entirely.
    Disabled,
}

impl fmt::Display for RootConfinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootConfinement::BestEffort => write!(f, "best-effort"),
            RootConfinement::Required => write!(f, "required"),
            RootConfinement::Disabled => write!(f, "disabled"),
        }
    }
}

/// Observable privilege state of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeState {
    Elevated,
    Reduced,
}

/// The process before privilege reduction.
#[derive(Debug)]
pub struct Elevated {
    root: PathBuf,
}

impl Elevated {
    /// Prepare the reduction for `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PrivilegeError> {
        let path = root.as_ref();
        let invalid = |source| PrivilegeError::InvalidRoot {
            path: path.to_path_buf(),
            source,
        };

        let root = std::fs::canonicalize(path).map_err(invalid)?;
        let metadata = std::fs::metadata(&root).map_err(invalid)?;
        if !metadata.is_dir() {
            return Err(invalid(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a directory",
            )));
        }

        Ok(Self { root })
    }

    /// The canonical serve root as seen before confinement.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> PrivilegeState {
        PrivilegeState::Elevated
    }

    /// Run the reduction: root confinement per `policy`, then capabilities.
    ///
    /// A failed capability drop is always fatal.
    pub fn reduce(
        self,
        reducer: &dyn PrivilegeReducer,
        policy: RootConfinement,
    ) -> Result<Reduced, PrivilegeError> {
        let (root, confined) = match policy {
            RootConfinement::Disabled => {
                warn!(root = %self.root.display(), "Root confinement disabled by configuration");
                (self.root, false)
            }
            _ => match reducer.confine_root(&self.root) {
                Ok(new_root) => {
                    info!(root = %self.root.display(), "Confined filesystem root");
                    (new_root, true)
                }
                Err(e) if policy == RootConfinement::Required => {
                    error!(root = %self.root.display(), error = %e, "Root confinement failed");
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        root = %self.root.display(),
                        error = %e,
                        "Root confinement failed, continuing WITHOUT filesystem confinement"
                    );
                    (self.root, false)
                }
            },
        };

        if let Err(e) = reducer.drop_capabilities() {
            error!(error = %e, "Failed to drop capabilities");
            return Err(e);
        }
        info!("Dropped all capabilities");

        Ok(Reduced { root, confined })
    }
}

/// The process after privilege reduction.
///
/// Only obtainable through [`Elevated::reduce`].
#[derive(Debug)]
pub struct Reduced {
    root: PathBuf,
    confined: bool,
}

impl Reduced {
    /// The serve root as reachable after confinement.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the filesystem root was actually changed.
    pub fn is_confined(&self) -> bool {
        self.confined
    }

    pub fn state(&self) -> PrivilegeState {
        PrivilegeState::Reduced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingReducer {
        calls: RefCell<Vec<&'static str>>,
        fail_root: bool,
        fail_caps: bool,
    }

    impl PrivilegeReducer for RecordingReducer {
        fn confine_root(&self, root: &Path) -> Result<PathBuf, PrivilegeError> {
            self.calls.borrow_mut().push("confine_root");
            if self.fail_root {
                return Err(PrivilegeError::Confinement {
                    path: root.to_path_buf(),
                    reason: "EPERM".into(),
                });
            }
            Ok(root.to_path_buf())
        }

        fn drop_capabilities(&self) -> Result<(), PrivilegeError> {
            self.calls.borrow_mut().push("drop_capabilities");
            if self.fail_caps {
                return Err(PrivilegeError::Capabilities("EPERM".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_reduce_runs_steps_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let reducer = RecordingReducer::default();

        let elevated = Elevated::new(temp_dir.path()).unwrap();
        assert_eq!(elevated.state(), PrivilegeState::Elevated);

        let reduced = elevated.reduce(&reducer, RootConfinement::BestEffort).unwrap();
        assert_eq!(reduced.state(), PrivilegeState::Reduced);
        assert!(reduced.is_confined());
        assert_eq!(*reducer.calls.borrow(), vec!["confine_root", "drop_capabilities"]);
    }

    #[test]
    fn test_best_effort_confinement_failure_continues() {
        let temp_dir = TempDir::new().unwrap();
        let reducer = RecordingReducer {
            fail_root: true,
            ..Default::default()
        };

        let elevated = Elevated::new(temp_dir.path()).unwrap();
        let root = elevated.root().to_path_buf();
        let reduced = elevated.reduce(&reducer, RootConfinement::BestEffort).unwrap();

        assert!(!reduced.is_confined());
        assert_eq!(reduced.root(), root);
        assert_eq!(reducer.calls.borrow().len(), 2);
    }

    #[test]
    fn test_required_confinement_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let reducer = RecordingReducer {
            fail_root: true,
            ..Default::default()
        };

        let result = Elevated::new(temp_dir.path())
            .unwrap()
            .reduce(&reducer, RootConfinement::Required);

        assert!(matches!(result, Err(PrivilegeError::Confinement { .. })));
        assert_eq!(*reducer.calls.borrow(), vec!["confine_root"]);
    }

    #[test]
    fn test_disabled_confinement_skips_step() {
        let temp_dir = TempDir::new().unwrap();
        let reducer = RecordingReducer::default();

        let reduced = Elevated::new(temp_dir.path())
            .unwrap()
            .reduce(&reducer, RootConfinement::Disabled)
            .unwrap();

        assert!(!reduced.is_confined());
        assert_eq!(*reducer.calls.borrow(), vec!["drop_capabilities"]);
    }

    #[test]
    fn test_capability_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let reducer = RecordingReducer {
            fail_root: true,
            fail_caps: true,
            ..Default::default()
        };

        let result = Elevated::new(temp_dir.path())
            .unwrap()
            .reduce(&reducer, RootConfinement::BestEffort);
        assert!(matches!(result, Err(PrivilegeError::Capabilities(_))));
    }

    #[test]
    fn test_elevated_requires_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("file.txt"), "x").unwrap();

        assert!(matches!(
            Elevated::new(temp_dir.path().join("file.txt")),
            Err(PrivilegeError::InvalidRoot { .. })
        ));
        assert!(matches!(
            Elevated::new(temp_dir.path().join("missing")),
            Err(PrivilegeError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_root_confinement_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: RootConfinement,
        }

        let w: Wrapper = toml::from_str("mode = \"best-effort\"").unwrap();
        assert_eq!(w.mode, RootConfinement::BestEffort);
        let w: Wrapper = toml::from_str("mode = \"required\"").unwrap();
        assert_eq!(w.mode, RootConfinement::Required);
        assert!(toml::from_str::<Wrapper>("mode = \"sometimes\"").is_err());

        assert_eq!(RootConfinement::Disabled.to_string(), "disabled");
    }
}

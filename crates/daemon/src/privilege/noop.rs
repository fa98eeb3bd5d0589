//! Reducer for platforms without a supported privilege model.

use std::path::{Path, PathBuf};

use tracing::warn;

use super::{PrivilegeError, PrivilegeReducer};

/// Does nothing. Root confinement reports [`PrivilegeError::Unsupported`];
/// dropping capabilities logs a warning and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReducer;

impl PrivilegeReducer for NoopReducer {
    fn confine_root(&self, _root: &Path) -> Result<PathBuf, PrivilegeError> {
        Err(PrivilegeError::Unsupported("root confinement"))
    }

    fn drop_capabilities(&self) -> Result<(), PrivilegeError> {
        warn!("Capability dropping is not supported on this platform; nothing to drop");
        Ok(())
    }
}

//! Linux reducer: `chroot(2)` plus clearing all capability sets.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use caps::{CapSet, Capability};
use nix::unistd::{chdir, chroot};
use tracing::debug;

use super::{PrivilegeError, PrivilegeReducer};

static CAPABILITIES_DROPPED: AtomicBool = AtomicBool::new(false);

/// Reduces privileges of the current Linux process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxReducer;

impl PrivilegeReducer for LinuxReducer {
    fn confine_root(&self, root: &Path) -> Result<PathBuf, PrivilegeError> {
        let failed = |e: nix::errno::Errno| PrivilegeError::Confinement {
            path: root.to_path_buf(),
            reason: e.to_string(),
        };

        chroot(root).map_err(failed)?;
        chdir("/").map_err(failed)?;
        Ok(PathBuf::from("/"))
    }

    fn drop_capabilities(&self) -> Result<(), PrivilegeError> {
        if CAPABILITIES_DROPPED.swap(true, Ordering::SeqCst) {
            return Err(PrivilegeError::AlreadyReduced);
        }

        let failed = |set: CapSet, e: caps::errors::CapsError| {
            PrivilegeError::Capabilities(format!("{set:?}: {e}"))
        };

        // The bounding set can only shrink while CAP_SETPCAP is still held.
        let can_shrink_bounding =
            caps::has_cap(None, CapSet::Effective, Capability::CAP_SETPCAP).unwrap_or(false);
        if can_shrink_bounding {
            caps::clear(None, CapSet::Bounding).map_err(|e| failed(CapSet::Bounding, e))?;
        } else {
            debug!("CAP_SETPCAP not held; leaving bounding set untouched");
        }

        if caps::runtime::ambient_set_supported().is_ok() {
            caps::clear(None, CapSet::Ambient).map_err(|e| failed(CapSet::Ambient, e))?;
        }

        for set in [CapSet::Inheritable, CapSet::Effective, CapSet::Permitted] {
            caps::clear(None, set).map_err(|e| failed(set, e))?;
        }

        let remaining = caps::read(None, CapSet::Permitted)
            .map_err(|e| failed(CapSet::Permitted, e))?;
        if !remaining.is_empty() {
            return Err(PrivilegeError::Capabilities(format!(
                "permitted set still holds {remaining:?}"
            )));
        }

        Ok(())
    }
}

//! Mount-namespace transition:
//! `setns` into the container's `mnt_ns`, with a guard that always
//! restores the caller's original namespace on drop, on both success
//! and failure paths.

use nvc_core::{NvcError, Result};
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use tracing::{debug, warn};

/// Enters `target` on construction; `Drop` always `setns`es back to
/// `original`. Held for the lifetime of one `driver_mount`/`device_mount`
/// call.
pub struct NamespaceGuard {
    original: RawFd,
    _original_file: Option<File>,
}

impl NamespaceGuard {
    /// `original` is the Library Context's captured fd for the caller's
    /// own mount namespace; `target`
    /// is `container.mnt_ns`.
    pub fn enter(target: &Path, original: RawFd) -> Result<Self> {
        setns_path(target)?;
        debug!("entered mount namespace {}", target.display());
        Ok(NamespaceGuard {
            original,
            _original_file: None,
        })
    }

    /// Test/standalone convenience: opens both namespace paths itself
    /// rather than taking an already-open fd from the Library Context.
    #[cfg(test)]
    pub fn enter_by_path(target: &Path, original: &Path) -> Result<Self> {
        let original_file = File::open(original).map_err(|e| NvcError::io(original.display().to_string(), e))?;
        setns_path(target)?;
        Ok(NamespaceGuard {
            original: original_file.as_raw_fd(),
            _original_file: Some(original_file),
        })
    }
}

fn setns_path(path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| NvcError::io(path.display().to_string(), e))?;
    setns_fd(file.as_raw_fd(), path.display().to_string())
}

fn setns_fd(fd: RawFd, label: String) -> Result<()> {
    let rv = unsafe { libc::setns(fd, libc::CLONE_NEWNS) };
    if rv != 0 {
        return Err(NvcError::Mount(format!(
            "setns({label}) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if let Err(e) = setns_fd(self.original, "caller namespace".into()) {
            warn!("failed to restore original mount namespace: {e}");
        } else {
            debug!("restored original mount namespace");
        }
    }
}

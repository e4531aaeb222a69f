//! Rollback tracking for one orchestrator call:
//! every mount appends a record; on failure every recorded mount is
//! unwound in reverse order (detached umount + best-effort target
//! removal), on success the list is simply dropped.

use nvc_core::model::MountRecord;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Default)]
pub struct RollbackList {
    records: Vec<MountRecord>,
}

impl RollbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: impl Into<PathBuf>, created_target: bool) {
        self.records.push(MountRecord {
            target: target.into(),
            created_target,
        });
    }

    /// Unwind every recorded mount, most recent first, matching the
    /// original's `unmount(mnt[i])` cleanup loops.
    pub fn unwind(&mut self) {
        for record in self.records.drain(..).rev() {
            unmount_detached(&record.target);
            if record.created_target {
                nvc_fs::remove_best_effort(&record.target);
            }
        }
    }

    /// Drop tracking without unwinding — the whole operation committed.
    pub fn commit(mut self) {
        self.records.clear();
    }
}

/// `umount2(path, MNT_DETACH)`, logging but not failing on error.
pub fn unmount_detached(path: &Path) {
    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) else {
        return;
    };
    let rv = unsafe { libc::umount2(cpath.as_ptr(), libc::MNT_DETACH) };
    if rv != 0 {
        warn!("detached umount of {} failed: {}", path.display(), std::io::Error::last_os_error());
    } else {
        debug!("unmounted {}", path.display());
    }
}

impl Drop for RollbackList {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            warn!("rollback list dropped with {} uncommitted mounts; unwinding", self.records.len());
            self.unwind();
        }
    }
}

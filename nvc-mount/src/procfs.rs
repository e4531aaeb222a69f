//! Procfs shroud and single-path procfs binds used by
//! the MIG capability steps (step 10), grounded in
//! `mount_procfs`/`mount_procfs_mig` of `nvc_mount.c`.

use crate::mountops::{self, STRICT_FLAGS};
use crate::record::RollbackList;
use nvc_core::{paths, NvcError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const SHROUD_FILES: &[&str] = &["params", "version", "registry"];

/// `tmpfs` over `<rootfs>/proc/driver/nvidia`, populated with filtered
/// copies of `params`/`version`/`registry` read from the host. Files
/// missing on the host are skipped rather than failing the mount.
pub fn mount_procfs_shroud(host_root: &Path, rootfs: &Path, uid: u32, gid: u32, rollback: &mut RollbackList) -> Result<()> {
    let dst = mountops::in_rootfs(rootfs, paths::NV_PROC_DRIVER);
    nvc_fs::dir_create(&dst, uid, gid, 0o555)?;
    mountops::tmpfs_mount_tracked(&dst, "0555", STRICT_FLAGS, rollback)?;

    let src_dir = host_root.join(paths::NV_PROC_DRIVER.trim_start_matches('/'));
    for name in SHROUD_FILES {
        let src = src_dir.join(name);
        let mut contents = match std::fs::read_to_string(&src) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("{} not found; skipping", src.display());
                continue;
            }
            Err(e) => return Err(NvcError::io(src.display().to_string(), e)),
        };
        if *name == "params" {
            contents = contents.replace("ModifyDeviceFiles: 1", "ModifyDeviceFiles: 0");
        }
        let dst_file = dst.join(name);
        nvc_fs::file_create(&dst_file, None, uid, gid, 0o444)?;
        nvc_fs::atomic_write(&dst_file, contents.as_bytes())?;
    }
    Ok(())
}

/// Bind-mount one procfs node (a GI/CI `access` file, or the global
/// `nvidia-caps` directory) read-only into the container.
pub fn mount_procfs_node(host_root: &Path, rootfs: &Path, rel: &str, uid: u32, gid: u32, rollback: &mut RollbackList) -> Result<()> {
    let src = host_root.join(rel.trim_start_matches('/'));
    let dst = mountops::in_rootfs(rootfs, rel);
    let meta = std::fs::symlink_metadata(&src).map_err(|e| NvcError::io(src.display().to_string(), e))?;
    let mode = meta.permissions().mode() & 0o7777;
    if meta.is_dir() {
        nvc_fs::dir_create(&dst, uid, gid, mode)?;
    } else {
        nvc_fs::file_create(&dst, None, uid, gid, mode)?;
    }
    mountops::bind_mount_tracked(&src, &dst, STRICT_FLAGS, true, rollback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn procfs_node_rejects_missing_source() {
        let host = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        let mut rollback = RollbackList::new();
        let err = mount_procfs_node(host.path(), rootfs.path(), "/proc/driver/nvidia-caps", 0, 0, &mut rollback);
        assert!(err.is_err());
    }
}

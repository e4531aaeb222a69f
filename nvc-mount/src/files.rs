//! Flag-gated bulk file mounts, grounded in
//! `mount_files`/`mount_firmware`/`mount_ipc` of `nvc_mount.c`. Unlike
//! the original, every path handed in here is already host-absolute
//! (`nvc-inventory` root-joins paths at discovery time), so there's no
//! separate host-root parameter to re-resolve sources against for the
//! bulk binary/library case.

use crate::flagmatch::{match_binary_flags, match_library_flags};
use crate::mountops::{self, BIN_FLAGS, IPC_FLAGS};
use crate::record::RollbackList;
use nvc_container::ContainerFlags;
use nvc_core::{paths, NvcError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn regular_file_mode(src: &Path) -> Result<u32> {
    let meta = std::fs::symlink_metadata(src).map_err(|e| NvcError::io(src.display().to_string(), e))?;
    if meta.file_type().is_dir() || meta.file_type().is_symlink() {
        return Err(NvcError::ConfigInvalid(format!(
            "unexpected source file mode for {}",
            src.display()
        )));
    }
    Ok(meta.permissions().mode() & 0o7777)
}

/// Bind-mount every candidate in `candidates` whose basename matches
/// `flags` (binary or library gating) into `<rootfs>/<dir_rel>`,
/// returning the container-side paths actually mounted (so callers can
/// run the library symlink fixups over them).
pub fn mount_files(
    rootfs: &Path,
    flags: ContainerFlags,
    dir_rel: &str,
    candidates: &[PathBuf],
    uid: u32,
    gid: u32,
    rollback: &mut RollbackList,
) -> Result<Vec<PathBuf>> {
    let dst_dir = mountops::in_rootfs(rootfs, dir_rel);
    nvc_fs::dir_create(&dst_dir, uid, gid, 0o755)?;

    let mut mounted = Vec::new();
    for src in candidates {
        let Some(name) = src.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !match_binary_flags(name, flags) && !match_library_flags(name, flags) {
            continue;
        }
        let mode = regular_file_mode(src)?;
        let dst = dst_dir.join(name);
        nvc_fs::file_create(&dst, None, uid, gid, mode)?;
        mountops::bind_mount_tracked(src, &dst, BIN_FLAGS, true, rollback)?;
        mounted.push(dst);
    }
    Ok(mounted)
}

/// Bind-mount one firmware file at the same path relative to
/// `host_root`, inside `rootfs`.
pub fn mount_firmware(host_root: &Path, rootfs: &Path, src: &Path, uid: u32, gid: u32, rollback: &mut RollbackList) -> Result<()> {
    let rel = src.strip_prefix(host_root).unwrap_or(src);
    let dst = mountops::in_rootfs(rootfs, &rel.to_string_lossy());
    let mode = regular_file_mode(src)?;
    nvc_fs::file_create(&dst, None, uid, gid, mode)?;
    mountops::bind_mount_tracked(src, &dst, BIN_FLAGS, true, rollback)
}

/// Which capability an IPC path requires before it's mounted at all:
/// persistenced/fabricmanager sockets need utility libs, everything
/// else (the MPS pipe dir) needs compute libs.
fn ipc_required_flag(ipc: &Path) -> ContainerFlags {
    let s = ipc.to_string_lossy();
    if s.ends_with(paths::NV_PERSISTENCED_SOCKET) || s.ends_with(paths::NV_FABRICMANAGER_SOCKET) {
        ContainerFlags::UTILITY_LIBS
    } else {
        ContainerFlags::COMPUTE_LIBS
    }
}

/// Bind-mount one IPC socket or directory, skipped (returning `false`)
/// when the corresponding capability flag isn't set.
pub fn mount_ipc(host_root: &Path, rootfs: &Path, flags: ContainerFlags, src: &Path, uid: u32, gid: u32, rollback: &mut RollbackList) -> Result<bool> {
    if !flags.contains(ipc_required_flag(src)) {
        return Ok(false);
    }
    let rel = src.strip_prefix(host_root).unwrap_or(src);
    let dst = mountops::in_rootfs(rootfs, &rel.to_string_lossy());
    let meta = std::fs::symlink_metadata(src).map_err(|e| NvcError::io(src.display().to_string(), e))?;
    let mode = meta.permissions().mode() & 0o7777;
    if meta.is_dir() {
        nvc_fs::dir_create(&dst, uid, gid, mode)?;
    } else {
        nvc_fs::file_create(&dst, None, uid, gid, mode)?;
    }
    mountops::bind_mount_tracked(src, &dst, IPC_FLAGS, true, rollback)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn non_matching_flags_mount_nothing() {
        let rootfs = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("nvidia-smi");
        std::fs::write(&src, b"").unwrap();

        let mut rollback = RollbackList::new();
        let mounted = mount_files(rootfs.path(), ContainerFlags::COMPUTE_BINS, "/usr/bin", &[src], 0, 0, &mut rollback).unwrap();
        assert!(mounted.is_empty());
    }

    #[test]
    fn directory_source_is_rejected() {
        let rootfs = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let src = src_dir.path().join("nvidia-smi");
        std::fs::create_dir(&src).unwrap();

        let mut rollback = RollbackList::new();
        let err = mount_files(rootfs.path(), ContainerFlags::UTILITY_BINS, "/usr/bin", &[src], 0, 0, &mut rollback);
        assert!(err.is_err());
    }

    #[test]
    fn ipc_without_matching_capability_is_skipped() {
        let rootfs = tempdir().unwrap();
        let host = tempdir().unwrap();
        let sock = host.path().join("var/run/nvidia-persistenced/socket");
        std::fs::create_dir_all(sock.parent().unwrap()).unwrap();
        std::fs::write(&sock, b"").unwrap();

        let mut rollback = RollbackList::new();
        let mounted = mount_ipc(host.path(), rootfs.path(), ContainerFlags::COMPUTE_LIBS, &sock, 0, 0, &mut rollback).unwrap();
        assert!(!mounted);
    }
}

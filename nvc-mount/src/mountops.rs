//! Low-level `mount(2)` wrappers, grounded in `xmount`/
//! `mount_with_flags`/`mount_in_root` of `nvc_mount.c`.

use crate::record::RollbackList;
use nvc_core::{NvcError, Result};
use std::ffi::CString;
use std::path::{Path, PathBuf};
use tracing::info;

fn cstr(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| NvcError::PathInvalid(path.display().to_string()))
}

fn raw_mount(src: Option<&Path>, dst: &Path, fstype: Option<&str>, flags: libc::c_ulong, data: Option<&str>) -> Result<()> {
    let src_c = src.map(cstr).transpose()?;
    let dst_c = cstr(dst)?;
    let fstype_c = fstype.map(|t| CString::new(t).unwrap());
    let data_c = data.map(|d| CString::new(d).unwrap());

    let rv = unsafe {
        libc::mount(
            src_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
            dst_c.as_ptr(),
            fstype_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
            flags,
            data_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr() as *const libc::c_void),
        )
    };
    if rv != 0 {
        return Err(NvcError::Mount(format!(
            "mount({}) failed: {}",
            dst.display(),
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Asserts `MS_PRIVATE|MS_REC` on `/` inside the current (already
/// entered) namespace, so nothing we bind back-propagates to host
/// mount peers.
pub fn make_root_private_recursive() -> Result<()> {
    raw_mount(None, Path::new("/"), None, libc::MS_PRIVATE | libc::MS_REC, None)
}

/// Bind-mount `src` onto `dst`, then remount with `extra_flags` added to
/// `MS_BIND`. `dst` must already exist (caller creates it via
/// `nvc-fs::file_create`/`dir_create`). On remount failure the bind is
/// torn back down before returning.
pub fn bind_mount(src: &Path, dst: &Path, extra_flags: libc::c_ulong) -> Result<()> {
    info!("mounting {} at {}", src.display(), dst.display());
    raw_mount(Some(src), dst, None, libc::MS_BIND, None)?;
    if let Err(e) = raw_mount(None, dst, None, libc::MS_BIND | libc::MS_REMOUNT | extra_flags, None) {
        crate::record::unmount_detached(dst);
        return Err(e);
    }
    Ok(())
}

/// Bind-mount `src` at `dst` and record it for rollback.
pub fn bind_mount_tracked(src: &Path, dst: &Path, extra_flags: libc::c_ulong, created: bool, rollback: &mut RollbackList) -> Result<()> {
    bind_mount(src, dst, extra_flags)?;
    rollback.push(dst.to_path_buf(), created);
    Ok(())
}

/// Mount a fresh `tmpfs` at `dst` with `mode`, then remount with
/// `extra_flags`.
pub fn tmpfs_mount(dst: &Path, mode: &str, extra_flags: libc::c_ulong) -> Result<()> {
    info!("mounting tmpfs at {}", dst.display());
    raw_mount(None, dst, Some("tmpfs"), 0, Some(&format!("mode={mode}")))?;
    // Some kernels require MS_BIND to remount within a user namespace.
    if let Err(e) = raw_mount(None, dst, None, libc::MS_BIND | libc::MS_REMOUNT | extra_flags, None) {
        crate::record::unmount_detached(dst);
        return Err(e);
    }
    Ok(())
}

pub fn tmpfs_mount_tracked(dst: &Path, mode: &str, extra_flags: libc::c_ulong, rollback: &mut RollbackList) -> Result<()> {
    tmpfs_mount(dst, mode, extra_flags)?;
    rollback.push(dst.to_path_buf(), false);
    Ok(())
}

/// Verify a bind-mounted device node's `rdev` matches what was
/// expected, failing `device-mismatch` otherwise.
pub fn verify_device_mismatch(dst: &Path, expected: nvc_core::DevId) -> Result<()> {
    let actual = nvc_fs::stat_rdev(dst)?;
    if actual != expected {
        return Err(NvcError::DeviceMismatch {
            expected: expected.to_string(),
            found: actual.to_string(),
        });
    }
    Ok(())
}

/// Standard flags for bind-mounted binaries/files.
pub const BIN_FLAGS: libc::c_ulong = libc::MS_RDONLY | libc::MS_NODEV | libc::MS_NOSUID;
/// Standard flags for bind-mounted libraries.
pub const LIB_FLAGS: libc::c_ulong = libc::MS_RDONLY | libc::MS_NODEV | libc::MS_NOSUID;
/// Flags for firmware/device-node/IPC mounts.
pub const STRICT_FLAGS: libc::c_ulong = libc::MS_RDONLY | libc::MS_NODEV | libc::MS_NOSUID | libc::MS_NOEXEC;
/// Flags for IPC mounts that must remain writable (sockets/pipes).
pub const IPC_FLAGS: libc::c_ulong = libc::MS_NODEV | libc::MS_NOSUID | libc::MS_NOEXEC;

/// Resolve `<rootfs>/<rel>`, purely lexically (mirrors `path_resolve_full`).
pub fn in_rootfs(rootfs: &Path, rel: &str) -> PathBuf {
    nvc_fs::join(rootfs, Path::new(rel.trim_start_matches('/')))
}

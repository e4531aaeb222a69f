//! Rootfs switch for the confined `ldconfig` child,
//! grounded in `change_rootfs` of `nvc_ldcache.c`. Runs after the
//! namespace/capability steps, before resource limits are applied.

use nvc_core::{NvcError, Result};
use std::ffi::CString;
use std::path::Path;

fn cstr(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| NvcError::PathInvalid(path.display().to_string()))
}

fn raw_mount(src: Option<&Path>, dst: &Path, fstype: Option<&str>, flags: libc::c_ulong) -> Result<()> {
    let src_c = src.map(cstr).transpose()?;
    let dst_c = cstr(dst)?;
    let fstype_c = fstype.map(|t| CString::new(t).unwrap());
    let rv = unsafe {
        libc::mount(
            src_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
            dst_c.as_ptr(),
            fstype_c.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
            flags,
            std::ptr::null(),
        )
    };
    if rv != 0 {
        return Err(NvcError::Mount(format!("mount({}) failed: {}", dst.display(), std::io::Error::last_os_error())));
    }
    Ok(())
}

fn open_path_dir(path: &Path) -> Result<libc::c_int> {
    let c = cstr(path)?;
    let fd = unsafe { libc::open(c.as_ptr(), libc::O_PATH | libc::O_DIRECTORY) };
    if fd < 0 {
        return Err(NvcError::io(path.display().to_string(), std::io::Error::last_os_error()));
    }
    Ok(fd)
}

fn fchdir(fd: libc::c_int) -> Result<()> {
    if unsafe { libc::fchdir(fd) } != 0 {
        return Err(NvcError::io("fchdir".into(), std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Switch the calling process's view of `/` to `rootfs`.
/// `no_pivot` selects `mount(MS_MOVE)` over `pivot_root`;
/// `mount_proc` is set when the child will `fexecve` (which needs
/// `/proc/self/fd`), causing `/proc` to be freshly (re-)mounted rather
/// than just tmpfs-hidden. Returns whether the calling namespace allows
/// dropping supplementary groups (read from `/proc/self/setgroups`).
pub fn change_rootfs(rootfs: &Path, no_pivot: bool, mount_proc: bool, uid: u32, gid: u32) -> Result<bool> {
    if unsafe { libc::unshare(libc::CLONE_NEWNS) } != 0 {
        return Err(NvcError::Mount(format!("unshare(CLONE_NEWNS) failed: {}", std::io::Error::last_os_error())));
    }
    raw_mount(None, Path::new("/"), None, libc::MS_PRIVATE | libc::MS_REC)?;
    raw_mount(Some(rootfs), rootfs, None, libc::MS_BIND | libc::MS_REC)?;

    if no_pivot {
        raw_mount(Some(rootfs), Path::new("/"), None, libc::MS_MOVE)?;
        let newroot = open_path_dir(rootfs)?;
        fchdir(newroot)?;
        unsafe { libc::close(newroot) };
    } else {
        let oldroot = open_path_dir(Path::new("/"))?;
        let newroot = open_path_dir(rootfs)?;
        fchdir(newroot)?;
        let dot = cstr(Path::new("."))?;
        if unsafe { libc::syscall(libc::SYS_pivot_root, dot.as_ptr(), dot.as_ptr()) } != 0 {
            return Err(NvcError::Mount(format!("pivot_root failed: {}", std::io::Error::last_os_error())));
        }
        fchdir(oldroot)?;
        let dot_c = cstr(Path::new("."))?;
        if unsafe { libc::umount2(dot_c.as_ptr(), libc::MNT_DETACH) } != 0 {
            return Err(NvcError::Mount(format!("umount2 of old root failed: {}", std::io::Error::last_os_error())));
        }
        fchdir(newroot)?;
        unsafe {
            libc::close(oldroot);
            libc::close(newroot);
        }
    }

    let dot = cstr(Path::new("."))?;
    if unsafe { libc::chroot(dot.as_ptr()) } != 0 {
        return Err(NvcError::Mount(format!("chroot failed: {}", std::io::Error::last_os_error())));
    }

    if mount_proc {
        raw_mount(None, Path::new("/proc"), Some("proc"), libc::MS_RDONLY)?;
    }

    let setgroups = std::fs::read_to_string("/proc/self/setgroups").unwrap_or_default();
    let drop_groups = parse_drop_groups(&setgroups);

    let hide_from = if mount_proc { 1 } else { 0 };
    let mounts: [&Path; 3] = [Path::new("/proc"), Path::new("/sys"), Path::new("/dev")];
    for dst in &mounts[hide_from..] {
        raw_mount(None, dst, Some("tmpfs"), libc::MS_RDONLY)?;
    }

    raw_mount(None, Path::new("/dev"), Some("tmpfs"), libc::MS_REMOUNT)?;
    nvc_fs::file_create(Path::new("/dev/fd"), Some(Path::new("/proc/self/fd")), uid, gid, 0o777)?;
    raw_mount(None, Path::new("/dev"), Some("tmpfs"), libc::MS_REMOUNT | libc::MS_RDONLY)?;

    Ok(drop_groups)
}

/// We only get to clear supplementary groups when the user namespace
/// hasn't locked `/proc/self/setgroups` to `deny` (standalone mode
/// inside a restricted user namespace).
fn parse_drop_groups(setgroups_contents: &str) -> bool {
    !setgroups_contents.trim_start().starts_with("deny")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_disables_group_drop() {
        assert!(!parse_drop_groups("deny\n"));
    }

    #[test]
    fn allow_or_missing_permits_group_drop() {
        assert!(parse_drop_groups("allow\n"));
        assert!(parse_drop_groups(""));
    }
}

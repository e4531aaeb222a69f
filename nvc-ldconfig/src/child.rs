//! The confined child process itself: namespace
//! entry, capability/privilege adjustment, rootfs switch, resource
//! limits, seccomp, and the final `exec`. Grounded in the `child == 0`
//! branch of `nvc_ldcache_update`.
//!
//! Every function here runs after `clone`, in the forked child. Nothing
//! returns to the caller: success ends in `fexecve`/`execve` replacing
//! the process image, failure ends in `_exit`.

use crate::{privilege, rootfs, seccomp};
use nvc_core::{NvcError, Result};
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

/// Per-container parameters the child needs, independent of which
/// binary is ultimately run.
pub struct ChildParams {
    pub mnt_ns: PathBuf,
    pub rootfs: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub no_pivot: bool,
    pub secure_mode: bool,
}

/// What to execute: either a sealed memfd (host binary) or a plain
/// rootfs-relative path, plus the argv to run it with.
pub struct ExecPlan {
    pub argv: Vec<CString>,
    pub fd: Option<OwnedFd>,
    pub path: CString,
    pub host_ldconfig: bool,
}

/// Runs to completion in the child and never returns; always calls
/// `std::process::exit` (on failure) or replaces the process image (on
/// success).
pub fn run_child(params: ChildParams, plan: ExecPlan) -> ! {
    set_process_name();
    match try_run(&params, &plan) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!("could not start {:?}: {e}", plan.path);
            std::process::exit(1);
        }
    }
}

fn set_process_name() {
    let name = CString::new("nvc:[ldconfig]").unwrap();
    unsafe {
        libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0);
    }
}

fn setns_mnt(path: &std::path::Path) -> Result<()> {
    let c = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| NvcError::PathInvalid(path.display().to_string()))?;
    let fd = unsafe { libc::open(c.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        return Err(NvcError::io(path.display().to_string(), std::io::Error::last_os_error()));
    }
    let rv = unsafe { libc::setns(fd, libc::CLONE_NEWNS) };
    unsafe { libc::close(fd) };
    if rv != 0 {
        return Err(NvcError::Mount(format!("setns({}) failed: {}", path.display(), std::io::Error::last_os_error())));
    }
    Ok(())
}

fn try_run(params: &ChildParams, plan: &ExecPlan) -> Result<std::convert::Infallible> {
    setns_mnt(&params.mnt_ns)?;
    privilege::adjust_capabilities(params.uid, plan.host_ldconfig, params.secure_mode)?;
    let drop_groups = rootfs::change_rootfs(&params.rootfs, params.no_pivot, plan.host_ldconfig, params.uid, params.gid)?;
    privilege::limit_resources()?;
    nvc_priv::drop_to_uid_gid(params.uid, params.gid, drop_groups)?;
    seccomp::limit_syscalls(params.secure_mode)?;
    exec(plan)
}

fn exec(plan: &ExecPlan) -> Result<std::convert::Infallible> {
    let mut argv_ptrs: Vec<*const libc::c_char> = plan.argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let envp: [*const libc::c_char; 1] = [std::ptr::null()];

    if let Some(fd) = &plan.fd {
        unsafe {
            libc::fexecve(fd.as_raw_fd(), argv_ptrs.as_ptr(), envp.as_ptr());
        }
    } else {
        unsafe {
            libc::execve(plan.path.as_ptr(), argv_ptrs.as_ptr(), envp.as_ptr());
        }
    }
    Err(NvcError::ExecFailed(format!(
        "exec of {:?} failed: {}",
        plan.path,
        std::io::Error::last_os_error()
    )))
}

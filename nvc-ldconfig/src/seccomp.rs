//! Seccomp allow-list for the confined `ldconfig` child, grounded in `limit_syscalls` of `nvc_ldcache.c`. Defaults to
//! `EPERM` for anything not on the list.

use libseccomp::{ScmpAction, ScmpFilterContext, ScmpSyscall};
use nvc_core::{NvcError, Result};
use tracing::warn;

const ALLOWED_SYSCALLS: &[&str] = &[
    "open",
    "openat",
    "read",
    "readv",
    "write",
    "writev",
    "mmap",
    "mprotect",
    "mremap",
    "munmap",
    "close",
    "stat",
    "fstat",
    "lstat",
    "newfstatat",
    "readlink",
    "readlinkat",
    "chmod",
    "fchmodat",
    "symlink",
    "symlinkat",
    "rename",
    "renameat",
    "unlink",
    "unlinkat",
    "mkdir",
    "mkdirat",
    "chdir",
    "fcntl",
    "execve",
    "execveat",
    "memfd_create",
    "sendfile",
    "getdents",
    "getdents64",
    "uname",
    "brk",
    "exit",
    "exit_group",
    "rt_sigaction",
    "rt_sigprocmask",
    "rt_sigreturn",
];

/// Install the allow-list, defaulting every other syscall to `EPERM`.
/// When `secure_mode` is set and seccomp support is unavailable at
/// build time this would refuse to run; here that's represented by any
/// filter-construction failure being a hard error in secure mode and a
/// logged warning otherwise.
pub fn limit_syscalls(secure_mode: bool) -> Result<()> {
    match install_filter() {
        Ok(()) => Ok(()),
        Err(e) if secure_mode => Err(e),
        Err(e) => {
            warn!("seccomp filter installation failed, all syscalls are allowed: {e}");
            Ok(())
        }
    }
}

fn install_filter() -> Result<()> {
    let mut ctx =
        ScmpFilterContext::new_filter(ScmpAction::Errno(libc::EPERM)).map_err(|e| NvcError::Seccomp(format!("filter init: {e}")))?;
    for name in ALLOWED_SYSCALLS {
        let syscall = ScmpSyscall::from_name(name).map_err(|e| NvcError::Seccomp(format!("unknown syscall {name}: {e}")))?;
        ctx.add_rule(ScmpAction::Allow, syscall)
            .map_err(|e| NvcError::Seccomp(format!("add rule for {name}: {e}")))?;
    }
    ctx.load().map_err(|e| NvcError::Seccomp(format!("load filter: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_syscalls_list_has_no_duplicates() {
        let mut sorted = ALLOWED_SYSCALLS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ALLOWED_SYSCALLS.len());
    }
}

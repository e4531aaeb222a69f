//! Library Context: the process-wide singleton created by
//! `init` and destroyed by `shutdown`.

use crate::options::LibraryOptions;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Configuration supplied to `init` (mirrors `nvc_config`).
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Host driver root path, default `/`.
    pub root: PathBuf,
    /// Path to the glibc ld.so cache, default `/etc/ld.so.cache`.
    pub ldcache: PathBuf,
    /// Unprivileged uid/gid the driver helper drops to.
    pub uid: u32,
    pub gid: u32,
    pub options: LibraryOptions,
    /// IMEX channel ids to make available, when requested by a caller.
    pub imex_channels: Vec<u32>,
    /// Use `mount(MS_MOVE)` instead of `pivot_root` for the ldconfig
    /// child's rootfs switch; needed when the calling
    /// process is itself confined somewhere `pivot_root` is rejected.
    pub no_pivot: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            ldcache: PathBuf::from("/etc/ld.so.cache"),
            uid: 0,
            gid: 0,
            options: LibraryOptions::empty(),
            imex_channels: Vec::new(),
            no_pivot: false,
        }
    }
}

/// Process-wide singleton threaded through every operation.
///
/// Held as an explicit value the coordinator owns and passes by
/// reference rather than hidden global state, constructed once by
/// `init` and dropped by `shutdown`.
pub struct LibraryContext {
    pub config: LibraryConfig,
    /// `/proc/self/ns/mnt` fd captured at construction time. Every
    /// namespace-entering operation restores this fd before returning,
    /// on every exit path.
    saved_mnt_ns: RawFd,
}

impl LibraryContext {
    /// Capture the calling process's own mount namespace fd and build a
    /// context around `config`. This is the only place that fd is
    /// captured; see the invariant on `saved_mnt_ns`.
    pub fn new(config: LibraryConfig) -> std::io::Result<Self> {
        let path = std::ffi::CString::new("/proc/self/ns/mnt").unwrap();
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            config,
            saved_mnt_ns: fd,
        })
    }

    /// The fd of the namespace every mount-namespace-entering operation
    /// must return to.
    pub fn saved_mnt_ns(&self) -> RawFd {
        self.saved_mnt_ns
    }
}

impl Drop for LibraryContext {
    fn drop(&mut self) {
        if self.saved_mnt_ns >= 0 {
            unsafe {
                libc::close(self.saved_mnt_ns);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_host_root() {
        let cfg = LibraryConfig::default();
        assert_eq!(cfg.root, PathBuf::from("/"));
        assert_eq!(cfg.ldcache, PathBuf::from("/etc/ld.so.cache"));
    }

    #[test]
    fn context_captures_a_valid_mnt_ns_fd() {
        let ctx = LibraryContext::new(LibraryConfig::default()).expect("open mnt ns");
        assert!(ctx.saved_mnt_ns() >= 0);
    }
}

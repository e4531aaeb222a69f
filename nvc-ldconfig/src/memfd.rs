//! Sealed-`memfd` virtualization of a host `ldconfig` binary, grounded in `open_as_memfd`/`sendfile_nointr` of
//! `nvc_ldcache.c`. A host binary must never run against a writable
//! file-descriptor path inside the less-trusted chroot, so the binary
//! is copied into an anonymous, fully sealed memory file and executed
//! from there via `fexecve`.

use nvc_core::{NvcError, Result};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

const F_ADD_SEALS: libc::c_int = 1024 + 9;
const F_SEAL_SEAL: libc::c_int = 0x0001;
const F_SEAL_SHRINK: libc::c_int = 0x0002;
const F_SEAL_GROW: libc::c_int = 0x0004;
const F_SEAL_WRITE: libc::c_int = 0x0008;

fn cstr(path: &Path) -> Result<std::ffi::CString> {
    std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| NvcError::PathInvalid(path.display().to_string()))
}

/// Open `path` read-only, copy it into a sealed, `CLOEXEC` `memfd`, and
/// return the memfd. Falls back to the caller opening the path directly
/// (`open_host_binary_readonly`) when `memfd_create` is unavailable.
pub fn open_as_memfd(path: &Path) -> Result<OwnedFd> {
    let cpath = cstr(path)?;
    let src_fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY) };
    if src_fd < 0 {
        return Err(NvcError::io(path.display().to_string(), std::io::Error::last_os_error()));
    }
    let src_fd = unsafe { OwnedFd::from_raw_fd(src_fd) };

    let name = cstr(path)?;
    let memfd = unsafe { libc::syscall(libc::SYS_memfd_create, name.as_ptr(), 0x0002u32 | 0x0001u32) };
    if memfd < 0 {
        return Err(NvcError::io("memfd_create".into(), std::io::Error::last_os_error()));
    }
    let memfd = unsafe { OwnedFd::from_raw_fd(memfd as RawFd) };

    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(src_fd.as_raw_fd(), &mut stat) } != 0 {
        return Err(NvcError::io(path.display().to_string(), std::io::Error::last_os_error()));
    }

    let mut sent: i64 = 0;
    let mut offset: libc::off_t = 0;
    while sent < stat.st_size {
        let n = unsafe {
            libc::sendfile(
                memfd.as_raw_fd(),
                src_fd.as_raw_fd(),
                &mut offset,
                (stat.st_size - sent) as usize,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(NvcError::io("sendfile".into(), err));
        }
        sent += n as i64;
    }

    let seals = F_SEAL_SEAL | F_SEAL_SHRINK | F_SEAL_GROW | F_SEAL_WRITE;
    if unsafe { libc::fcntl(memfd.as_raw_fd(), F_ADD_SEALS, seals) } != 0 {
        return Err(NvcError::io("fcntl(F_ADD_SEALS)".into(), std::io::Error::last_os_error()));
    }

    Ok(memfd)
}

/// Plain read-only open, used when [`open_as_memfd`] fails.
pub fn open_host_binary_readonly(path: &Path) -> Result<OwnedFd> {
    let cpath = cstr(path)?;
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(NvcError::io(path.display().to_string(), std::io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn memfd_copy_preserves_contents() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"#!/bin/sh\necho hi\n").unwrap();
        let memfd = open_as_memfd(f.path()).unwrap();

        let mut buf = [0u8; 32];
        let n = unsafe { libc::pread(memfd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        assert!(n > 0);
        assert_eq!(&buf[..b"#!/bin/sh\n".len()], b"#!/bin/sh\n");
    }

    #[test]
    fn sealed_memfd_rejects_writes() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"data").unwrap();
        let memfd = open_as_memfd(f.path()).unwrap();
        let rv = unsafe { libc::write(memfd.as_raw_fd(), b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(rv, -1);
    }
}

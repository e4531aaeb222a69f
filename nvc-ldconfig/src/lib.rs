//! Confined `ldconfig` runner: refreshes a container's
//! `/etc/ld.so.cache` by running its own `ldconfig` (or a sealed-memfd
//! copy of the host's) inside a disposable, heavily restricted child
//! process. Grounded in `nvc_ldcache_update` of `nvc_ldcache.c`.

mod child;
mod memfd;
mod privilege;
mod rootfs;
mod seccomp;

use child::{ChildParams, ExecPlan};
use nvc_container::{ContainerDescriptor, CudaCompatMode};
use nvc_core::{LibraryContext, NvcError, Result};
use std::ffi::CString;
use std::path::Path;
use tracing::info;

fn secure_mode() -> bool {
    match std::env::var("NVC_INSECURE_MODE") {
        Ok(v) => !(v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")),
        Err(_) => true,
    }
}

fn build_argv(container: &ContainerDescriptor, exec_path: &str) -> Vec<String> {
    let mut argv = vec![
        exec_path.to_string(),
        "-f".to_string(),
        "/etc/ld.so.conf".to_string(),
        "-C".to_string(),
        "/etc/ld.so.cache".to_string(),
    ];
    if container.cuda_compat_mode == CudaCompatMode::Ldconfig {
        if let Some(dir) = &container.cuda_compat_dir {
            argv.push(dir.to_string_lossy().into_owned());
        }
    }
    argv.push(container.libs_dir.clone());
    argv.push(container.libs32_dir.clone());
    argv
}

fn create_process(flags: libc::c_int) -> Result<libc::pid_t> {
    let rv = unsafe {
        libc::syscall(
            libc::SYS_clone,
            (libc::SIGCHLD | flags) as libc::c_ulong,
            std::ptr::null::<libc::c_void>(),
            std::ptr::null::<libc::c_void>(),
            std::ptr::null::<libc::c_void>(),
            std::ptr::null::<libc::c_void>(),
        )
    };
    if rv < 0 {
        return Err(NvcError::io("clone".into(), std::io::Error::last_os_error()));
    }
    Ok(rv as libc::pid_t)
}

fn wait_for_child(child: libc::pid_t, argv0: &str) -> Result<()> {
    let mut status: libc::c_int = 0;
    if unsafe { libc::waitpid(child, &mut status, 0) } < 0 {
        return Err(NvcError::io("waitpid".into(), std::io::Error::last_os_error()));
    }
    if libc::WIFSIGNALED(status) {
        return Err(NvcError::KilledBySignal(libc::WTERMSIG(status)));
    }
    if libc::WIFEXITED(status) {
        return match libc::WEXITSTATUS(status) {
            0 => Ok(()),
            127 => Err(NvcError::ExecFailed(format!("{argv0} not found or not executable"))),
            137 => Err(NvcError::KilledBySignal(libc::SIGKILL)),
            code => Err(NvcError::LdconfigFailed(code)),
        };
    }
    Err(NvcError::Mount(format!("{argv0} child terminated abnormally")))
}

/// Refresh `container`'s ld.so cache. Blocks until the confined child
/// exits; on any error no file outside `container.rootfs` was touched.
pub fn ldcache_update(ctx: &LibraryContext, container: &ContainerDescriptor) -> Result<()> {
    let secure = secure_mode();
    let (host_ldconfig, exec_path) = match container.ldconfig.strip_prefix('@') {
        Some(p) => (true, p.to_string()),
        None => (false, container.ldconfig.clone()),
    };

    let argv_strs = build_argv(container, &exec_path);
    let argv: Vec<CString> = argv_strs.iter().map(|s| CString::new(s.as_str()).expect("argv has no NUL")).collect();
    let exec_path_c = CString::new(exec_path.as_str()).map_err(|_| NvcError::PathInvalid(exec_path.clone()))?;

    let fd = if host_ldconfig {
        let host_path = Path::new(&exec_path);
        info!("executing {} from host at {}", exec_path, container.rootfs.display());
        match memfd::open_as_memfd(host_path) {
            Ok(fd) => Some(fd),
            Err(e) => {
                tracing::warn!("failed to create virtual copy of the ldconfig binary: {e}");
                Some(memfd::open_host_binary_readonly(host_path)?)
            }
        }
    } else {
        info!("executing {} at {}", exec_path, container.rootfs.display());
        None
    };

    let plan = ExecPlan {
        argv,
        fd,
        path: exec_path_c,
        host_ldconfig,
    };
    let params = ChildParams {
        mnt_ns: container.mnt_ns.clone(),
        rootfs: container.rootfs.clone(),
        uid: container.uid,
        gid: container.gid,
        no_pivot: ctx.config.no_pivot,
        secure_mode: secure,
    };

    let child = create_process(libc::CLONE_NEWPID | libc::CLONE_NEWIPC)?;
    if child == 0 {
        child::run_child(params, plan);
    }

    wait_for_child(child, &exec_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvc_container::{ContainerConfig, ContainerDescriptor};
    use std::fs;
    use tempfile::tempdir;

    fn make_fake_proc(proc_root: &std::path::Path, pid: i32, rootfs_target: &std::path::Path) {
        let pid_dir = proc_root.join(format!("proc/{pid}"));
        fs::create_dir_all(&pid_dir).unwrap();
        fs::create_dir_all(rootfs_target).unwrap();
        std::os::unix::fs::symlink(rootfs_target, pid_dir.join("root")).unwrap();
        fs::create_dir_all(pid_dir.join("ns")).unwrap();
        fs::write(pid_dir.join("ns/mnt"), b"").unwrap();
        fs::write(pid_dir.join("mounts"), b"cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n").unwrap();
        fs::write(pid_dir.join("cgroup"), b"0::/\n").unwrap();
    }

    #[test]
    fn host_binary_path_is_stripped_of_its_at_prefix() {
        let proc_root = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        make_fake_proc(rootfs.path(), 9, rootfs.path());

        let mut cfg = ContainerConfig::new(9, rootfs.path());
        cfg.ldconfig = Some("@/usr/sbin/ldconfig".into());
        let desc = ContainerDescriptor::new(proc_root.path(), cfg, Some("standalone no-cgroups no-devbind utility")).unwrap();

        assert!(desc.ldconfig.starts_with('@'));
        let stripped = desc.ldconfig.strip_prefix('@').unwrap();
        assert_eq!(stripped, "/usr/sbin/ldconfig");
    }

    #[test]
    fn argv_omits_compat_dir_outside_ldconfig_mode() {
        let proc_root = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        make_fake_proc(rootfs.path(), 10, rootfs.path());
        let cfg = ContainerConfig::new(10, rootfs.path());
        let desc = ContainerDescriptor::new(proc_root.path(), cfg, Some("standalone no-cgroups no-devbind utility")).unwrap();

        let argv = build_argv(&desc, "ldconfig");
        assert!(!argv.iter().any(|a| a.contains("compat")));
        assert_eq!(argv[0], "ldconfig");
    }
}

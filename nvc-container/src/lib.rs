//! # nvc-container
//!
//! Container Descriptor: parses the container option bitmap,
//! resolves the target rootfs, owner, distro library layout, and
//! device-cgroup location for one `driver_mount`/`device_mount`
//! operation. Grounded in `nvc_container.c`.

pub mod compat;
pub mod flags;
pub mod profile;

pub use flags::{ContainerFlags, CudaCompatMode};
use nvc_core::{NvcError, Result};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Caller-supplied, mostly-optional configuration (mirrors
/// `nvc_container_config`). Only `pid` and `rootfs` are mandatory;
/// everything else is auto-detected by [`profile::resolve`] when left
/// `None`.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub pid: i32,
    pub rootfs: PathBuf,
    pub bins_dir: Option<String>,
    pub libs_dir: Option<String>,
    pub libs32_dir: Option<String>,
    pub cudart_dir: Option<String>,
    pub ldconfig: Option<String>,
}

impl ContainerConfig {
    pub fn new(pid: i32, rootfs: impl Into<PathBuf>) -> Self {
        ContainerConfig {
            pid,
            rootfs: rootfs.into(),
            bins_dir: None,
            libs_dir: None,
            libs32_dir: None,
            cudart_dir: None,
            ldconfig: None,
        }
    }
}

/// Fully resolved per-operation descriptor. Created by [`ContainerDescriptor::new`], dropped at the
/// end of the `driver_mount`/`device_mount` call that used it.
#[derive(Debug, Clone)]
pub struct ContainerDescriptor {
    pub flags: ContainerFlags,
    pub cuda_compat_mode: CudaCompatMode,
    pub pid: i32,
    /// Host-absolute rootfs path, chased through `/proc/<pid>/root` when
    /// supervised.
    pub rootfs: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub bins_dir: String,
    pub libs_dir: String,
    pub libs32_dir: String,
    pub cudart_dir: String,
    /// `@`-prefixed when host-relative.
    pub ldconfig: String,
    pub mnt_ns: PathBuf,
    pub dev_cg_version: Option<nvc_cgroup::CgroupVersion>,
    pub dev_cg_path: Option<PathBuf>,
    pub compat_libs: Vec<PathBuf>,
    pub cuda_compat_dir: Option<PathBuf>,
}

impl ContainerDescriptor {
    /// Build a descriptor for `cfg`, parsing `opts` (falling back to
    /// [`flags::DEFAULT_CONTAINER_OPTS`] when `None`) against
    /// `container_opts`. `proc_root` lets tests and namespaced callers
    /// point at a `/proc` other than the live one.
    pub fn new(proc_root: &Path, cfg: ContainerConfig, opts: Option<&str>) -> Result<Self> {
        if cfg.pid <= 0 {
            return Err(NvcError::ConfigInvalid("pid must be positive".into()));
        }
        if !cfg.rootfs.is_absolute() {
            return Err(NvcError::ConfigInvalid(format!(
                "rootfs {} must be absolute",
                cfg.rootfs.display()
            )));
        }

        let opts = opts.unwrap_or(flags::DEFAULT_CONTAINER_OPTS);
        let parsed = flags::parse(opts)?;
        let (flags, cuda_compat_mode) = flags::validate(parsed)?;
        let standalone = flags.contains(ContainerFlags::STANDALONE);

        info!("configuring container with '{opts}'");

        let rootfs = if standalone {
            cfg.rootfs.clone()
        } else {
            let ns_root = proc_root.join(nvc_core::paths::proc_root_path(cfg.pid).trim_start_matches('/'));
            nvc_fs::resolve(&ns_root, &cfg.rootfs)?
        };

        let profile = profile::resolve(
            &rootfs,
            cfg.bins_dir.clone(),
            cfg.libs_dir.clone(),
            cfg.libs32_dir.clone(),
            cfg.cudart_dir.clone(),
            cfg.ldconfig.clone(),
        );

        let (uid, gid) = lookup_owner(proc_root, &rootfs, cfg.pid, standalone)?;

        let (compat_libs, cuda_compat_dir) = if cuda_compat_mode != CudaCompatMode::Disabled
            && flags.contains(ContainerFlags::COMPUTE_LIBS)
        {
            let compat_dir = profile::cudart_compat_dir(&rootfs, &profile.cudart_dir);
            let libs = compat::find_compat_library_paths(&compat_dir);
            let dir = (!libs.is_empty()).then_some(compat_dir);
            (libs, dir)
        } else {
            (Vec::new(), None)
        };

        let ns_base = if standalone { rootfs.as_path() } else { proc_root };
        let mnt_ns = ns_base.join(nvc_core::paths::proc_ns_path(cfg.pid, "mnt").trim_start_matches('/'));

        let (dev_cg_version, dev_cg_path) = if flags.contains(ContainerFlags::NO_CGROUPS) {
            (None, None)
        } else {
            // The original issues two RPCs with subtly different probe
            // pids (target pid for the version check, the calling
            // process for the mount-hierarchy path in supervised mode);
            // this crate unifies both into one probe pid since both
            // ultimately read the same process's cgroup hierarchy.
            let mount_probe_pid = if standalone { cfg.pid as u32 } else { std::process::id() };
            let located = nvc_cgroup::locate(proc_root, mount_probe_pid, cfg.pid as u32)?;
            (Some(located.version), Some(located.dir))
        };

        debug!(
            pid = cfg.pid,
            rootfs = %rootfs.display(),
            uid,
            gid,
            bins_dir = %profile.bins_dir,
            libs_dir = %profile.libs_dir,
            libs32_dir = %profile.libs32_dir,
            cudart_dir = %profile.cudart_dir,
            ldconfig = %profile.ldconfig,
            mnt_ns = %mnt_ns.display(),
            "resolved container descriptor"
        );

        Ok(ContainerDescriptor {
            flags,
            cuda_compat_mode,
            pid: cfg.pid,
            rootfs,
            uid,
            gid,
            bins_dir: profile.bins_dir,
            libs_dir: profile.libs_dir,
            libs32_dir: profile.libs32_dir,
            cudart_dir: profile.cudart_dir,
            ldconfig: profile.ldconfig,
            mnt_ns,
            dev_cg_version,
            dev_cg_path,
            compat_libs,
            cuda_compat_dir,
        })
    }
}

fn lookup_owner(proc_root: &Path, rootfs: &Path, pid: i32, standalone: bool) -> Result<(u32, u32)> {
    let base = if standalone { rootfs } else { proc_root };
    let path = base.join(nvc_core::paths::proc_pid_path(pid).trim_start_matches('/'));
    let meta = std::fs::metadata(&path).map_err(|e| NvcError::io(path.display().to_string(), e))?;
    Ok((meta.uid(), meta.gid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn make_fake_proc(proc_root: &Path, pid: i32, rootfs_target: &Path) {
        let pid_dir = proc_root.join(format!("proc/{pid}"));
        fs::create_dir_all(&pid_dir).unwrap();
        fs::create_dir_all(rootfs_target).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(rootfs_target, pid_dir.join("root")).unwrap();
        fs::create_dir_all(pid_dir.join("ns")).unwrap();
        fs::write(pid_dir.join("ns/mnt"), b"").unwrap();
        fs::write(pid_dir.join("mounts"), b"cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n").unwrap();
        fs::write(pid_dir.join("cgroup"), b"0::/\n").unwrap();
    }

    #[test]
    fn standalone_mode_uses_rootfs_directly_and_skips_namespace_chase() {
        let proc_root = tempdir().unwrap();
        let rootfs = tempdir().unwrap();
        // standalone mode stats <rootfs>/proc/<pid>
        make_fake_proc(rootfs.path(), 42, rootfs.path());

        let cfg = ContainerConfig::new(42, rootfs.path());
        let desc = ContainerDescriptor::new(proc_root.path(), cfg, Some("standalone no-cgroups no-devbind utility")).unwrap();
        assert_eq!(desc.rootfs, rootfs.path());
        assert!(desc.dev_cg_version.is_none());
    }

    #[test]
    fn rejects_relative_rootfs() {
        let proc_root = tempdir().unwrap();
        let cfg = ContainerConfig::new(1, "relative/path");
        assert!(ContainerDescriptor::new(proc_root.path(), cfg, Some("standalone no-cgroups no-devbind utility")).is_err());
    }

    #[test]
    fn rejects_zero_pid() {
        let proc_root = tempdir().unwrap();
        let cfg = ContainerConfig::new(0, "/");
        assert!(ContainerDescriptor::new(proc_root.path(), cfg, Some("standalone no-cgroups no-devbind utility")).is_err());
    }
}

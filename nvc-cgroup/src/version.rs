//! Cgroup version probe: reads `/proc/<pid>/mounts` and
//! decides between a v1 `devices` hierarchy and a unified v2 hierarchy.

use nvc_core::{NvcError, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

#[derive(Debug, Clone)]
pub struct CgroupMount {
    pub version: CgroupVersion,
    pub mount_point: PathBuf,
}

/// Probe `<proc_root>/proc/<pid>/mounts` for a cgroup v1 `devices`
/// controller mount, falling back to a cgroup v2 unified mount.
pub fn probe(proc_root: &Path, pid: u32) -> Result<CgroupMount> {
    let mounts_path = proc_root.join("proc").join(pid.to_string()).join("mounts");
    let contents = std::fs::read_to_string(&mounts_path)
        .map_err(|e| NvcError::io(mounts_path.display().to_string(), e))?;

    let mut v2_mount: Option<PathBuf> = None;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let Some(mount_point) = fields.next() else { continue };
        let Some(fstype) = fields.next() else { continue };
        let Some(options) = fields.next() else { continue };

        match fstype {
            "cgroup" => {
                if options.split(',').any(|opt| opt == "devices") {
                    return Ok(CgroupMount {
                        version: CgroupVersion::V1,
                        mount_point: PathBuf::from(mount_point),
                    });
                }
            }
            "cgroup2" => {
                v2_mount.get_or_insert_with(|| PathBuf::from(mount_point));
            }
            _ => {}
        }
    }

    v2_mount
        .map(|mount_point| CgroupMount {
            version: CgroupVersion::V2,
            mount_point,
        })
        .ok_or_else(|| NvcError::CgroupNotFound(mounts_path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_mounts(dir: &Path, pid: u32, contents: &str) {
        let proc_pid = dir.join("proc").join(pid.to_string());
        fs::create_dir_all(&proc_pid).unwrap();
        fs::write(proc_pid.join("mounts"), contents).unwrap();
    }

    #[test]
    fn prefers_v1_devices_mount_when_present() {
        let dir = tempdir().unwrap();
        write_mounts(
            dir.path(),
            1,
            "cgroup /sys/fs/cgroup/devices cgroup rw,nosuid,devices 0 0\n\
             cgroup2 /sys/fs/cgroup/unified cgroup2 rw,nosuid 0 0\n",
        );
        let mount = probe(dir.path(), 1).unwrap();
        assert_eq!(mount.version, CgroupVersion::V1);
        assert_eq!(mount.mount_point, PathBuf::from("/sys/fs/cgroup/devices"));
    }

    #[test]
    fn falls_back_to_v2_when_no_devices_controller() {
        let dir = tempdir().unwrap();
        write_mounts(dir.path(), 2, "cgroup2 /sys/fs/cgroup cgroup2 rw,nosuid 0 0\n");
        let mount = probe(dir.path(), 2).unwrap();
        assert_eq!(mount.version, CgroupVersion::V2);
        assert_eq!(mount.mount_point, PathBuf::from("/sys/fs/cgroup"));
    }

    #[test]
    fn no_cgroup_mount_is_an_error() {
        let dir = tempdir().unwrap();
        write_mounts(dir.path(), 3, "tmpfs /tmp tmpfs rw 0 0\n");
        assert!(probe(dir.path(), 3).is_err());
    }
}

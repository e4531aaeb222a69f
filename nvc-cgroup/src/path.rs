//! Device-cgroup path resolver: reads `/proc/<pid>/cgroup`
//! and combines it with the mount point found by [`crate::version::probe`].

use crate::version::{CgroupMount, CgroupVersion};
use nvc_core::{NvcError, Result};
use std::path::{Path, PathBuf};

const PATH_MAX: usize = 4096;

/// Resolve the absolute path (under `proc_root`) of `target_pid`'s
/// device-cgroup directory.
pub fn resolve(proc_root: &Path, target_pid: u32, mount: &CgroupMount) -> Result<PathBuf> {
    let cgroup_file = proc_root.join("proc").join(target_pid.to_string()).join("cgroup");
    let contents = std::fs::read_to_string(&cgroup_file)
        .map_err(|e| NvcError::io(cgroup_file.display().to_string(), e))?;

    let relative = select_line(&contents, mount.version)
        .ok_or_else(|| NvcError::CgroupNotFound(cgroup_file.display().to_string()))?;

    if relative.starts_with("/..") {
        return Err(NvcError::CgroupIo(format!("cgroup path escapes root: {relative}")));
    }

    let mut full = proc_root.to_path_buf();
    full.push(mount.mount_point.strip_prefix("/").unwrap_or(&mount.mount_point));
    let relative = relative.strip_prefix('/').unwrap_or(relative.as_str());
    if !relative.is_empty() {
        full.push(relative);
    }

    let full_str = full.to_string_lossy();
    if full_str.len() > PATH_MAX {
        return Err(NvcError::CgroupIo(format!("cgroup path exceeds PATH_MAX: {full_str}")));
    }

    Ok(full)
}

/// Pick the `/proc/<pid>/cgroup` line matching this hierarchy: for v1 the
/// line whose controller list contains `devices`; for v2 the line with an
/// empty controller list and hierarchy id `0`.
fn select_line(contents: &str, version: CgroupVersion) -> Option<String> {
    for line in contents.lines() {
        let mut parts = line.splitn(3, ':');
        let hierarchy_id = parts.next()?;
        let controllers = parts.next()?;
        let path = parts.next()?;

        let matches = match version {
            CgroupVersion::V1 => controllers.split(',').any(|c| c == "devices"),
            CgroupVersion::V2 => hierarchy_id == "0" && controllers.is_empty(),
        };
        if matches {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_cgroup_file(dir: &Path, pid: u32, contents: &str) {
        let proc_pid = dir.join("proc").join(pid.to_string());
        fs::create_dir_all(&proc_pid).unwrap();
        fs::write(proc_pid.join("cgroup"), contents).unwrap();
    }

    #[test]
    fn resolves_v1_devices_line() {
        let dir = tempdir().unwrap();
        write_cgroup_file(
            dir.path(),
            7,
            "11:devices:/docker/abc123\n10:memory:/docker/abc123\n",
        );
        let mount = CgroupMount {
            version: CgroupVersion::V1,
            mount_point: PathBuf::from("/sys/fs/cgroup/devices"),
        };
        let path = resolve(dir.path(), 7, &mount).unwrap();
        assert!(path.ends_with("sys/fs/cgroup/devices/docker/abc123"));
    }

    #[test]
    fn resolves_v2_unified_line() {
        let dir = tempdir().unwrap();
        write_cgroup_file(dir.path(), 8, "0::/user.slice/session.scope\n");
        let mount = CgroupMount {
            version: CgroupVersion::V2,
            mount_point: PathBuf::from("/sys/fs/cgroup"),
        };
        let path = resolve(dir.path(), 8, &mount).unwrap();
        assert!(path.ends_with("sys/fs/cgroup/user.slice/session.scope"));
    }

    #[test]
    fn rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        write_cgroup_file(dir.path(), 9, "0::/../../etc\n");
        let mount = CgroupMount {
            version: CgroupVersion::V2,
            mount_point: PathBuf::from("/sys/fs/cgroup"),
        };
        assert!(resolve(dir.path(), 9, &mount).is_err());
    }
}

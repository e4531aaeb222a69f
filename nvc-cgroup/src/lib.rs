//! # nvc-cgroup
//!
//! Device cgroup helper: detects whether the target process
//! is in a cgroup v1 or v2 hierarchy, resolves its device-control node,
//! and installs per-device allow rules.

pub mod ebpf;
pub mod path;
pub mod rules;
pub mod version;

use nvc_core::{NvcError, Result};
use rules::DeviceRule;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
pub use version::CgroupVersion;

/// The resolved device-cgroup directory for one container, plus the
/// version of the hierarchy it lives in.
pub struct DeviceCgroup {
    pub version: CgroupVersion,
    pub dir: PathBuf,
}

/// Run the version probe against `mount_probe_pid`, then resolve
/// `target_pid`'s device-cgroup directory within that hierarchy.
pub fn locate(proc_root: &Path, mount_probe_pid: u32, target_pid: u32) -> Result<DeviceCgroup> {
    let mount = version::probe(proc_root, mount_probe_pid)?;
    let dir = path::resolve(proc_root, target_pid, &mount)?;
    debug!("resolved device cgroup at {}", dir.display());
    Ok(DeviceCgroup { version: mount.version, dir })
}

/// Install one device-allow rule into `cgroup`. A v1 write failure is a
/// hard error; v2 failures are likewise surfaced, but partial installs
/// are left in place rather than rolled back here — that's the
/// orchestrator's responsibility, not this function's.
pub fn install_rule(cgroup: &DeviceCgroup, rule: DeviceRule) -> Result<()> {
    match cgroup.version {
        CgroupVersion::V1 => rules::install_v1(&cgroup.dir, std::slice::from_ref(&rule)),
        CgroupVersion::V2 => install_v2(&cgroup.dir, rule),
    }
}

fn install_v2(cgroup_dir: &Path, new_rule: DeviceRule) -> Result<()> {
    let file = std::fs::File::open(cgroup_dir)
        .map_err(|e| NvcError::io(cgroup_dir.display().to_string(), e))?;
    let fd = file.as_raw_fd();

    let existing = ebpf::query_attached(fd).unwrap_or_else(|e| {
        warn!("could not query existing device cgroup program, starting fresh: {e}");
        Vec::new()
    });
    let (mut existing_rules, default_allow) = ebpf::decompile(&existing);
    existing_rules.push(new_rule);

    let prog = ebpf::compile(&existing_rules, default_allow);
    ebpf::attach(fd, &prog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rules::DevType;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn locate_combines_probe_and_resolve() {
        let dir = tempdir().unwrap();
        let proc_pid = dir.path().join("proc/1");
        fs::create_dir_all(&proc_pid).unwrap();
        fs::write(proc_pid.join("mounts"), "cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n").unwrap();
        fs::write(proc_pid.join("cgroup"), "0::/a/b\n").unwrap();

        let located = locate(dir.path(), 1, 1).unwrap();
        assert_eq!(located.version, CgroupVersion::V2);
        assert!(located.dir.ends_with("sys/fs/cgroup/a/b"));
    }

    #[test]
    fn install_rule_v1_appends_to_devices_allow() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("devices.allow"), b"").unwrap();
        let cgroup = DeviceCgroup {
            version: CgroupVersion::V1,
            dir: dir.path().to_path_buf(),
        };
        install_rule(&cgroup, DeviceRule::allow_rw(DevType::Char, 195, 0)).unwrap();
        let contents = fs::read_to_string(dir.path().join("devices.allow")).unwrap();
        assert_eq!(contents, "c 195:0 rw\n");
    }
}

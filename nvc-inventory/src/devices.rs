//! Device-node discovery, MIG tree population, and `nvcaps` style
//! detection.

use nvc_core::model::{DeviceNode, MigInstance, NvcapsStyle};
use nvc_core::paths;
use nvc_core::Result;
use std::path::{Path, PathBuf};

/// The fixed control-plane device nodes every driver install provides
/// (ctl is mandatory; modeset/uvm are optional and probed by `stat`
/// since only the ctl/modeset minors are fixed by the driver ABI).
pub fn fixed_device_nodes(root: &Path) -> Vec<DeviceNode> {
    let mut nodes = Vec::new();

    let ctl = root.join(paths::NV_CTL_DEVICE_PATH.trim_start_matches('/'));
    if let Ok(id) = nvc_fs::stat_rdev(&ctl) {
        nodes.push(DeviceNode::char_device(ctl, id));
    }

    let modeset = root.join(paths::NV_MODESET_DEVICE_PATH.trim_start_matches('/'));
    if let Ok(id) = nvc_fs::stat_rdev(&modeset) {
        nodes.push(DeviceNode::char_device(modeset, id));
    }

    for path in [paths::NV_UVM_DEVICE_PATH, paths::NV_UVM_TOOLS_DEVICE_PATH] {
        let full = root.join(path.trim_start_matches('/'));
        if let Ok(id) = nvc_fs::stat_rdev(&full) {
            nodes.push(DeviceNode::char_device(full, id));
        }
    }

    nodes
}

/// `/dev/nvidia<minor>` for one GPU, keyed by the minor NVML reports.
pub fn gpu_device_node(root: &Path, minor: u32) -> Result<DeviceNode> {
    let path = root.join(paths::nv_device_path(minor).trim_start_matches('/'));
    let id = nvc_fs::stat_rdev(&path)?;
    Ok(DeviceNode::char_device(path, id))
}

/// Detect which MIG capability exposure style the running kernel
/// driver provides: `DEV` if `/dev/nvidia-caps` holds device
/// nodes, `PROC` if only the procfs capability files exist, `NONE`
/// otherwise.
pub fn detect_nvcaps_style(root: &Path) -> NvcapsStyle {
    let caps_dev_dir = root.join(paths::NV_CAPS_DEVICE_DIR.trim_start_matches('/'));
    if caps_dev_dir.is_dir() && std::fs::read_dir(&caps_dev_dir).map(|mut d| d.next().is_some()).unwrap_or(false) {
        return NvcapsStyle::Dev;
    }
    let caps_proc_dir = root.join(paths::NV_CAPS_PROC_DRIVER.trim_start_matches('/'));
    if caps_proc_dir.is_dir() {
        return NvcapsStyle::Proc;
    }
    NvcapsStyle::None
}

/// A single resolved MIG instance, ready to hand to the mount
/// orchestrator.
pub struct MigQuery {
    pub gi: u32,
    pub ci: u32,
    pub uuid: String,
}

/// Build the `MigInstance` tree for one GPU from the MIG devices the
/// driver helper already enumerated (stopping at the first NULL),
/// attaching the procfs caps paths and, when `nvcaps_style`
/// is `Dev`, the `/dev/nvidia-caps/nvidia-cap<N>` device nodes looked
/// up via `mig-minors`.
pub fn build_mig_tree(
    root: &Path,
    gpu_index: usize,
    parent_minor: u32,
    queries: &[MigQuery],
    nvcaps_style: NvcapsStyle,
    mig_minors: &MigMinorsTable,
) -> Vec<MigInstance> {
    queries
        .iter()
        .map(|q| {
            let gi_caps_path = PathBuf::from(paths::nv_mig_gi_caps_path(parent_minor, q.gi));
            let ci_caps_path = PathBuf::from(paths::nv_mig_ci_caps_path(parent_minor, q.gi, q.ci));
            let (gi_caps_device, ci_caps_device) = if nvcaps_style == NvcapsStyle::Dev {
                (
                    mig_minors
                        .gi_cap_minor(parent_minor, q.gi)
                        .and_then(|n| cap_device_node(root, n)),
                    mig_minors
                        .ci_cap_minor(parent_minor, q.gi, q.ci)
                        .and_then(|n| cap_device_node(root, n)),
                )
            } else {
                (None, None)
            };
            MigInstance {
                parent_index: gpu_index,
                uuid: q.uuid.clone(),
                gi: q.gi,
                ci: q.ci,
                gi_caps_path,
                ci_caps_path,
                gi_caps_device,
                ci_caps_device,
            }
        })
        .collect()
}

/// Build the `/dev/nvidia-caps/nvidia-cap<N>` device node for a resolved
/// capability minor, `stat`ing it to capture its real `dev_t`.
pub fn cap_device_node(root: &Path, cap_minor: u32) -> Option<DeviceNode> {
    let path = root.join(paths::nv_caps_device_path(cap_minor).trim_start_matches('/'));
    nvc_fs::stat_rdev(&path).ok().map(|id| DeviceNode::char_device(path, id))
}

/// Parsed `/proc/driver/nvidia-caps/mig-minors`: maps a GI/CI access
/// path's procfs key to the `/dev/nvidia-caps/nvidia-cap<N>` minor.
pub struct MigMinorsTable {
    entries: Vec<(String, u32)>,
}

impl MigMinorsTable {
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let key = parts.next()?.to_string();
                let minor: u32 = parts.next()?.parse().ok()?;
                Some((key, minor))
            })
            .collect();
        MigMinorsTable { entries }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let contents = nvc_fs::read_to_vec(&root.join(paths::NV_CAPS_MIG_MINORS_PATH.trim_start_matches('/')))?;
        Ok(Self::parse(&String::from_utf8_lossy(&contents)))
    }

    fn gi_cap_minor(&self, gpu_minor: u32, gi: u32) -> Option<u32> {
        let key = format!("gpu{gpu_minor}/gi{gi}");
        self.lookup(&key)
    }

    fn ci_cap_minor(&self, gpu_minor: u32, gi: u32, ci: u32) -> Option<u32> {
        let key = format!("gpu{gpu_minor}/gi{gi}/ci{ci}");
        self.lookup(&key)
    }

    /// Minor backing the global `mig/config` capability, when present.
    pub fn config_minor(&self) -> Option<u32> {
        self.lookup("config")
    }

    /// Minor backing the global `mig/monitor` capability, when present.
    pub fn monitor_minor(&self) -> Option<u32> {
        self.lookup("monitor")
    }

    fn lookup(&self, key: &str) -> Option<u32> {
        self.entries.iter().find(|(k, _)| k.ends_with(key)).map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mig_minors_table_parses_and_looks_up() {
        let table = MigMinorsTable::parse("gpu0/gi1 7\ngpu0/gi1/ci0 8\nconfig 9\nmonitor 10\n");
        assert_eq!(table.gi_cap_minor(0, 1), Some(7));
        assert_eq!(table.ci_cap_minor(0, 1, 0), Some(8));
        assert_eq!(table.gi_cap_minor(0, 2), None);
        assert_eq!(table.config_minor(), Some(9));
        assert_eq!(table.monitor_minor(), Some(10));
    }

    #[test]
    fn nvcaps_style_is_none_without_any_caps_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_nvcaps_style(dir.path()), NvcapsStyle::None);
    }
}

//! Data model: Driver Info, Device, MIG Instance, Selection,
//! Mount Record.

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

/// A `(major, minor)` pair identifying a character or block device node,
/// matching `dev_t` in the original's `nvc_device_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevId {
    pub major: u32,
    pub minor: u32,
}

impl DevId {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Build a `DevId` from a raw `st_rdev` as returned by `stat(2)`.
    pub fn from_rdev(rdev: u64) -> Self {
        unsafe {
            DevId {
                major: libc::major(rdev) as u32,
                minor: libc::minor(rdev) as u32,
            }
        }
    }

    /// `stat` a path and return the device id it is bound to (for
    /// `/dev/nvidia*`-style nodes this is `st_rdev`).
    pub fn stat_rdev(path: &std::path::Path) -> std::io::Result<Self> {
        let meta = std::fs::symlink_metadata(path)?;
        Ok(Self::from_rdev(meta.rdev()))
    }
}

impl std::fmt::Display for DevId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// A character/block device node: its path and device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    pub path: PathBuf,
    pub id: DevId,
    /// `true` for char devices (all devices in this system are char
    /// devices, but the flag is retained so `nvc-fs::file_create`'s
    /// caller doesn't have to special-case it).
    pub is_char: bool,
}

impl DeviceNode {
    pub fn char_device(path: impl Into<PathBuf>, id: DevId) -> Self {
        Self {
            path: path.into(),
            id,
            is_char: true,
        }
    }
}

/// Immutable driver-file inventory snapshot, built once by component H.
#[derive(Debug, Clone, Default)]
pub struct DriverInfo {
    pub nvrm_version: String,
    pub cuda_version: String,
    pub bins: Vec<PathBuf>,
    pub libs: Vec<PathBuf>,
    pub libs32: Vec<PathBuf>,
    pub ipcs: Vec<PathBuf>,
    pub firmwares: Vec<PathBuf>,
    pub devices: Vec<DeviceNode>,
}

/// NVIDIA device brand, as reported by NVML (`nvmlBrandType_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Brand {
    Unknown,
    Quadro,
    Tesla,
    NVS,
    GeForce,
    Titan,
    NvidiaVApps,
    NvidiaVPc,
    NvidiaVServer,
    NvidiaVGaming,
    QuadroRtx,
    Nvidia,
}

impl Brand {
    pub fn name(self) -> &'static str {
        match self {
            Brand::Unknown => "Unknown",
            Brand::Quadro => "Quadro",
            Brand::Tesla => "Tesla",
            Brand::NVS => "NVS",
            Brand::GeForce => "GeForce",
            Brand::Titan => "Titan",
            Brand::NvidiaVApps => "NVIDIA Virtual Applications",
            Brand::NvidiaVPc => "NVIDIA Virtual PC",
            Brand::NvidiaVServer => "NVIDIA Virtual Server",
            Brand::NvidiaVGaming => "NVIDIA Virtual Gaming",
            Brand::QuadroRtx => "Quadro RTX",
            Brand::Nvidia => "NVIDIA",
        }
    }
}

/// Whether the driver exposes MIG capability files as `/dev` nodes, as
/// procfs-only files, or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvcapsStyle {
    None,
    Proc,
    Dev,
}

/// A single MIG compute instance.
#[derive(Debug, Clone)]
pub struct MigInstance {
    /// Index of the parent GPU in `DeviceInfo::gpus`.
    pub parent_index: usize,
    pub uuid: String,
    pub gi: u32,
    pub ci: u32,
    pub gi_caps_path: PathBuf,
    pub ci_caps_path: PathBuf,
    /// Device node for the GI access file, resolved through `mig-minors`
    /// when `nvcaps_style == Dev`.
    pub gi_caps_device: Option<DeviceNode>,
    pub ci_caps_device: Option<DeviceNode>,
}

/// A single physical GPU.
#[derive(Debug, Clone)]
pub struct Device {
    pub model: String,
    pub uuid: String,
    /// Canonical `dddddddd:bb:dd.0` PCI bus id.
    pub busid: String,
    /// "major.minor" compute-capability string.
    pub arch: String,
    pub brand: Brand,
    pub node: DeviceNode,
    pub mig_capable: bool,
    pub mig_caps_path: Option<PathBuf>,
    pub mig_instances: Vec<MigInstance>,
}

impl Device {
    /// Minor number of this GPU's `/dev/nvidia<minor>` node.
    pub fn minor(&self) -> u32 {
        self.node.id.minor
    }
}

/// Full device inventory (component H output), mirroring
/// `nvc_device_info`.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub gpus: Vec<Device>,
}

/// Selection of visible GPUs/MIG instances.
///
/// Holds indices into a `DeviceInfo` rather than borrowed references so
/// that it can outlive short-lived borrows across RPC boundaries.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub gpu_indices: Vec<usize>,
    /// `(gpu_index, mig_index_within_gpu)` pairs.
    pub mig_indices: Vec<(usize, usize)>,
    /// Distinct selection used for `mig-config` global caps.
    pub mig_config_all: bool,
    /// Distinct selection used for `mig-monitor` global caps.
    pub mig_monitor_all: bool,
    /// Set when the user wrote the literal `all` token, as opposed to an
    /// explicit id list that happens to cover every device.
    pub all: bool,
}

impl Selection {
    /// Build the selection corresponding to `all`.
    pub fn all(info: &DeviceInfo) -> Self {
        let gpu_indices: Vec<usize> = (0..info.gpus.len()).collect();
        let mut mig_indices = Vec::new();
        for (gi, gpu) in info.gpus.iter().enumerate() {
            for (mi, _) in gpu.mig_instances.iter().enumerate() {
                mig_indices.push((gi, mi));
            }
        }
        Selection {
            gpu_indices,
            mig_indices,
            mig_config_all: true,
            mig_monitor_all: true,
            all: true,
        }
    }

    /// Invariant check: every selected MIG instance's parent GPU is also
    /// present in `gpu_indices`.
    pub fn is_consistent(&self) -> bool {
        self.mig_indices
            .iter()
            .all(|(gi, _)| self.gpu_indices.contains(gi))
    }
}

/// A mounted path inside the container, tracked only for the duration of
/// one orchestrator call so it can be rolled back on failure.
#[derive(Debug, Clone)]
pub struct MountRecord {
    pub target: PathBuf,
    /// Whether `target` was created by us and should be removed (rmdir/
    /// unlink, best-effort) once unmounted, as opposed to a pre-existing
    /// node we only bind-mounted over.
    pub created_target: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(minor: u32, mig: Vec<MigInstance>) -> Device {
        Device {
            model: "Test GPU".into(),
            uuid: format!("GPU-{minor}"),
            busid: "00000000:00:00.0".into(),
            arch: "8.0".into(),
            brand: Brand::Tesla,
            node: DeviceNode::char_device(
                crate::paths::nv_device_path(minor),
                DevId::new(crate::paths::NV_DEVICE_MAJOR, minor),
            ),
            mig_capable: !mig.is_empty(),
            mig_caps_path: None,
            mig_instances: mig,
        }
    }

    #[test]
    fn selection_all_covers_every_gpu_and_mig() {
        let info = DeviceInfo {
            gpus: vec![
                gpu(0, vec![]),
                gpu(
                    1,
                    vec![MigInstance {
                        parent_index: 1,
                        uuid: "MIG-1".into(),
                        gi: 1,
                        ci: 0,
                        gi_caps_path: "/x".into(),
                        ci_caps_path: "/y".into(),
                        gi_caps_device: None,
                        ci_caps_device: None,
                    }],
                ),
            ],
        };
        let sel = Selection::all(&info);
        assert!(sel.all);
        assert_eq!(sel.gpu_indices, vec![0, 1]);
        assert_eq!(sel.mig_indices, vec![(1, 0)]);
        assert!(sel.is_consistent());
    }

    #[test]
    fn inconsistent_selection_is_detected() {
        let sel = Selection {
            gpu_indices: vec![0],
            mig_indices: vec![(1, 0)],
            mig_config_all: false,
            mig_monitor_all: false,
            all: false,
        };
        assert!(!sel.is_consistent());
    }

    #[test]
    fn dev_id_display_matches_cgroup_rule_format() {
        let id = DevId::new(195, 0);
        assert_eq!(id.to_string(), "195:0");
    }
}

//! Device-cgroup allow-rule installation for one container, grounded
//! in `setup_device_cgroup` of `nvc_mount.c`. Thin glue over
//! `nvc-cgroup`: the container descriptor already carries its
//! resolved `(version, dir)` from `nvc-container::ContainerDescriptor::new`.

use nvc_cgroup::rules::{DevType, DeviceRule};
use nvc_cgroup::DeviceCgroup;
use nvc_container::{ContainerDescriptor, ContainerFlags};
use nvc_core::{DevId, Result};

/// Allow `id` in the container's device cgroup. A no-op when
/// `no-cgroups` is set or no hierarchy was resolved (standalone mode
/// with cgroups skipped is legal, see `ContainerDescriptor::new`).
pub fn setup_device_cgroup(container: &ContainerDescriptor, id: DevId) -> Result<()> {
    if container.flags.contains(ContainerFlags::NO_CGROUPS) {
        return Ok(());
    }
    let (Some(version), Some(dir)) = (container.dev_cg_version, container.dev_cg_path.clone()) else {
        return Ok(());
    };
    let cgroup = DeviceCgroup { version, dir };
    nvc_cgroup::install_rule(&cgroup, DeviceRule::allow_rw(DevType::Char, id.major, id.minor))
}

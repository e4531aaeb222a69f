//! `MountOrchestrator`: the public entry points of component J,
//! sequencing every step of `driver_mount` plus the
//! standalone device/MIG/IMEX operations the original API surface
//! exposes separately (`nvc.h`).

use crate::namespace::NamespaceGuard;
use crate::record::RollbackList;
use crate::{appprofile, cgroupops, devicemount, files, mountops, procfs, symlinks};
use nvc_container::{ContainerDescriptor, ContainerFlags, CudaCompatMode};
use nvc_core::model::{DeviceNode, DriverInfo, MigInstance};
use nvc_core::{paths, LibraryContext, Result};
use std::path::PathBuf;

/// Holds only the host driver root; everything else is per-call state
/// carried by the `ContainerDescriptor`/`DriverInfo` arguments, per the
/// "no process-wide singleton" redesign note.
pub struct MountOrchestrator {
    host_root: PathBuf,
}

impl MountOrchestrator {
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        MountOrchestrator { host_root: host_root.into() }
    }

    /// Mount every driver file required by `container`. Enters the container's mount namespace for the duration of
    /// the call and always returns to the caller's own namespace
    /// ([`NamespaceGuard`]); any failure unwinds every mount recorded so
    /// far ([`RollbackList`]).
    pub fn driver_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, info: &DriverInfo) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        let mut rollback = RollbackList::new();
        mountops::make_root_private_recursive()?;
        self.driver_mount_inner(container, info, &mut rollback)?;
        rollback.commit();
        Ok(())
    }

    fn driver_mount_inner(&self, container: &ContainerDescriptor, info: &DriverInfo, rollback: &mut RollbackList) -> Result<()> {
        // 1. Procfs shroud.
        procfs::mount_procfs_shroud(&self.host_root, &container.rootfs, container.uid, container.gid, rollback)?;

        // 2. Graphics app-profile tmpfs.
        if container.flags.contains(ContainerFlags::GRAPHICS_LIBS) {
            appprofile::mount_app_profile_tmpfs(&container.rootfs, container.uid, container.gid, rollback)?;
        }

        // 3. Binary mounts.
        files::mount_files(
            &container.rootfs,
            container.flags,
            &container.bins_dir,
            &info.bins,
            container.uid,
            container.gid,
            rollback,
        )?;

        // 4. 64-bit library mounts + fix-up symlinks.
        let lib_mounts = files::mount_files(
            &container.rootfs,
            container.flags,
            &container.libs_dir,
            &info.libs,
            container.uid,
            container.gid,
            rollback,
        )?;
        symlinks::symlink_libraries(&lib_mounts, container.uid, container.gid)?;

        // 5. 32-bit libraries.
        if container.flags.contains(ContainerFlags::COMPAT32) {
            files::mount_files(
                &container.rootfs,
                container.flags,
                &container.libs32_dir,
                &info.libs32,
                container.uid,
                container.gid,
                rollback,
            )?;
        }

        // 6. Container-provided CUDA-compat libraries.
        if container.cuda_compat_mode == CudaCompatMode::Mount && !container.compat_libs.is_empty() {
            let compat_mounts = files::mount_files(
                &container.rootfs,
                container.flags,
                &container.libs_dir,
                &container.compat_libs,
                container.uid,
                container.gid,
                rollback,
            )?;
            symlinks::symlink_libraries(&compat_mounts, container.uid, container.gid)?;
        }

        // 7. Firmware mounts.
        for fw in &info.firmwares {
            files::mount_firmware(&self.host_root, &container.rootfs, fw, container.uid, container.gid, rollback)?;
        }

        // 8. IPC mounts.
        for ipc in &info.ipcs {
            files::mount_ipc(&self.host_root, &container.rootfs, container.flags, ipc, container.uid, container.gid, rollback)?;
        }

        // 9. Fixed driver device mounts + cgroup entries.
        for node in &info.devices {
            if !container.flags.contains(ContainerFlags::DISPLAY) && node.id.minor == paths::NV_MODESET_DEVICE_MINOR {
                continue;
            }
            if !container.flags.contains(ContainerFlags::NO_DEVBIND) {
                devicemount::mount_device_node(&self.host_root, &container.rootfs, node, container.uid, container.gid, rollback)?;
            }
            if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
                cgroupops::setup_device_cgroup(container, node.id)?;
            }
        }

        Ok(())
    }

    /// Mount one selected GPU's device node, update the graphics
    /// app-profile, and install its cgroup rule.
    pub fn device_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, node: &DeviceNode) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        let mut rollback = RollbackList::new();
        mountops::make_root_private_recursive()?;

        if !container.flags.contains(ContainerFlags::NO_DEVBIND) {
            devicemount::mount_device_node(&self.host_root, &container.rootfs, node, container.uid, container.gid, &mut rollback)?;
        }
        if container.flags.contains(ContainerFlags::GRAPHICS_LIBS) {
            appprofile::update_app_profile(&container.rootfs, container.uid, container.gid, node.id.minor)?;
        }
        if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
            cgroupops::setup_device_cgroup(container, node.id)?;
        }

        rollback.commit();
        Ok(())
    }

    /// Mount a MIG instance's GI/CI `access` files (and, on `DEV`-style
    /// drivers, their backing `/dev/nvidia-caps` nodes).
    pub fn mig_device_access_caps_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, mig: &MigInstance) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        let mut rollback = RollbackList::new();
        mountops::make_root_private_recursive()?;

        let gi_rel = mig.gi_caps_path.to_string_lossy().into_owned();
        procfs::mount_procfs_node(&self.host_root, &container.rootfs, &gi_rel, container.uid, container.gid, &mut rollback)?;
        if let Some(node) = &mig.gi_caps_device {
            devicemount::mount_device_node(&self.host_root, &container.rootfs, node, container.uid, container.gid, &mut rollback)?;
            if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
                cgroupops::setup_device_cgroup(container, node.id)?;
            }
        }

        let ci_rel = mig.ci_caps_path.to_string_lossy().into_owned();
        procfs::mount_procfs_node(&self.host_root, &container.rootfs, &ci_rel, container.uid, container.gid, &mut rollback)?;
        if let Some(node) = &mig.ci_caps_device {
            devicemount::mount_device_node(&self.host_root, &container.rootfs, node, container.uid, container.gid, &mut rollback)?;
            if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
                cgroupops::setup_device_cgroup(container, node.id)?;
            }
        }

        rollback.commit();
        Ok(())
    }

    /// Mount the global `mig/config` capability (procfs directory plus
    /// its `/dev/nvidia-caps` node when the driver exposes one), only
    /// meaningful for a global ("all") MIG-config selection.
    pub fn mig_config_global_caps_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, config_device: Option<&DeviceNode>) -> Result<()> {
        self.mig_global_caps_mount(ctx, container, config_device)
    }

    /// Mount the global `mig/monitor` capability, mirroring
    /// [`Self::mig_config_global_caps_mount`].
    pub fn mig_monitor_global_caps_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, monitor_device: Option<&DeviceNode>) -> Result<()> {
        self.mig_global_caps_mount(ctx, container, monitor_device)
    }

    fn mig_global_caps_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, device: Option<&DeviceNode>) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        let mut rollback = RollbackList::new();
        mountops::make_root_private_recursive()?;

        procfs::mount_procfs_node(&self.host_root, &container.rootfs, paths::NV_CAPS_PROC_DRIVER, container.uid, container.gid, &mut rollback)?;
        if let Some(node) = device {
            if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
                cgroupops::setup_device_cgroup(container, node.id)?;
            }
        }

        rollback.commit();
        Ok(())
    }

    /// Install cgroup allow rules for every MIG-minor device node that
    /// belongs to one physical GPU, grounded in
    /// `nvc_device_mig_caps_mount`/`setup_mig_minor_cgroups`. Takes no
    /// mount action — only cgroup writes, which the original performs
    /// independent of any bind mount.
    pub fn device_mig_caps_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, mig_cap_devices: &[DeviceNode]) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
            for node in mig_cap_devices {
                cgroupops::setup_device_cgroup(container, node.id)?;
            }
        }
        Ok(())
    }

    /// Mount one IMEX channel's device node and allow it in the device
    /// cgroup.
    pub fn imex_channel_mount(&self, ctx: &LibraryContext, container: &ContainerDescriptor, channel_id: u32) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        let mut rollback = RollbackList::new();
        mountops::make_root_private_recursive()?;

        let rel = paths::nv_caps_imex_device_path(channel_id);
        let src = self.host_root.join(rel.trim_start_matches('/'));
        let id = nvc_fs::stat_rdev(&src)?;
        let node = DeviceNode::char_device(src, id);

        if !container.flags.contains(ContainerFlags::NO_DEVBIND) {
            devicemount::mount_device_node(&self.host_root, &container.rootfs, &node, container.uid, container.gid, &mut rollback)?;
        }
        if !container.flags.contains(ContainerFlags::NO_CGROUPS) {
            cgroupops::setup_device_cgroup(container, id)?;
        }

        rollback.commit();
        Ok(())
    }

    /// Re-run the library symlink fix-ups standalone, without mounting
    /// anything (`nvc_symlink_libraries`'s separate entry point).
    pub fn symlink_libraries(&self, ctx: &LibraryContext, container: &ContainerDescriptor, mounted: &[PathBuf]) -> Result<()> {
        let _guard = NamespaceGuard::enter(&container.mnt_ns, ctx.saved_mnt_ns())?;
        symlinks::symlink_libraries(mounted, container.uid, container.gid)
    }
}

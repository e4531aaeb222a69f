//! Mount sequencing: drives component J
//! ([`nvc_mount`]) over a resolved [`Selection`], raising `Phase::Mount`
//! for the whole call. Grounded in `nvc_driver_mount`'s caller-side
//! sequencing in `nvc.c`.

use nvc_container::ContainerDescriptor;
use nvc_core::model::DeviceNode;
use nvc_core::{DeviceInfo, DriverInfo, LibraryContext, Result, Selection};
use nvc_inventory::devices::{self, MigMinorsTable};
use nvc_mount::MountOrchestrator;
use nvc_priv::Phase;

/// Run `driver_mount` plus every selected device/MIG/IMEX mount for one
/// container, in dependency order: driver files, then devices, then
/// MIG access caps, then MIG global caps, then IMEX channels.
pub fn mount_driver(
    ctx: &LibraryContext,
    container: &ContainerDescriptor,
    driver_info: &DriverInfo,
    device_info: &DeviceInfo,
    selection: &Selection,
) -> Result<()> {
    let _guard = nvc_priv::enter_phase(Phase::Mount)?;
    let orchestrator = MountOrchestrator::new(ctx.config.root.clone());

    orchestrator.driver_mount(ctx, container, driver_info)?;

    for &gi in &selection.gpu_indices {
        orchestrator.device_mount(ctx, container, &device_info.gpus[gi].node)?;
    }

    for &(gi, mi) in &selection.mig_indices {
        orchestrator.mig_device_access_caps_mount(ctx, container, &device_info.gpus[gi].mig_instances[mi])?;
    }

    for &gi in &selection.gpu_indices {
        let cap_devices: Vec<DeviceNode> = device_info.gpus[gi]
            .mig_instances
            .iter()
            .flat_map(|m| [m.gi_caps_device.clone(), m.ci_caps_device.clone()])
            .flatten()
            .collect();
        if !cap_devices.is_empty() {
            orchestrator.device_mig_caps_mount(ctx, container, &cap_devices)?;
        }
    }

    if selection.mig_config_all || selection.mig_monitor_all {
        // Device nodes are only present for DEV-style drivers; PROC-style
        // drivers still get the procfs directory mounted unconditionally
        // inside the orchestrator calls below, with `device` left `None`.
        let mig_minors = MigMinorsTable::load(&ctx.config.root).unwrap_or_else(|_| MigMinorsTable::parse(""));

        if selection.mig_config_all {
            let device = mig_minors
                .config_minor()
                .and_then(|minor| devices::cap_device_node(&ctx.config.root, minor));
            orchestrator.mig_config_global_caps_mount(ctx, container, device.as_ref())?;
        }
        if selection.mig_monitor_all {
            let device = mig_minors
                .monitor_minor()
                .and_then(|minor| devices::cap_device_node(&ctx.config.root, minor));
            orchestrator.mig_monitor_global_caps_mount(ctx, container, device.as_ref())?;
        }
    }

    for &channel_id in &ctx.config.imex_channels {
        orchestrator.imex_channel_mount(ctx, container, channel_id)?;
    }

    Ok(())
}

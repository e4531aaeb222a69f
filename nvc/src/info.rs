//! Driver & device inventory assembly: combines
//! the driver helper RPC (component D) with the ldcache reader, ELF
//! inspector, and device-node probing (component H) into one
//! [`DriverInfo`]/[`DeviceInfo`] pair. Grounded in `nvc_driver_info`/
//! `nvc_device_info` of `nvc_info.c`.

use nvc_core::model::{Brand, MigInstance};
use nvc_core::{DeviceInfo, DriverInfo, DriverOptions, LibraryContext, NvcError, Result};
use nvc_driver_helper::DriverHelperClient;
use nvc_inventory::devices::{self, MigMinorsTable, MigQuery};
use nvc_inventory::libs::{self, LibCategory};
use nvc_inventory::{bins, catalog, firmware};
use nvc_ldcache::ArchFlag;
use std::path::Path;

/// Library categories discovered regardless of `driver_opts`; NGX/Dxcore
/// are always probed since no `options.h` flag gates their discovery
/// (only `ContainerFlags::NGX_LIBS` gates whether they get *mounted*).
fn lib_categories(opts: DriverOptions) -> Vec<LibCategory> {
    let mut cats = vec![LibCategory::Utility, LibCategory::Compute, LibCategory::Video, LibCategory::Ngx, LibCategory::Dxcore];
    if !opts.contains(DriverOptions::NO_GLVND) {
        cats.push(LibCategory::GraphicsGlvnd);
    }
    cats.push(LibCategory::GraphicsCore);
    cats.push(LibCategory::GraphicsCompat);
    cats
}

fn host_arch64() -> ArchFlag {
    match std::env::consts::ARCH {
        "aarch64" => ArchFlag::AArch64,
        "arm" => ArchFlag::Arm,
        "powerpc64" => ArchFlag::Ppc64le,
        _ => ArchFlag::X8664Lib64,
    }
}

fn host_arch32() -> ArchFlag {
    match std::env::consts::ARCH {
        "aarch64" | "arm" => ArchFlag::Arm,
        _ => ArchFlag::X86,
    }
}

/// Best-effort mapping of NVML's `nvmlBrandType_t` onto [`Brand`]; NVML
/// brand codes have grown new members across driver releases, so
/// anything unrecognized degrades to `Unknown` rather than failing.
fn brand_from_nvml(code: i32) -> Brand {
    match code {
        1 => Brand::Quadro,
        2 => Brand::Tesla,
        3 => Brand::NVS,
        5 => Brand::GeForce,
        6 => Brand::Titan,
        7 => Brand::NvidiaVApps,
        8 => Brand::NvidiaVPc,
        9 => Brand::NvidiaVServer,
        10 => Brand::NvidiaVGaming,
        12 => Brand::Nvidia,
        13 => Brand::QuadroRtx,
        _ => Brand::Unknown,
    }
}

fn canonical_busid(raw: &str) -> String {
    raw.to_ascii_lowercase()
}

/// Assemble the full driver-file and device inventory. `helper` is a
/// live driver helper spawned by the caller; `root` is the driver root (`ctx.config.root`), `opts` gates
/// which optional file categories are discovered.
pub fn build(ctx: &LibraryContext, helper: &mut DriverHelperClient, opts: DriverOptions) -> Result<(DriverInfo, DeviceInfo)> {
    let root = ctx.config.root.as_path();

    let nvrm_version = helper.rm_version().map_err(|e| NvcError::RpcTransport(e.to_string()))?;
    let cuda_version = helper.cuda_version().map_err(|e| NvcError::RpcTransport(e.to_string()))?;

    let cache = nvc_ldcache::read_cache(&ctx.config.ldcache)?;
    let categories = lib_categories(opts);
    let libs = libs::resolve_libs(root, &cache, host_arch64(), &nvrm_version, &categories);
    let libs32 = libs::resolve_libs(root, &cache, host_arch32(), &nvrm_version, &categories);

    let mut bin_names = catalog::UTILITY_BINS.to_vec();
    bin_names.extend(catalog::COMPUTE_BINS);
    let bin_list = bins::find_on_path(root, &bin_names);

    let firmwares = if opts.contains(DriverOptions::NO_GSP_FIRMWARE) {
        Vec::new()
    } else {
        firmware::find_gsp_firmware(root, &nvrm_version)
    };

    let ipcs = build_ipcs(root, opts);

    let mut fixed = devices::fixed_device_nodes(root);
    if opts.contains(DriverOptions::NO_MODESET) {
        fixed.retain(|n| !n.path.ends_with("nvidia-modeset"));
    }
    if opts.contains(DriverOptions::NO_UVM) {
        fixed.retain(|n| !n.path.ends_with("nvidia-uvm") && !n.path.ends_with("nvidia-uvm-tools"));
    }

    let driver_info = DriverInfo {
        nvrm_version: nvrm_version.clone(),
        cuda_version,
        bins: bin_list,
        libs,
        libs32,
        ipcs,
        firmwares,
        devices: fixed,
    };

    let device_info = build_device_info(root, helper)?;

    Ok((driver_info, device_info))
}

fn build_ipcs(root: &Path, opts: DriverOptions) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if !opts.contains(DriverOptions::NO_PERSISTENCED) {
        let p = root.join(nvc_core::paths::NV_PERSISTENCED_SOCKET.trim_start_matches('/'));
        if p.exists() {
            out.push(p);
        }
    }
    if !opts.contains(DriverOptions::NO_FABRICMANAGER) {
        let p = root.join(nvc_core::paths::NV_FABRICMANAGER_SOCKET.trim_start_matches('/'));
        if p.exists() {
            out.push(p);
        }
    }
    if !opts.contains(DriverOptions::NO_MPS) {
        let dir = std::env::var("CUDA_MPS_PIPE_DIRECTORY").unwrap_or_else(|_| nvc_core::paths::NV_MPS_PIPE_DIR_DEFAULT.to_string());
        let p = root.join(dir.trim_start_matches('/'));
        if p.exists() {
            out.push(p);
        }
    }
    out
}

fn build_device_info(root: &Path, helper: &mut DriverHelperClient) -> Result<DeviceInfo> {
    let nvcaps_style = devices::detect_nvcaps_style(root);
    let mig_minors = MigMinorsTable::load(root).unwrap_or_else(|_| MigMinorsTable::parse(""));

    let count = helper.device_count().map_err(|e| NvcError::RpcTransport(e.to_string()))?;
    let mut gpus = Vec::new();
    for index in 0..count {
        let dto = helper.device_info(index).map_err(|e| NvcError::RpcTransport(e.to_string()))?;
        let node = devices::gpu_device_node(root, dto.minor)?;

        let is_mig_on = matches!(dto.mig_mode, Some((cur, pending)) if cur == 1 && cur == pending);
        let mig_instances: Vec<MigInstance> = if is_mig_on {
            let queries: Vec<MigQuery> = dto
                .mig_devices
                .iter()
                .map(|m| MigQuery {
                    gi: m.gi,
                    ci: m.ci,
                    uuid: format!("MIG-{}", uuid_suffix(&dto.uuid, m.gi, m.ci)),
                })
                .collect();
            devices::build_mig_tree(root, gpus.len(), dto.minor, &queries, nvcaps_style, &mig_minors)
        } else {
            Vec::new()
        };

        let mig_caps_path = if is_mig_on {
            Some(std::path::PathBuf::from(format!("{}/gpu{}/mig", nvc_core::paths::NV_CAPS_PROC_DRIVER, dto.minor)))
        } else {
            None
        };

        gpus.push(nvc_core::model::Device {
            model: dto.model,
            uuid: dto.uuid,
            busid: canonical_busid(&dto.busid),
            arch: format!("{}.{}", dto.cc_major, dto.cc_minor),
            brand: brand_from_nvml(dto.brand),
            node,
            mig_capable: is_mig_on,
            mig_caps_path,
            mig_instances,
        });
    }

    Ok(DeviceInfo { gpus })
}

fn uuid_suffix(parent_uuid: &str, gi: u32, ci: u32) -> String {
    let base = parent_uuid.trim_start_matches("GPU-");
    format!("{base}/{gi}/{ci}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lib_categories_excludes_glvnd_when_flagged() {
        let with = lib_categories(DriverOptions::empty());
        let without = lib_categories(DriverOptions::NO_GLVND);
        assert!(with.contains(&LibCategory::GraphicsGlvnd));
        assert!(!without.contains(&LibCategory::GraphicsGlvnd));
    }

    #[test]
    fn host_arch_helpers_pick_a_concrete_flag() {
        assert_ne!(host_arch64(), host_arch32());
    }
}

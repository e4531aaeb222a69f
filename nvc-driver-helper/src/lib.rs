//! # nvc-driver-helper
//!
//! The NVML-holding privileged helper process. NVML is
//! large, legacy, and makes process-affinity assumptions the original
//! source works around by isolating it behind a fork+`dlopen` boundary
//!; this crate preserves that partition rather
//! than linking NVML into the coordinator's own address space.

mod nvml_sys;

use nvc_core::{NvcError, Result};
use nvc_priv::drop_to_uid_gid;
use nvc_rpc::{RpcClient, RpcHandler};
use nvml_sys::Nvml;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

const MAX_GPUS: usize = 64;
const MAX_MIG_PER_GPU: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct InitRequest {
    /// Chroot into this path before `dlopen`ing NVML, mirroring the
    /// original's optional chroot into the driver root.
    pub chroot: Option<PathBuf>,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigInfoDto {
    pub index: u32,
    pub gi: u32,
    pub ci: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfoDto {
    pub index: u32,
    pub minor: u32,
    pub busid: String,
    pub uuid: String,
    pub model: String,
    pub brand: i32,
    pub cc_major: i32,
    pub cc_minor: i32,
    /// `Some((current, pending))` when the driver reports MIG capability.
    pub mig_mode: Option<(u32, u32)>,
    pub max_mig_devices: u32,
    pub mig_devices: Vec<MigInfoDto>,
}

/// The helper-process-side handler: `dlopen`s NVML on `init` and
/// answers queries over RPC until told to shut down.
#[derive(Default)]
pub struct DriverHelperHandler {
    nvml: Option<Nvml>,
}

impl DriverHelperHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn do_init(&mut self, req: InitRequest) -> std::result::Result<(), String> {
        if let Some(root) = &req.chroot {
            preload_libm_librt_libpthread();
            chroot_into(root)?;
        }
        drop_to_uid_gid(req.uid, req.gid, true).map_err(|e| e.to_string())?;

        let nvml = Nvml::dlopen()?;
        nvml.init().map_err(|rv| format!("nvmlInit_v2 failed: {rv}"))?;
        self.nvml = Some(nvml);
        info!("driver helper initialized NVML");
        Ok(())
    }

    fn nvml(&self) -> std::result::Result<&Nvml, String> {
        self.nvml.as_ref().ok_or_else(|| "NVML not initialized".to_string())
    }

    fn do_device_info(&self, index: u32) -> std::result::Result<DeviceInfoDto, String> {
        let nvml = self.nvml()?;
        let dev = nvml.device_handle(index).map_err(|rv| format!("get handle({index}): {rv}"))?;
        let minor = nvml.minor_number(dev).map_err(|rv| format!("minor_number: {rv}"))?;
        let busid = nvml.pci_busid(dev).map_err(|rv| format!("pci_busid: {rv}"))?;
        let uuid = nvml.uuid(dev).map_err(|rv| format!("uuid: {rv}"))?;
        let model = nvml.name(dev).map_err(|rv| format!("name: {rv}"))?;
        let brand = nvml.brand(dev).map_err(|rv| format!("brand: {rv}"))?;
        let (cc_major, cc_minor) = nvml
            .compute_capability(dev)
            .map_err(|rv| format!("compute_capability: {rv}"))?;
        let mig_mode = nvml.mig_mode(dev);
        let is_mig_on = matches!(mig_mode, Some((current, pending)) if current == 1 && current == pending);
        let max_mig_devices = if is_mig_on { nvml.max_mig_device_count(dev) } else { 0 };

        let mut mig_devices = Vec::new();
        if is_mig_on {
            for mig_index in 0..max_mig_devices.min(MAX_MIG_PER_GPU as u32) {
                let Some(mig) = nvml.mig_device_handle(dev, mig_index) else {
                    break; // first NULL stops enumeration
                };
                let gi = nvml.gpu_instance_id(mig).map_err(|rv| format!("gpu_instance_id: {rv}"))?;
                let ci = nvml
                    .compute_instance_id(mig)
                    .map_err(|rv| format!("compute_instance_id: {rv}"))?;
                mig_devices.push(MigInfoDto { index: mig_index, gi, ci });
            }
        }

        Ok(DeviceInfoDto {
            index,
            minor,
            busid,
            uuid,
            model,
            brand,
            cc_major,
            cc_minor,
            mig_mode,
            max_mig_devices,
            mig_devices,
        })
    }
}

impl RpcHandler for DriverHelperHandler {
    fn dispatch(
        &mut self,
        method: &str,
        payload: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, (i32, String)> {
        let to_json = |r: serde_json::Value| Ok(r);
        match method {
            "init" => {
                let req: InitRequest = serde_json::from_value(payload).map_err(|e| (-1, e.to_string()))?;
                self.do_init(req).map_err(|e| (-2, e))?;
                to_json(serde_json::Value::Null)
            }
            "rm_version" => {
                let v = self.nvml().map_err(|e| (-3, e))?.driver_version().map_err(|rv| (rv, "driver_version".into()))?;
                to_json(serde_json::json!(v))
            }
            "cuda_version" => {
                let (maj, min) = self
                    .nvml()
                    .map_err(|e| (-3, e))?
                    .cuda_driver_version()
                    .map_err(|rv| (rv, "cuda_driver_version".into()))?;
                to_json(serde_json::json!(format!("{maj}.{min}")))
            }
            "device_count" => {
                let n = self.nvml().map_err(|e| (-3, e))?.device_count().map_err(|rv| (rv, "device_count".into()))?;
                to_json(serde_json::json!(n))
            }
            "device_info" => {
                let index: u32 = serde_json::from_value(payload).map_err(|e| (-1, e.to_string()))?;
                if index as usize >= MAX_GPUS {
                    return Err((-4, format!("index {index} exceeds MAX_GPUS")));
                }
                let dto = self.do_device_info(index).map_err(|e| (-3, e))?;
                to_json(serde_json::to_value(dto).unwrap())
            }
            other => Err((-1, format!("unknown method {other}"))),
        }
    }
}

fn preload_libm_librt_libpthread() {
    // Pre-resolve symbols from these libraries before chrooting so that
    // lazy symbol resolution post-chroot doesn't need the host's copies.
    for soname in ["libm.so.6", "librt.so.1", "libpthread.so.0"] {
        if let Ok(name) = std::ffi::CString::new(soname) {
            unsafe {
                let handle = libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL);
                if handle.is_null() {
                    warn!("failed to preload {soname} before chroot");
                }
            }
        }
    }
}

fn chroot_into(root: &std::path::Path) -> std::result::Result<(), String> {
    let cpath = std::ffi::CString::new(root.as_os_str().as_encoded_bytes()).map_err(|e| e.to_string())?;
    let rv = unsafe { libc::chroot(cpath.as_ptr()) };
    if rv != 0 {
        return Err(format!("chroot({}): {}", root.display(), std::io::Error::last_os_error()));
    }
    let rv = unsafe { libc::chdir(b"/\0".as_ptr() as *const libc::c_char) };
    if rv != 0 {
        return Err(format!("chdir(/): {}", std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Client-side handle to a spawned driver helper, exposing typed calls
/// the coordinator and inventory builder use.
pub struct DriverHelperClient {
    rpc: RpcClient,
}

impl DriverHelperClient {
    /// Fork and initialize a driver helper.
    pub fn spawn(chroot: Option<PathBuf>, uid: u32, gid: u32) -> Result<Self> {
        let mut rpc = RpcClient::spawn(DriverHelperHandler::new).map_err(NvcError::from)?;
        let req = InitRequest { chroot, uid, gid };
        let _: serde_json::Value = rpc.call("init", &req).map_err(NvcError::from)?;
        Ok(Self { rpc })
    }

    pub fn rm_version(&mut self) -> Result<String> {
        self.rpc.call("rm_version", &serde_json::Value::Null).map_err(NvcError::from)
    }

    pub fn cuda_version(&mut self) -> Result<String> {
        self.rpc.call("cuda_version", &serde_json::Value::Null).map_err(NvcError::from)
    }

    pub fn device_count(&mut self) -> Result<u32> {
        self.rpc.call("device_count", &serde_json::Value::Null).map_err(NvcError::from)
    }

    pub fn device_info(&mut self, index: u32) -> Result<DeviceInfoDto> {
        self.rpc.call("device_info", &index).map_err(NvcError::from)
    }

    pub fn shutdown(self) -> Result<()> {
        self.rpc.shutdown().map_err(NvcError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_rejects_unknown_methods() {
        let mut handler = DriverHelperHandler::new();
        let err = handler.dispatch("frobnicate", serde_json::Value::Null).unwrap_err();
        assert_eq!(err.0, -1);
    }

    #[test]
    fn device_info_before_init_is_a_clean_error() {
        let mut handler = DriverHelperHandler::new();
        let err = handler.dispatch("device_info", serde_json::json!(0)).unwrap_err();
        assert!(err.1.contains("not initialized"));
    }
}

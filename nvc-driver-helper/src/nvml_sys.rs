//! Minimal raw NVML bindings, loaded with `dlopen(3)` rather than linked
//! at build time.
//!
//! We only bind the handful of entry points the driver helper actually
//! calls; a full NVML binding is explicitly the job of a crate like
//! `nvml-wrapper`, not this helper.

use nvc_core::paths::SONAME_LIBNVML;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};

pub type NvmlReturn = c_int;
pub const NVML_SUCCESS: NvmlReturn = 0;
pub const NVML_ERROR_NOT_SUPPORTED: NvmlReturn = 3;
pub const NVML_ERROR_NOT_FOUND: NvmlReturn = 6;
pub const NVML_ERROR_FUNCTION_NOT_FOUND: NvmlReturn = 13;

pub const NVML_DEVICE_UUID_BUFFER_SIZE: usize = 96;
pub const NVML_DEVICE_NAME_BUFFER_SIZE: usize = 96;

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct NvmlPciInfo {
    pub bus_id: [c_char; 32],
    pub domain: c_uint,
    pub bus: c_uint,
    pub device: c_uint,
    pub pci_device_id: c_uint,
    pub pci_sub_system_id: c_uint,
    pub bus_id_legacy: [c_char; 16],
}

type DeviceHandle = *mut c_void;

type FnInit = unsafe extern "C" fn() -> NvmlReturn;
type FnShutdown = unsafe extern "C" fn() -> NvmlReturn;
type FnSystemGetDriverVersion = unsafe extern "C" fn(*mut c_char, c_uint) -> NvmlReturn;
type FnSystemGetCudaDriverVersion = unsafe extern "C" fn(*mut c_int) -> NvmlReturn;
type FnDeviceGetCount = unsafe extern "C" fn(*mut c_uint) -> NvmlReturn;
type FnDeviceGetHandleByIndex = unsafe extern "C" fn(c_uint, *mut DeviceHandle) -> NvmlReturn;
type FnDeviceGetMinorNumber = unsafe extern "C" fn(DeviceHandle, *mut c_uint) -> NvmlReturn;
type FnDeviceGetUUID = unsafe extern "C" fn(DeviceHandle, *mut c_char, c_uint) -> NvmlReturn;
type FnDeviceGetName = unsafe extern "C" fn(DeviceHandle, *mut c_char, c_uint) -> NvmlReturn;
type FnDeviceGetBrand = unsafe extern "C" fn(DeviceHandle, *mut c_int) -> NvmlReturn;
type FnDeviceGetPciInfo = unsafe extern "C" fn(DeviceHandle, *mut NvmlPciInfo) -> NvmlReturn;
type FnDeviceGetCudaComputeCapability = unsafe extern "C" fn(DeviceHandle, *mut c_int, *mut c_int) -> NvmlReturn;
type FnDeviceGetMigMode = unsafe extern "C" fn(DeviceHandle, *mut c_uint, *mut c_uint) -> NvmlReturn;
type FnDeviceGetMaxMigDeviceCount = unsafe extern "C" fn(DeviceHandle, *mut c_uint) -> NvmlReturn;
type FnDeviceGetMigDeviceHandleByIndex = unsafe extern "C" fn(DeviceHandle, c_uint, *mut DeviceHandle) -> NvmlReturn;
type FnDeviceGetGpuInstanceId = unsafe extern "C" fn(DeviceHandle, *mut c_uint) -> NvmlReturn;
type FnDeviceGetComputeInstanceId = unsafe extern "C" fn(DeviceHandle, *mut c_uint) -> NvmlReturn;

macro_rules! load {
    ($handle:expr, $name:literal, $ty:ty) => {{
        let cname = CString::new($name).unwrap();
        let sym = libc::dlsym($handle, cname.as_ptr());
        if sym.is_null() {
            return Err(format!("missing NVML symbol {}", $name));
        }
        std::mem::transmute::<*mut c_void, $ty>(sym)
    }};
}

/// Handle to a `dlopen`'d `libnvidia-ml.so.1`, with the function
/// pointers this helper needs already resolved.
pub struct Nvml {
    handle: *mut c_void,
    init: FnInit,
    shutdown: FnShutdown,
    system_get_driver_version: FnSystemGetDriverVersion,
    system_get_cuda_driver_version: FnSystemGetCudaDriverVersion,
    device_get_count: FnDeviceGetCount,
    device_get_handle_by_index: FnDeviceGetHandleByIndex,
    device_get_minor_number: FnDeviceGetMinorNumber,
    device_get_uuid: FnDeviceGetUUID,
    device_get_name: FnDeviceGetName,
    device_get_brand: FnDeviceGetBrand,
    device_get_pci_info: FnDeviceGetPciInfo,
    device_get_cuda_compute_capability: FnDeviceGetCudaComputeCapability,
    device_get_mig_mode: FnDeviceGetMigMode,
    device_get_max_mig_device_count: FnDeviceGetMaxMigDeviceCount,
    device_get_mig_device_handle_by_index: FnDeviceGetMigDeviceHandleByIndex,
    device_get_gpu_instance_id: FnDeviceGetGpuInstanceId,
    device_get_compute_instance_id: FnDeviceGetComputeInstanceId,
}

// SAFETY: the handle and function pointers are only ever touched from
// the single-threaded driver helper process.
unsafe impl Send for Nvml {}

impl Nvml {
    /// `dlopen(SONAME_LIBNVML, RTLD_NOW)` and resolve every symbol this
    /// helper needs, up front, so a missing symbol fails at `init` time
    /// rather than at first use.
    pub fn dlopen() -> Result<Self, String> {
        unsafe {
            let soname = CString::new(SONAME_LIBNVML).unwrap();
            let handle = libc::dlopen(soname.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL);
            if handle.is_null() {
                let err = CStr::from_ptr(libc::dlerror()).to_string_lossy().into_owned();
                return Err(format!("dlopen({SONAME_LIBNVML}) failed: {err}"));
            }
            Ok(Nvml {
                handle,
                init: load!(handle, "nvmlInit_v2", FnInit),
                shutdown: load!(handle, "nvmlShutdown", FnShutdown),
                system_get_driver_version: load!(handle, "nvmlSystemGetDriverVersion", FnSystemGetDriverVersion),
                system_get_cuda_driver_version: load!(
                    handle,
                    "nvmlSystemGetCudaDriverVersion",
                    FnSystemGetCudaDriverVersion
                ),
                device_get_count: load!(handle, "nvmlDeviceGetCount_v2", FnDeviceGetCount),
                device_get_handle_by_index: load!(
                    handle,
                    "nvmlDeviceGetHandleByIndex_v2",
                    FnDeviceGetHandleByIndex
                ),
                device_get_minor_number: load!(handle, "nvmlDeviceGetMinorNumber", FnDeviceGetMinorNumber),
                device_get_uuid: load!(handle, "nvmlDeviceGetUUID", FnDeviceGetUUID),
                device_get_name: load!(handle, "nvmlDeviceGetName", FnDeviceGetName),
                device_get_brand: load!(handle, "nvmlDeviceGetBrand", FnDeviceGetBrand),
                device_get_pci_info: load!(handle, "nvmlDeviceGetPciInfo_v3", FnDeviceGetPciInfo),
                device_get_cuda_compute_capability: load!(
                    handle,
                    "nvmlDeviceGetCudaComputeCapability",
                    FnDeviceGetCudaComputeCapability
                ),
                device_get_mig_mode: load!(handle, "nvmlDeviceGetMigMode", FnDeviceGetMigMode),
                device_get_max_mig_device_count: load!(
                    handle,
                    "nvmlDeviceGetMaxMigDeviceCount",
                    FnDeviceGetMaxMigDeviceCount
                ),
                device_get_mig_device_handle_by_index: load!(
                    handle,
                    "nvmlDeviceGetMigDeviceHandleByIndex",
                    FnDeviceGetMigDeviceHandleByIndex
                ),
                device_get_gpu_instance_id: load!(handle, "nvmlDeviceGetGpuInstanceId", FnDeviceGetGpuInstanceId),
                device_get_compute_instance_id: load!(
                    handle,
                    "nvmlDeviceGetComputeInstanceId",
                    FnDeviceGetComputeInstanceId
                ),
            })
        }
    }

    pub fn init(&self) -> Result<(), NvmlReturn> {
        check(unsafe { (self.init)() })
    }

    pub fn driver_version(&self) -> Result<String, NvmlReturn> {
        let mut buf = [0 as c_char; 80];
        check(unsafe { (self.system_get_driver_version)(buf.as_mut_ptr(), buf.len() as c_uint) })?;
        Ok(cstr_to_string(&buf))
    }

    pub fn cuda_driver_version(&self) -> Result<(i32, i32), NvmlReturn> {
        let mut version: c_int = 0;
        check(unsafe { (self.system_get_cuda_driver_version)(&mut version) })?;
        Ok((version / 1000, (version % 1000) / 10))
    }

    pub fn device_count(&self) -> Result<u32, NvmlReturn> {
        let mut count: c_uint = 0;
        check(unsafe { (self.device_get_count)(&mut count) })?;
        Ok(count)
    }

    pub fn device_handle(&self, index: u32) -> Result<DeviceHandle, NvmlReturn> {
        let mut handle: DeviceHandle = std::ptr::null_mut();
        check(unsafe { (self.device_get_handle_by_index)(index, &mut handle) })?;
        Ok(handle)
    }

    pub fn minor_number(&self, dev: DeviceHandle) -> Result<u32, NvmlReturn> {
        let mut minor: c_uint = 0;
        check(unsafe { (self.device_get_minor_number)(dev, &mut minor) })?;
        Ok(minor)
    }

    pub fn uuid(&self, dev: DeviceHandle) -> Result<String, NvmlReturn> {
        let mut buf = [0 as c_char; NVML_DEVICE_UUID_BUFFER_SIZE];
        check(unsafe { (self.device_get_uuid)(dev, buf.as_mut_ptr(), buf.len() as c_uint) })?;
        Ok(cstr_to_string(&buf))
    }

    pub fn name(&self, dev: DeviceHandle) -> Result<String, NvmlReturn> {
        let mut buf = [0 as c_char; NVML_DEVICE_NAME_BUFFER_SIZE];
        check(unsafe { (self.device_get_name)(dev, buf.as_mut_ptr(), buf.len() as c_uint) })?;
        Ok(cstr_to_string(&buf))
    }

    pub fn brand(&self, dev: DeviceHandle) -> Result<i32, NvmlReturn> {
        let mut brand: c_int = 0;
        check(unsafe { (self.device_get_brand)(dev, &mut brand) })?;
        Ok(brand)
    }

    pub fn pci_busid(&self, dev: DeviceHandle) -> Result<String, NvmlReturn> {
        let mut info = NvmlPciInfo::default();
        check(unsafe { (self.device_get_pci_info)(dev, &mut info) })?;
        Ok(cstr_to_string(&info.bus_id))
    }

    pub fn compute_capability(&self, dev: DeviceHandle) -> Result<(i32, i32), NvmlReturn> {
        let (mut major, mut minor): (c_int, c_int) = (0, 0);
        check(unsafe { (self.device_get_cuda_compute_capability)(dev, &mut major, &mut minor) })?;
        Ok((major, minor))
    }

    /// Returns `(current, pending)` MIG mode. Treats
    /// `NOT_SUPPORTED`/`NOT_FOUND`/`FUNCTION_NOT_FOUND` as "mig
    /// unavailable" by surfacing `None` rather than an error.
    pub fn mig_mode(&self, dev: DeviceHandle) -> Option<(u32, u32)> {
        let (mut current, mut pending): (c_uint, c_uint) = (0, 0);
        let rv = unsafe { (self.device_get_mig_mode)(dev, &mut current, &mut pending) };
        if is_mig_unavailable(rv) {
            None
        } else if rv == NVML_SUCCESS {
            Some((current, pending))
        } else {
            None
        }
    }

    pub fn max_mig_device_count(&self, dev: DeviceHandle) -> u32 {
        let mut count: c_uint = 0;
        let rv = unsafe { (self.device_get_max_mig_device_count)(dev, &mut count) };
        if rv == NVML_SUCCESS {
            count
        } else {
            0
        }
    }

    /// Iterates MIG device handles, stopping at the first `NOT_FOUND`
    ///.
    pub fn mig_device_handle(&self, dev: DeviceHandle, index: u32) -> Option<DeviceHandle> {
        let mut mig: DeviceHandle = std::ptr::null_mut();
        let rv = unsafe { (self.device_get_mig_device_handle_by_index)(dev, index, &mut mig) };
        if rv == NVML_SUCCESS {
            Some(mig)
        } else {
            None
        }
    }

    pub fn gpu_instance_id(&self, mig: DeviceHandle) -> Result<u32, NvmlReturn> {
        let mut gi: c_uint = 0;
        check(unsafe { (self.device_get_gpu_instance_id)(mig, &mut gi) })?;
        Ok(gi)
    }

    pub fn compute_instance_id(&self, mig: DeviceHandle) -> Result<u32, NvmlReturn> {
        let mut ci: c_uint = 0;
        check(unsafe { (self.device_get_compute_instance_id)(mig, &mut ci) })?;
        Ok(ci)
    }
}

fn is_mig_unavailable(rv: NvmlReturn) -> bool {
    matches!(
        rv,
        NVML_ERROR_NOT_FOUND | NVML_ERROR_NOT_SUPPORTED | NVML_ERROR_FUNCTION_NOT_FOUND
    )
}

fn check(rv: NvmlReturn) -> Result<(), NvmlReturn> {
    if rv == NVML_SUCCESS {
        Ok(())
    } else {
        Err(rv)
    }
}

fn cstr_to_string(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl Drop for Nvml {
    fn drop(&mut self) {
        unsafe {
            (self.shutdown)();
            libc::dlclose(self.handle);
        }
    }
}

//! Fixed path and device-number constants (grounded in
//! `nvc_internal.h` of the original libnvidia-container).

/// SONAME of the CUDA driver entrypoint library.
pub const SONAME_LIBCUDA: &str = "libcuda.so.1";
/// SONAME of the NVML library, `dlopen`'d by the driver helper.
pub const SONAME_LIBNVML: &str = "libnvidia-ml.so.1";

/// Major device number shared by every `/dev/nvidia*` control node.
pub const NV_DEVICE_MAJOR: u32 = 195;
/// Minor number of `/dev/nvidiactl`.
pub const NV_CTL_DEVICE_MINOR: u32 = 255;
/// Minor number of `/dev/nvidia-modeset`.
pub const NV_MODESET_DEVICE_MINOR: u32 = 254;

pub const NV_CTL_DEVICE_PATH: &str = "/dev/nvidiactl";
pub const NV_MODESET_DEVICE_PATH: &str = "/dev/nvidia-modeset";
pub const NV_UVM_DEVICE_PATH: &str = "/dev/nvidia-uvm";
pub const NV_UVM_TOOLS_DEVICE_PATH: &str = "/dev/nvidia-uvm-tools";
pub const NV_CAPS_DEVICE_DIR: &str = "/dev/nvidia-caps";
pub const NV_CAPS_IMEX_DEVICE_DIR: &str = "/dev/nvidia-caps-imex-channels";

pub const NV_PERSISTENCED_SOCKET: &str = "/var/run/nvidia-persistenced/socket";
pub const NV_FABRICMANAGER_SOCKET: &str = "/var/run/nvidia-fabricmanager/socket";
pub const NV_MPS_PIPE_DIR_DEFAULT: &str = "/tmp/nvidia-mps";

pub const NV_PROC_DRIVER: &str = "/proc/driver/nvidia";
pub const NV_CAPS_PROC_DRIVER: &str = "/proc/driver/nvidia-caps";
pub const NV_UVM_PROC_DRIVER: &str = "/proc/driver/nvidia-uvm";
pub const NV_APP_PROFILE_DIR: &str = "/etc/nvidia/nvidia-application-profiles-rc.d";
pub const NV_CAPS_MIG_MINORS_PATH: &str = "/proc/driver/nvidia-caps/mig-minors";

/// Device node path for GPU `index`.
pub fn nv_device_path(index: u32) -> String {
    format!("/dev/nvidia{index}")
}

/// `/dev/nvidia-caps/nvidia-cap<n>`.
pub fn nv_caps_device_path(n: u32) -> String {
    format!("{NV_CAPS_DEVICE_DIR}/nvidia-cap{n}")
}

/// `/dev/nvidia-caps-imex-channels/channel<id>`.
pub fn nv_caps_imex_device_path(id: u32) -> String {
    format!("{NV_CAPS_IMEX_DEVICE_DIR}/channel{id}")
}

/// procfs GI-access path: `NV_PROC_DRIVER/capabilities/gpu<minor>/mig/gi<gi>/access`.
pub fn nv_mig_gi_caps_path(minor: u32, gi: u32) -> String {
    format!("{NV_PROC_DRIVER}/capabilities/gpu{minor}/mig/gi{gi}/access")
}

/// procfs CI-access path.
pub fn nv_mig_ci_caps_path(minor: u32, gi: u32, ci: u32) -> String {
    format!("{NV_PROC_DRIVER}/capabilities/gpu{minor}/mig/gi{gi}/ci{ci}/access")
}

/// Default binary directory, used unless the caller overrides it.
pub const USR_BIN_DIR: &str = "/usr/bin";
/// Non-multiarch 64-bit library directory (RPM-family distros).
pub const USR_LIB_DIR: &str = "/usr/lib64";
/// Debian/Ubuntu multiarch 64-bit library directory, keyed by the host's
/// GNU triplet (only x86_64 is resolved here; other arches are an Open
/// Question, see DESIGN.md).
pub const USR_LIB_MULTIARCH_DIR: &str = "/usr/lib/x86_64-linux-gnu";
/// Non-multiarch 32-bit library directory.
pub const USR_LIB32_DIR: &str = "/usr/lib32";
/// Alternate non-multiarch 32-bit library directory seen on some distros.
pub const USR_LIB32_ALT_DIR: &str = "/usr/lib";
/// Debian/Ubuntu multiarch 32-bit library directory.
pub const USR_LIB32_MULTIARCH_DIR: &str = "/usr/lib/i386-linux-gnu";
/// Default CUDA runtime install root, holds `compat/`.
pub const CUDA_RUNTIME_DIR: &str = "/usr/local/cuda";
/// Real `ldconfig` binary, bypassed shims that wrap it.
pub const LDCONFIG_PATH: &str = "/sbin/ldconfig";
/// The real binary behind distros that replace `ldconfig` with a
/// trigger script (Debian/Ubuntu); `@`-prefixed so the mount orchestrator
/// knows to resolve it on the host instead of inside the container
/// rootfs.
pub const LDCONFIG_ALT_PATH: &str = "@/sbin/ldconfig.real";
/// Marker file used to detect a Debian-family rootfs.
pub const DEBIAN_VERSION_PATH: &str = "/etc/debian_version";

/// `/proc/<pid>/root`.
pub fn proc_root_path(pid: i32) -> String {
    format!("/proc/{pid}/root")
}

/// `/proc/<pid>/ns/<namespace>`.
pub fn proc_ns_path(pid: i32, namespace: &str) -> String {
    format!("/proc/{pid}/ns/{namespace}")
}

/// `/proc/<pid>`.
pub fn proc_pid_path(pid: i32) -> String {
    format!("/proc/{pid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_paths_format_as_expected() {
        assert_eq!(nv_device_path(3), "/dev/nvidia3");
        assert_eq!(nv_caps_device_path(7), "/dev/nvidia-caps/nvidia-cap7");
        assert_eq!(
            nv_mig_gi_caps_path(0, 1),
            "/proc/driver/nvidia/capabilities/gpu0/mig/gi1/access"
        );
        assert_eq!(
            nv_mig_ci_caps_path(0, 1, 2),
            "/proc/driver/nvidia/capabilities/gpu0/mig/gi1/ci2/access"
        );
    }
}

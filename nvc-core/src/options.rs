//! Bitflag option sets, grounded in `options.h` of the original
//! libnvidia-container: the exact bit names and the default flag string
//! come from there.

use bitflags::bitflags;

bitflags! {
    /// Library-wide options (`library_opts` in `options.h`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LibraryOptions: u32 {
        const LOAD_KMODS              = 1 << 0;
        const NO_CREATE_IMEX_CHANNELS = 1 << 1;
    }
}

bitflags! {
    /// Which categories of driver files component H should discover
    /// (`driver_opts` in `options.h`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriverOptions: u32 {
        const NO_GLVND         = 1 << 0;
        const NO_UVM           = 1 << 1;
        const NO_MODESET       = 1 << 2;
        const NO_MPS           = 1 << 3;
        const NO_PERSISTENCED  = 1 << 4;
        const NO_FABRICMANAGER = 1 << 5;
        const NO_GSP_FIRMWARE  = 1 << 6;
    }
}

bitflags! {
    /// Container flag bitmap, bit layout
    /// from `OPT_*` in `options.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags: u32 {
        const SUPERVISED    = 1 << 0;
        const STANDALONE    = 1 << 1;
        const NO_CGROUPS    = 1 << 2;
        const NO_DEVBIND    = 1 << 3;
        const UTILITY_LIBS  = 1 << 5;
        const COMPUTE_LIBS  = 1 << 6;
        const NGX_LIBS      = 1 << 7;
        const VIDEO_LIBS    = 1 << 8;
        const GRAPHICS_LIBS = 1 << 9;
        const DISPLAY       = 1 << 10;
        const UTILITY_BINS  = 1 << 11;
        const COMPUTE_BINS  = 1 << 12;
        const COMPAT32      = 1 << 13;
        const CUDA_COMPAT_MODE_DISABLED = 1 << 14;
        const CUDA_COMPAT_MODE_LDCONFIG = 1 << 15;
        const CUDA_COMPAT_MODE_MOUNT    = 1 << 16;
    }
}

impl Default for ContainerFlags {
    /// `"standalone no-cgroups no-devbind utility"` — the original's
    /// `default_container_opts`.
    fn default() -> Self {
        ContainerFlags::STANDALONE
            | ContainerFlags::NO_CGROUPS
            | ContainerFlags::NO_DEVBIND
            | ContainerFlags::UTILITY_BINS
            | ContainerFlags::UTILITY_LIBS
    }
}

/// CUDA-compat mode, a 3-way enum folded into `ContainerFlags` bits
/// upstream; exposed here as a proper enum since mutually exclusive
/// options are easier to reason about that way (a `config-invalid`
/// error is raised if more than one bit is set, see `nvc-container`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CudaCompatMode {
    Disabled,
    #[default]
    Mount,
    Ldconfig,
}

impl ContainerFlags {
    /// Extract the CUDA-compat mode, failing if more than one mode bit
    /// is set. Matches
    /// `validate_cuda_compat_mode_flags`: with no mode bit set at all,
    /// the result defaults to `Mount` to preserve backward compatibility
    /// with callers that predate the cuda-compat-mode flags.
    pub fn cuda_compat_mode(self) -> Result<CudaCompatMode, crate::error::NvcError> {
        let bits = [
            (ContainerFlags::CUDA_COMPAT_MODE_DISABLED, CudaCompatMode::Disabled),
            (ContainerFlags::CUDA_COMPAT_MODE_MOUNT, CudaCompatMode::Mount),
            (ContainerFlags::CUDA_COMPAT_MODE_LDCONFIG, CudaCompatMode::Ldconfig),
        ];
        let mut found = None;
        for (flag, mode) in bits {
            if self.contains(flag) {
                if found.is_some() {
                    return Err(crate::error::NvcError::ConfigInvalid(
                        "multiple cuda-compat-mode flags set".into(),
                    ));
                }
                found = Some(mode);
            }
        }
        Ok(found.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_container_flags_match_upstream_default() {
        let f = ContainerFlags::default();
        assert!(f.contains(ContainerFlags::STANDALONE));
        assert!(f.contains(ContainerFlags::NO_CGROUPS));
        assert!(f.contains(ContainerFlags::NO_DEVBIND));
        assert!(f.contains(ContainerFlags::UTILITY_BINS));
        assert!(!f.contains(ContainerFlags::SUPERVISED));
    }

    #[test]
    fn conflicting_compat_modes_are_rejected() {
        let f = ContainerFlags::CUDA_COMPAT_MODE_MOUNT | ContainerFlags::CUDA_COMPAT_MODE_LDCONFIG;
        assert!(f.cuda_compat_mode().is_err());
    }

    #[test]
    fn single_compat_mode_is_accepted() {
        let f = ContainerFlags::CUDA_COMPAT_MODE_MOUNT;
        assert_eq!(f.cuda_compat_mode().unwrap(), CudaCompatMode::Mount);
    }
}

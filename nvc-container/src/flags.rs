//! Container option string parsing and validation, grounded in `options_parse`/`nvc_container_new`'s mode
//! checks in `nvc_container.c`. The bit layout itself lives in
//! `nvc_core::options::ContainerFlags` since it's shared data-model,
//! not container-specific logic.

pub use nvc_core::options::{ContainerFlags, CudaCompatMode};
use nvc_core::{NvcError, Result};

/// `container_opts`' default string: `"standalone no-cgroups no-devbind utility"`.
pub const DEFAULT_CONTAINER_OPTS: &str = "standalone no-cgroups no-devbind utility";

/// Parse a space-separated option string against the `container_opts`
/// name table (composite names like `utility`/`video` set several bits
/// at once, matching the original's table exactly).
pub fn parse(opts: &str) -> Result<ContainerFlags> {
    let mut flags = ContainerFlags::empty();
    for word in opts.split_whitespace() {
        let bits = match word {
            "supervised" => ContainerFlags::SUPERVISED,
            "standalone" => ContainerFlags::STANDALONE,
            "no-cgroups" => ContainerFlags::NO_CGROUPS,
            "no-devbind" => ContainerFlags::NO_DEVBIND,
            "utility" => ContainerFlags::UTILITY_BINS | ContainerFlags::UTILITY_LIBS,
            "compute" => ContainerFlags::COMPUTE_BINS | ContainerFlags::COMPUTE_LIBS,
            "video" => ContainerFlags::VIDEO_LIBS | ContainerFlags::COMPUTE_LIBS,
            "graphics" => ContainerFlags::GRAPHICS_LIBS,
            "display" => ContainerFlags::DISPLAY | ContainerFlags::GRAPHICS_LIBS,
            "ngx" => ContainerFlags::NGX_LIBS,
            "compat32" => ContainerFlags::COMPAT32,
            "cuda-compat-mode=disabled" => ContainerFlags::CUDA_COMPAT_MODE_DISABLED,
            "cuda-compat-mode=mount" => ContainerFlags::CUDA_COMPAT_MODE_MOUNT,
            "cuda-compat-mode=ldconfig" => ContainerFlags::CUDA_COMPAT_MODE_LDCONFIG,
            other => return Err(NvcError::ConfigInvalid(format!("unknown container option '{other}'"))),
        };
        flags |= bits;
    }
    Ok(flags)
}

/// Validate the supervised/standalone exclusivity invariant and
/// extract the resolved cuda-compat-mode, mirroring the mode-of-
/// operation check and `validate_cuda_compat_mode_flags` in
/// `nvc_container_new`.
pub fn validate(flags: ContainerFlags) -> Result<(ContainerFlags, CudaCompatMode)> {
    let supervised = flags.contains(ContainerFlags::SUPERVISED);
    let standalone = flags.contains(ContainerFlags::STANDALONE);
    if supervised == standalone {
        return Err(NvcError::ConfigInvalid("invalid mode of operation".into()));
    }
    let mode = flags.cuda_compat_mode()?;
    Ok((flags, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opts_parse_to_standalone_no_cgroups_no_devbind_utility() {
        let flags = parse(DEFAULT_CONTAINER_OPTS).unwrap();
        assert_eq!(flags, ContainerFlags::default());
    }

    #[test]
    fn supervised_and_standalone_together_is_rejected() {
        let flags = parse("supervised standalone").unwrap();
        assert!(validate(flags).is_err());
    }

    #[test]
    fn neither_supervised_nor_standalone_is_rejected() {
        let flags = parse("utility").unwrap();
        assert!(validate(flags).is_err());
    }

    #[test]
    fn no_compat_mode_flag_defaults_to_mount() {
        let flags = parse("standalone").unwrap();
        let (_, mode) = validate(flags).unwrap();
        assert_eq!(mode, CudaCompatMode::Mount);
    }

    #[test]
    fn disabled_mode_is_honored() {
        let flags = parse("standalone cuda-compat-mode=disabled").unwrap();
        let (_, mode) = validate(flags).unwrap();
        assert_eq!(mode, CudaCompatMode::Disabled);
    }

    #[test]
    fn mount_and_ldconfig_together_is_rejected() {
        let flags = parse("standalone cuda-compat-mode=mount cuda-compat-mode=ldconfig").unwrap();
        assert!(validate(flags).is_err());
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(parse("bogus-option").is_err());
    }
}

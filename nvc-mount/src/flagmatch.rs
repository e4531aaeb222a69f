//! Per-file container-flag gating for host binary/library mounts, grounded in `match_binary_flags`/`match_library_flags`
//! of `nvc_info.c`. Lives here rather than in nvc-inventory because it
//! gates *which discovered files get mounted for this container*, not
//! what component H discovers in the first place.

use nvc_container::ContainerFlags;
use nvc_inventory::catalog;

fn has_prefix(name: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| name.starts_with(c))
}

pub fn match_binary_flags(bin: &str, flags: ContainerFlags) -> bool {
    if flags.contains(ContainerFlags::UTILITY_BINS) && has_prefix(bin, catalog::UTILITY_BINS) {
        return true;
    }
    if flags.contains(ContainerFlags::COMPUTE_BINS) && has_prefix(bin, catalog::COMPUTE_BINS) {
        return true;
    }
    false
}

pub fn match_library_flags(lib: &str, flags: ContainerFlags) -> bool {
    if flags.contains(ContainerFlags::UTILITY_LIBS) && has_prefix(lib, catalog::UTILITY_LIBS) {
        return true;
    }
    if flags.contains(ContainerFlags::COMPUTE_LIBS) && has_prefix(lib, catalog::COMPUTE_LIBS) {
        return true;
    }
    if flags.contains(ContainerFlags::VIDEO_LIBS) && has_prefix(lib, catalog::VIDEO_LIBS) {
        return true;
    }
    if flags.contains(ContainerFlags::GRAPHICS_LIBS)
        && (has_prefix(lib, catalog::GRAPHICS_LIBS)
            || has_prefix(lib, catalog::GRAPHICS_LIBS_GLVND)
            || has_prefix(lib, catalog::GRAPHICS_LIBS_COMPAT))
    {
        return true;
    }
    if flags.contains(ContainerFlags::NGX_LIBS) && has_prefix(lib, catalog::NGX_LIBS) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utility_bin_requires_utility_bins_flag() {
        assert!(match_binary_flags("nvidia-smi", ContainerFlags::UTILITY_BINS));
        assert!(!match_binary_flags("nvidia-smi", ContainerFlags::COMPUTE_BINS));
    }

    #[test]
    fn graphics_lib_matches_any_of_the_three_graphics_lists() {
        assert!(match_library_flags("libGL.so.1", ContainerFlags::GRAPHICS_LIBS));
        assert!(match_library_flags("libGLX_nvidia.so.0", ContainerFlags::GRAPHICS_LIBS));
    }

    #[test]
    fn unmatched_library_is_rejected() {
        assert!(!match_library_flags("libc.so.6", ContainerFlags::UTILITY_LIBS | ContainerFlags::COMPUTE_LIBS));
    }
}

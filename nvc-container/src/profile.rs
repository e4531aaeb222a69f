//! Distro-dependent canonical directory resolution, grounded in `copy_config` of
//! `nvc_container.c`.

use nvc_core::paths;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The five directories + the ldconfig binary path a container profile
/// resolves to. Each caller-supplied override short-circuits detection
/// for that one field.
#[derive(Debug, Clone)]
pub struct DistroProfile {
    pub bins_dir: String,
    pub libs_dir: String,
    pub libs32_dir: String,
    pub cudart_dir: String,
    /// `@`-prefixed when it names a host-absolute path the mount
    /// orchestrator must resolve outside the container rootfs, bare otherwise.
    pub ldconfig: String,
}

fn exists_under(rootfs: &Path, rel: &str) -> bool {
    rootfs.join(rel.trim_start_matches('/')).exists()
}

/// Resolve the profile for `rootfs`, honoring any caller override and
/// otherwise detecting Debian multiarch layout and the real `ldconfig`
/// binary behind any `ldconfig.real`-style shim wrapper.
pub fn resolve(
    rootfs: &Path,
    bins_dir: Option<String>,
    libs_dir: Option<String>,
    libs32_dir: Option<String>,
    cudart_dir: Option<String>,
    ldconfig: Option<String>,
) -> DistroProfile {
    let bins_dir = bins_dir.unwrap_or_else(|| paths::USR_BIN_DIR.to_string());

    let (libs_dir, libs32_dir) = if libs_dir.is_some() && libs32_dir.is_some() {
        (libs_dir.unwrap(), libs32_dir.unwrap())
    } else {
        let multiarch = exists_under(rootfs, paths::DEBIAN_VERSION_PATH);
        if multiarch {
            debug!("detected a Debian-family rootfs, using multiarch library directories");
            (
                libs_dir.unwrap_or_else(|| paths::USR_LIB_MULTIARCH_DIR.to_string()),
                libs32_dir.unwrap_or_else(|| paths::USR_LIB32_MULTIARCH_DIR.to_string()),
            )
        } else {
            let libs_dir = libs_dir.unwrap_or_else(|| paths::USR_LIB_DIR.to_string());
            let libs32_dir = libs32_dir.unwrap_or_else(|| {
                // The 32-bit library directory is inconsistent across
                // non-multiarch distros; prefer USR_LIB32_DIR if it
                // exists, falling back to the alternate only when it's
                // both present and distinct from the 64-bit directory.
                if exists_under(rootfs, paths::USR_LIB32_DIR) {
                    paths::USR_LIB32_DIR.to_string()
                } else if exists_under(rootfs, paths::USR_LIB32_ALT_DIR) && paths::USR_LIB32_ALT_DIR != libs_dir {
                    paths::USR_LIB32_ALT_DIR.to_string()
                } else {
                    paths::USR_LIB32_DIR.to_string()
                }
            });
            (libs_dir, libs32_dir)
        }
    };

    let cudart_dir = cudart_dir.unwrap_or_else(|| paths::CUDA_RUNTIME_DIR.to_string());

    let ldconfig = ldconfig.unwrap_or_else(|| {
        // Some distributions wrap ldconfig with a trigger script to
        // defer cache rebuilds; always refer to the real binary so a
        // privilege-dropped exec doesn't run through a shebang.
        if exists_under(rootfs, paths::LDCONFIG_ALT_PATH.trim_start_matches('@')) {
            paths::LDCONFIG_ALT_PATH.to_string()
        } else {
            paths::LDCONFIG_PATH.to_string()
        }
    });

    DistroProfile {
        bins_dir,
        libs_dir,
        libs32_dir,
        cudart_dir,
        ldconfig,
    }
}

pub fn cudart_compat_dir(rootfs: &Path, cudart_dir: &str) -> PathBuf {
    rootfs.join(cudart_dir.trim_start_matches('/')).join("compat")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn debian_marker_selects_multiarch_dirs() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(root.path().join("etc/debian_version"), b"12.1\n").unwrap();

        let profile = resolve(root.path(), None, None, None, None, None);
        assert_eq!(profile.libs_dir, paths::USR_LIB_MULTIARCH_DIR);
        assert_eq!(profile.libs32_dir, paths::USR_LIB32_MULTIARCH_DIR);
    }

    #[test]
    fn no_debian_marker_selects_plain_lib_dirs() {
        let root = tempdir().unwrap();
        let profile = resolve(root.path(), None, None, None, None, None);
        assert_eq!(profile.libs_dir, paths::USR_LIB_DIR);
        assert_eq!(profile.libs32_dir, paths::USR_LIB32_DIR);
    }

    #[test]
    fn caller_overrides_are_never_replaced() {
        let root = tempdir().unwrap();
        let profile = resolve(
            root.path(),
            Some("/custom/bin".into()),
            Some("/custom/lib".into()),
            Some("/custom/lib32".into()),
            Some("/custom/cuda".into()),
            Some("/custom/ldconfig".into()),
        );
        assert_eq!(profile.bins_dir, "/custom/bin");
        assert_eq!(profile.libs_dir, "/custom/lib");
        assert_eq!(profile.libs32_dir, "/custom/lib32");
        assert_eq!(profile.cudart_dir, "/custom/cuda");
        assert_eq!(profile.ldconfig, "/custom/ldconfig");
    }

    #[test]
    fn ldconfig_shim_target_selects_alt_path() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("sbin")).unwrap();
        std::fs::write(root.path().join("sbin/ldconfig.real"), b"").unwrap();

        let profile = resolve(root.path(), None, None, None, None, None);
        assert_eq!(profile.ldconfig, paths::LDCONFIG_ALT_PATH);
    }
}

//! Fix-up symlinks for libraries applications `dlopen` under a name the
//! mounted SONAME doesn't carry, grounded in
//! `symlink_library`/`symlink_libraries` of `nvc_mount.c`.

use nvc_core::paths::SONAME_LIBCUDA;
use nvc_core::Result;
use std::path::Path;

/// Create `linkname` next to `mounted` (same directory), pointing at
/// `target`. `mounted` is the path the library was just bind-mounted
/// to inside the container, not its host source.
pub fn symlink_library(mounted: &Path, target: &str, linkname: &str, uid: u32, gid: u32) -> Result<()> {
    let dir = mounted.parent().unwrap_or_else(|| Path::new("/"));
    let link = dir.join(linkname);
    tracing::info!("creating symlink {} -> {}", link.display(), target);
    nvc_fs::file_create(&link, Some(Path::new(target)), uid, gid, 0o777)
}

/// Walk every path just mounted under the library directory and add
/// the three compatibility symlinks applications wrongly assume exist.
pub fn symlink_libraries(mounted: &[std::path::PathBuf], uid: u32, gid: u32) -> Result<()> {
    for path in mounted {
        let Some(lib) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if lib.starts_with("libcuda.so") {
            symlink_library(path, SONAME_LIBCUDA, "libcuda.so", uid, gid)?;
        } else if lib.starts_with("libGLX_nvidia.so") {
            symlink_library(path, lib, "libGLX_indirect.so.0", uid, gid)?;
        } else if lib.starts_with("libnvidia-opticalflow.so") {
            symlink_library(path, "libnvidia-opticalflow.so.1", "libnvidia-opticalflow.so", uid, gid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn libcuda_gets_unversioned_symlink() {
        let dir = tempdir().unwrap();
        let lib_dir = dir.path().join("usr/lib64");
        std::fs::create_dir_all(&lib_dir).unwrap();
        let mounted = lib_dir.join("libcuda.so.535.104.05");
        std::fs::write(&mounted, b"").unwrap();

        symlink_libraries(&[mounted], 0, 0).unwrap();

        let link = lib_dir.join("libcuda.so");
        assert_eq!(std::fs::read_link(&link).unwrap(), Path::new(SONAME_LIBCUDA));
    }

    #[test]
    fn glx_nvidia_gets_indirect_symlink() {
        let dir = tempdir().unwrap();
        let lib_dir = dir.path().join("usr/lib64");
        std::fs::create_dir_all(&lib_dir).unwrap();
        let mounted = lib_dir.join("libGLX_nvidia.so.0.535.104.05");
        std::fs::write(&mounted, b"").unwrap();

        symlink_libraries(&[mounted.clone()], 0, 0).unwrap();

        let link = lib_dir.join("libGLX_indirect.so.0");
        assert_eq!(std::fs::read_link(&link).unwrap().file_name().unwrap(), mounted.file_name().unwrap());
    }

    #[test]
    fn unrelated_library_gets_no_symlink() {
        let dir = tempdir().unwrap();
        let lib_dir = dir.path().join("usr/lib64");
        std::fs::create_dir_all(&lib_dir).unwrap();
        let mounted = lib_dir.join("libnvidia-ml.so.1");
        std::fs::write(&mounted, b"").unwrap();

        symlink_libraries(&[mounted], 0, 0).unwrap();

        assert!(!lib_dir.join("libnvidia-ml.so").exists());
    }
}

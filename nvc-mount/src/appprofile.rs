//! Graphics application-profile tmpfs + `10-container.conf` patching
//!, grounded in `mount_app_profile`/`update_app_profile`
//! of `nvc_mount.c`.

use crate::mountops::{self, STRICT_FLAGS};
use crate::record::RollbackList;
use nvc_core::{paths, NvcError, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const PROFILE_FILE: &str = "10-container.conf";

/// `tmpfs` over the application-profile directory,
/// grounded in `mount_app_profile` of `nvc_mount.c`.
pub fn mount_app_profile_tmpfs(rootfs: &Path, uid: u32, gid: u32, rollback: &mut RollbackList) -> Result<()> {
    let dst = mountops::in_rootfs(rootfs, paths::NV_APP_PROFILE_DIR);
    nvc_fs::dir_create(&dst, uid, gid, 0o555)?;
    mountops::tmpfs_mount_tracked(&dst, "0555", STRICT_FLAGS, rollback)
}

fn profile_path(rootfs: &Path) -> PathBuf {
    rootfs.join(paths::NV_APP_PROFILE_DIR.trim_start_matches('/')).join(PROFILE_FILE)
}

/// Read the existing `EGLVisibleDGPUDevices` bitmask (0 if the profile
/// doesn't exist yet or the field is absent).
fn read_bitmask(path: &Path) -> Result<u64> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(NvcError::io(path.display().to_string(), e)),
    };
    let parsed: Value = serde_json::from_str(&contents)
        .map_err(|e| NvcError::ConfigInvalid(format!("invalid application profile {}: {e}", path.display())))?;
    parsed
        .pointer("/profiles/0/settings/1")
        .and_then(Value::as_u64)
        .ok_or_else(|| NvcError::ConfigInvalid(format!("invalid application profile: {}", path.display())))
}

fn render(bitmask: u64) -> Vec<u8> {
    let doc = json!({
        "profiles": [{
            "name": "_container_",
            "settings": ["EGLVisibleDGPUDevices", bitmask],
        }],
        "rules": [{"pattern": [], "profile": "_container_"}],
    });
    serde_json::to_vec_pretty(&doc).expect("json serialization of a fixed shape never fails")
}

/// OR the bit for GPU minor `minor` into `10-container.conf`'s
/// `EGLVisibleDGPUDevices` bitmask, creating the file on first use.
pub fn update_app_profile(rootfs: &Path, uid: u32, gid: u32, minor: u32) -> Result<()> {
    let path = profile_path(rootfs);
    let existing = if path.exists() { read_bitmask(&path)? } else { 0 };
    let bitmask = existing | (1u64 << minor);
    nvc_fs::file_create(&path, None, uid, gid, 0o555)?;
    nvc_fs::atomic_write(&path, &render(bitmask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_update_creates_profile_with_single_bit() {
        let root = tempdir().unwrap();
        update_app_profile(root.path(), 0, 0, 0).unwrap();
        let bitmask = read_bitmask(&profile_path(root.path())).unwrap();
        assert_eq!(bitmask, 1);
    }

    #[test]
    fn second_update_ors_in_another_bit() {
        let root = tempdir().unwrap();
        update_app_profile(root.path(), 0, 0, 0).unwrap();
        update_app_profile(root.path(), 0, 0, 2).unwrap();
        let bitmask = read_bitmask(&profile_path(root.path())).unwrap();
        assert_eq!(bitmask, 0b101);
    }
}

//! Device-node bind mounts with `rdev` verification,
//! grounded in `mount_device` of `nvc_mount.c`. Shared by the fixed
//! driver devices, MIG capability device nodes (step 10) and IMEX
//! channel mounts (step 11).

use crate::mountops::{self, STRICT_FLAGS};
use crate::record::RollbackList;
use nvc_core::model::DeviceNode;
use nvc_core::Result;
use std::path::{Path, PathBuf};

/// Bind-mount `node` at the same path relative to `host_root`, inside
/// `rootfs`, then verify the bound node's `rdev` still matches what
/// was expected.
pub fn mount_device_node(host_root: &Path, rootfs: &Path, node: &DeviceNode, uid: u32, gid: u32, rollback: &mut RollbackList) -> Result<PathBuf> {
    let rel = node.path.strip_prefix(host_root).unwrap_or(node.path.as_path());
    let dst = mountops::in_rootfs(rootfs, &rel.to_string_lossy());
    nvc_fs::device_node_create(&dst, node.id.major, node.id.minor, node.is_char, uid, gid, 0o600)?;
    mountops::bind_mount_tracked(&node.path, &dst, STRICT_FLAGS, true, rollback)?;
    mountops::verify_device_mismatch(&dst, node.id)?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvc_core::DevId;
    use tempfile::tempdir;

    #[test]
    fn mismatched_rdev_after_mount_is_rejected() {
        // mount_device_node can't actually bind-mount without root, but
        // verify_device_mismatch's comparison logic is exercised
        // directly via mountops's own tests; here we only check the
        // relative-path derivation used to pick the mount target.
        let host = tempdir().unwrap();
        let node = DeviceNode::char_device(host.path().join("dev/nvidiactl"), DevId::new(195, 255));
        let rel = node.path.strip_prefix(host.path()).unwrap();
        assert_eq!(rel, Path::new("dev/nvidiactl"));
    }
}

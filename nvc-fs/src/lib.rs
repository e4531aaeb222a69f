//! # nvc-fs
//!
//! Path join/resolve confined to a root, node creation of any type, and
//! small stat/atomic-write helpers.
//!
//! Every path this module hands back is absolute and canonical (no `.`
//! or `..` components survive); `resolve` additionally guarantees the
//! result sits under the supplied root, returning
//! [`nvc_core::NvcError::PathEscape`] otherwise.

use nvc_core::{NvcError, Result};
use std::fs;
use std::os::unix::fs::{symlink, FileTypeExt, MetadataExt};
use std::path::{Component, Path, PathBuf};

/// Join `root` and `rel`, collapsing `.`/`..` components purely
/// lexically (no symlink resolution — this is a path-algebra helper,
/// not a filesystem call).
pub fn join(root: &Path, rel: &Path) -> PathBuf {
    let mut out = root.to_path_buf();
    for comp in rel.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => {}
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
        }
    }
    out
}

/// Canonicalize `path` purely lexically (no `.`/`..`, no trailing
/// slash), without touching the filesystem.
pub fn canonicalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for comp in path.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            _ => {}
        }
    }
    out
}

/// Resolve `rel` against `root`, guaranteeing the result is absolute,
/// canonical, and still rooted under `root`: any attempt to escape
/// `root` via `..` fails with `path-escape` rather than silently
/// clamping.
pub fn resolve(root: &Path, rel: &Path) -> Result<PathBuf> {
    if !root.is_absolute() {
        return Err(NvcError::PathInvalid(format!(
            "root {} is not absolute",
            root.display()
        )));
    }
    let root = canonicalize_lexical(root);
    let joined = join(&root, rel);
    let joined = canonicalize_lexical(&joined);
    if !joined.starts_with(&root) {
        return Err(NvcError::PathEscape(format!(
            "{} escapes root {}",
            rel.display(),
            root.display()
        )));
    }
    Ok(joined)
}

/// What kind of filesystem node `file_create` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Regular,
    Directory,
    Symlink,
    CharDevice { major: u32, minor: u32 },
    BlockDevice { major: u32, minor: u32 },
}

impl NodeKind {
    fn matches(self, meta: &fs::Metadata) -> bool {
        let ft = meta.file_type();
        match self {
            NodeKind::Regular => ft.is_file(),
            NodeKind::Directory => ft.is_dir(),
            NodeKind::Symlink => ft.is_symlink(),
            NodeKind::CharDevice { .. } => ft.is_char_device(),
            NodeKind::BlockDevice { .. } => ft.is_block_device(),
        }
    }
}

/// Create `dst`'s parent directories and the final node of kind `kind`.
///
/// Idempotent: if a node of the matching type already exists at `dst`
/// it is left untouched. A node of a *different* type existing there is
/// a `type-conflict` error — this function never overwrites surprising
/// state. Removing a file is always best-effort (see [`remove_best_effort`]);
/// this function itself does not remove anything.
pub fn file_create(
    dst: &Path,
    link_target: Option<&Path>,
    uid: u32,
    gid: u32,
    mode: u32,
) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| NvcError::io(parent.display().to_string(), e))?;
    }

    if let Ok(meta) = fs::symlink_metadata(dst) {
        let expected = match link_target {
            Some(_) => NodeKind::Symlink,
            None => NodeKind::Regular,
        };
        return if expected.matches(&meta) {
            Ok(())
        } else {
            Err(NvcError::TypeConflict(dst.display().to_string()))
        };
    }

    match link_target {
        Some(target) => {
            symlink(target, dst).map_err(|e| NvcError::io(dst.display().to_string(), e))?;
        }
        None => {
            let file = fs::File::create(dst).map_err(|e| NvcError::io(dst.display().to_string(), e))?;
            let perms = fs::Permissions::from_mode_bits(mode);
            file.set_permissions(perms)
                .map_err(|e| NvcError::io(dst.display().to_string(), e))?;
        }
    }
    chown_best_effort(dst, uid, gid);
    Ok(())
}

/// Create a directory node (the common case of `file_create` with
/// `NodeKind::Directory`, split out because directories don't take a
/// link target or a regular-file mode the same way).
pub fn dir_create(dst: &Path, uid: u32, gid: u32, mode: u32) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dst) {
        return if meta.file_type().is_dir() {
            Ok(())
        } else {
            Err(NvcError::TypeConflict(dst.display().to_string()))
        };
    }
    fs::create_dir_all(dst).map_err(|e| NvcError::io(dst.display().to_string(), e))?;
    fs::set_permissions(dst, fs::Permissions::from_mode_bits(mode))
        .map_err(|e| NvcError::io(dst.display().to_string(), e))?;
    chown_best_effort(dst, uid, gid);
    Ok(())
}

/// Create a device node via `mknod(2)`.
pub fn device_node_create(
    dst: &Path,
    major: u32,
    minor: u32,
    is_char: bool,
    uid: u32,
    gid: u32,
    mode: u32,
) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| NvcError::io(parent.display().to_string(), e))?;
    }
    if let Ok(meta) = fs::symlink_metadata(dst) {
        let ft = meta.file_type();
        let matches = if is_char { ft.is_char_device() } else { ft.is_block_device() };
        return if matches {
            Ok(())
        } else {
            Err(NvcError::TypeConflict(dst.display().to_string()))
        };
    }
    let kind_bits = if is_char { libc::S_IFCHR } else { libc::S_IFBLK };
    let dev = unsafe { libc::makedev(major, minor) };
    let cpath = std::ffi::CString::new(dst.as_os_str().as_encoded_bytes())
        .map_err(|_| NvcError::PathInvalid(dst.display().to_string()))?;
    let rv = unsafe { libc::mknod(cpath.as_ptr(), kind_bits | mode, dev) };
    if rv != 0 {
        return Err(NvcError::io(dst.display().to_string(), std::io::Error::last_os_error()));
    }
    chown_best_effort(dst, uid, gid);
    Ok(())
}

fn chown_best_effort(path: &Path, uid: u32, gid: u32) {
    if let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) {
        unsafe {
            libc::chown(cpath.as_ptr(), uid, gid);
        }
    }
}

/// Best-effort removal: missing files, permission errors, and
/// "not empty" directory errors are all swallowed.
pub fn remove_best_effort(path: &Path) {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };
    let _ = if meta.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
}

/// Atomically write `contents` to `dst`: write to a sibling temp file
/// then `rename(2)` over the destination.
pub fn atomic_write(dst: &Path, contents: &[u8]) -> Result<()> {
    let parent = dst.parent().unwrap_or_else(|| Path::new("/"));
    fs::create_dir_all(parent).map_err(|e| NvcError::io(parent.display().to_string(), e))?;
    let tmp = parent.join(format!(
        ".{}.tmp{}",
        dst.file_name().and_then(|n| n.to_str()).unwrap_or("nvc"),
        std::process::id()
    ));
    fs::write(&tmp, contents).map_err(|e| NvcError::io(tmp.display().to_string(), e))?;
    fs::rename(&tmp, dst).map_err(|e| NvcError::io(dst.display().to_string(), e))?;
    Ok(())
}

/// Read a whole file into memory, translating the error into
/// [`NvcError::io`] with the path attached.
pub fn read_to_vec(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| NvcError::io(path.display().to_string(), e))
}

/// Return `(major, minor)` for the device a path's inode is bound to.
pub fn stat_rdev(path: &Path) -> Result<nvc_core::DevId> {
    let meta = fs::symlink_metadata(path).map_err(|e| NvcError::io(path.display().to_string(), e))?;
    Ok(nvc_core::DevId::from_rdev(meta.rdev()))
}

trait PermissionsExt2 {
    fn from_mode_bits(mode: u32) -> fs::Permissions;
}

impl PermissionsExt2 for fs::Permissions {
    fn from_mode_bits(mode: u32) -> fs::Permissions {
        use std::os::unix::fs::PermissionsExt;
        fs::Permissions::from_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_confines_to_root() {
        let root = tempdir().unwrap();
        let p = resolve(root.path(), Path::new("a/b/c")).unwrap();
        assert!(p.starts_with(root.path()));
    }

    #[test]
    fn resolve_rejects_traversal_outside_root() {
        let root = tempdir().unwrap();
        let err = resolve(root.path(), Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, NvcError::PathEscape(_)));
    }

    #[test]
    fn file_create_is_idempotent_for_matching_type() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("sub/file.txt");
        file_create(&dst, None, 0, 0, 0o644).unwrap();
        file_create(&dst, None, 0, 0, 0o644).unwrap();
        assert!(dst.is_file());
    }

    #[test]
    fn file_create_rejects_type_conflict() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("thing");
        fs::create_dir(&dst).unwrap();
        let err = file_create(&dst, None, 0, 0, 0o644).unwrap_err();
        assert!(matches!(err, NvcError::TypeConflict(_)));
    }

    #[test]
    fn symlink_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("link");
        file_create(&dst, Some(Path::new("target")), 0, 0, 0).unwrap();
        file_create(&dst, Some(Path::new("target")), 0, 0, 0).unwrap();
        assert!(fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
    }

    #[test]
    fn atomic_write_replaces_destination() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("cache");
        atomic_write(&dst, b"v1").unwrap();
        atomic_write(&dst, b"v2").unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"v2");
    }

    #[test]
    fn remove_best_effort_does_not_panic_on_missing_file() {
        let dir = tempdir().unwrap();
        remove_best_effort(&dir.path().join("nope"));
    }
}

//! CUDA forward-compatibility library discovery, grounded in `find_compat_library_paths`
//! of `nvc_container.c`: globs `<cudart-dir>/compat/lib*.so.*`.

use std::path::{Path, PathBuf};
use tracing::info;

fn is_compat_soname(name: &str) -> bool {
    name.starts_with("lib") && name.contains(".so.")
}

/// Find every `lib*.so.*` file directly under `<rootfs><cudart_dir>/compat`,
/// deduplicated by file name (a later entry with the same name as an
/// earlier one is skipped, matching the original's `str_array_match`
/// dedup pass).
pub fn find_compat_library_paths(compat_dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(compat_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut seen_names = Vec::new();
    let mut libs = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_compat_soname(name) {
            continue;
        }
        if seen_names.iter().any(|n: &String| n == name) {
            continue;
        }
        info!("selecting {}", path.display());
        seen_names.push(name.to_string());
        libs.push(path);
    }
    libs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_compat_libs_and_ignores_other_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("libcuda.so.535.104.05"), b"").unwrap();
        std::fs::write(dir.path().join("libnvidia-nvvm.so.4"), b"").unwrap();
        std::fs::write(dir.path().join("README"), b"").unwrap();

        let found = find_compat_library_paths(dir.path());
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn missing_compat_dir_returns_empty() {
        let dir = tempdir().unwrap();
        let found = find_compat_library_paths(&dir.path().join("compat"));
        assert!(found.is_empty());
    }
}

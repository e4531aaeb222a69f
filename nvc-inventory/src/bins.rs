//! Binary lookup via `PATH` enumeration.

use std::path::{Path, PathBuf};

/// Search `PATH` (as seen by the calling process) for each name in
/// `names`, relative to `root`. First match wins per name; names with
/// no match are omitted.
pub fn find_on_path(root: &Path, names: &[&str]) -> Vec<PathBuf> {
    let path_var = std::env::var("PATH").unwrap_or_default();
    let dirs: Vec<&str> = path_var.split(':').filter(|d| !d.is_empty()).collect();

    names
        .iter()
        .filter_map(|name| {
            dirs.iter().find_map(|dir| {
                let candidate = root.join(dir.trim_start_matches('/')).join(name);
                candidate.is_file().then_some(candidate)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_first_match_on_path() {
        let root = tempdir().unwrap();
        let bin_dir = root.path().join("usr/bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join("nvidia-smi"), b"").unwrap();

        std::env::set_var("PATH", "/usr/bin:/bin");
        let found = find_on_path(root.path(), &["nvidia-smi", "nvidia-debugdump"]);
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("usr/bin/nvidia-smi"));
    }
}

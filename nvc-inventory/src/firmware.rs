//! GSP firmware lookup: globs
//! `/lib/firmware/nvidia/<nvrm-version>/gsp*.bin` under the driver root.
//! A missing firmware directory is tolerated — not every driver build
//! ships GSP firmware.

use std::path::{Path, PathBuf};
use tracing::warn;

pub fn find_gsp_firmware(root: &Path, nvrm_version: &str) -> Vec<PathBuf> {
    let dir = root.join("lib/firmware/nvidia").join(nvrm_version);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("no firmware directory at {}: {e}", dir.display());
            return Vec::new();
        }
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("gsp") && n.ends_with(".bin"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn globs_gsp_bin_files_only() {
        let root = tempdir().unwrap();
        let dir = root.path().join("lib/firmware/nvidia/535.104.05");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("gsp.bin"), b"").unwrap();
        std::fs::write(dir.join("gsp_ga10x.bin"), b"").unwrap();
        std::fs::write(dir.join("readme.txt"), b"").unwrap();

        let found = find_gsp_firmware(root.path(), "535.104.05");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn missing_directory_returns_empty_not_error() {
        let root = tempdir().unwrap();
        assert!(find_gsp_firmware(root.path(), "999.99.99").is_empty());
    }
}

//! # nvc-elf
//!
//! ELF inspector: used to disambiguate candidate driver
//! libraries found by the ldcache reader — keeping only the right
//! `libnvidia-tls.so` ABI revision, and proving a `libGL.so`/`libEGL.so`
//! candidate is the NVIDIA variant by its transitive `DT_NEEDED` set.

use goblin::elf::Elf;
use nvc_core::{NvcError, Result};
use std::path::Path;

/// Returns true if the ELF object at `path` lists `soname` in its
/// `DT_NEEDED` entries.
pub fn has_dependency(path: &Path, soname: &str) -> Result<bool> {
    let bytes = std::fs::read(path).map_err(|e| NvcError::io(path.display().to_string(), e))?;
    let elf = Elf::parse(&bytes).map_err(|e| NvcError::PathInvalid(format!("{}: not a valid ELF: {e}", path.display())))?;
    Ok(elf.libraries.iter().any(|lib| *lib == soname))
}

/// Returns true if `path` carries a `.note.ABI-tag` GNU note whose
/// `(major, minor, patch)` triple is `>=` the requested version.
pub fn has_abi(path: &Path, major: u32, minor: u32, patch: u32) -> Result<bool> {
    let bytes = std::fs::read(path).map_err(|e| NvcError::io(path.display().to_string(), e))?;
    let elf = Elf::parse(&bytes).map_err(|e| NvcError::PathInvalid(format!("{}: not a valid ELF: {e}", path.display())))?;

    let Some(iter) = elf.iter_note_sections(&bytes, Some(".note.ABI-tag")) else {
        return Ok(false);
    };

    for note in iter {
        let Ok(note) = note else { continue };
        if note.name != "GNU" {
            continue;
        }
        // descriptor: 4 little-endian u32 words: [ABI_TAG, major, minor, patch]
        if note.desc.len() < 16 {
            continue;
        }
        let word = |i: usize| -> u32 {
            u32::from_le_bytes([note.desc[i * 4], note.desc[i * 4 + 1], note.desc[i * 4 + 2], note.desc[i * 4 + 3]])
        };
        let (found_major, found_minor, found_patch) = (word(1), word(2), word(3));
        if (found_major, found_minor, found_patch) >= (major, minor, patch) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_io_error() {
        let err = has_dependency(Path::new("/nonexistent/lib.so"), "libfoo.so.1");
        assert!(err.is_err());
    }

    #[test]
    fn non_elf_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-elf");
        std::fs::write(&path, b"not an elf file").unwrap();
        assert!(has_dependency(&path, "libfoo.so.1").is_err());
    }
}

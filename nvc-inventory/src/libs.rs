//! Driver library path lookup against the ld.so cache.

use crate::catalog::{self, LIBNVIDIA_TLS_MIN_ABI};
use nvc_ldcache::{ArchFlag, CacheEntry};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibCategory {
    Utility,
    Compute,
    Video,
    GraphicsCore,
    GraphicsGlvnd,
    GraphicsCompat,
    Ngx,
    Dxcore,
}

impl LibCategory {
    fn sonames(self) -> &'static [&'static str] {
        match self {
            LibCategory::Utility => catalog::UTILITY_LIBS,
            LibCategory::Compute => catalog::COMPUTE_LIBS,
            LibCategory::Video => catalog::VIDEO_LIBS,
            LibCategory::GraphicsCore => catalog::GRAPHICS_LIBS,
            LibCategory::GraphicsGlvnd => catalog::GRAPHICS_LIBS_GLVND,
            LibCategory::GraphicsCompat => catalog::GRAPHICS_LIBS_COMPAT,
            LibCategory::Ngx => catalog::NGX_LIBS,
            LibCategory::Dxcore => catalog::DXCORE_LIBS,
        }
    }
}

/// Resolve every SONAME in `categories` against `cache`, filtered to
/// `arch`, disambiguating multi-candidate SONAMEs.
/// Missing libraries are skipped with a warning rather than failing
/// the whole lookup — driver installs commonly lack optional pieces
/// (e.g. no video libs on a headless server build).
pub fn resolve_libs(
    root: &Path,
    cache: &[CacheEntry],
    arch: ArchFlag,
    nvrm_version: &str,
    categories: &[LibCategory],
) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for &category in categories {
        for soname in category.sonames() {
            let candidates = nvc_ldcache::resolve(cache, soname, Some(arch));
            match select(root, soname, &candidates, nvrm_version, category) {
                Some(path) => out.push(path),
                None if candidates.is_empty() => {
                    warn!("{soname}: no candidate in ld.so.cache for this architecture");
                }
                None => {
                    warn!("{soname}: {} candidates found but none survived disambiguation", candidates.len());
                }
            }
        }
    }
    out
}

fn select(
    root: &Path,
    soname: &str,
    candidates: &[&CacheEntry],
    nvrm_version: &str,
    category: LibCategory,
) -> Option<PathBuf> {
    let mut survivors: Vec<&&CacheEntry> = candidates.iter().collect();

    if soname.starts_with("libnvidia-tls.so") {
        let (maj, min, patch) = LIBNVIDIA_TLS_MIN_ABI;
        survivors.retain(|c| {
            let path = root.join(c.resolved_path.trim_start_matches('/'));
            nvc_elf::has_abi(&path, maj, min, patch).unwrap_or(false)
        });
    }

    if category == LibCategory::GraphicsCompat {
        survivors.retain(|c| {
            let path = root.join(c.resolved_path.trim_start_matches('/'));
            nvc_elf::has_dependency(&path, "libnvidia-glcore.so").unwrap_or(false)
                || nvc_elf::has_dependency(&path, "libnvidia-eglcore.so").unwrap_or(false)
        });
    }

    if survivors.len() > 1 {
        if let Some(pick) = survivors.iter().find(|c| c.resolved_path.ends_with(nvrm_version)) {
            return Some(PathBuf::from(pick.resolved_path.clone()));
        }
    }

    survivors.first().map(|c| PathBuf::from(c.resolved_path.clone()))
}

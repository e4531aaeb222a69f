//! # nvc-ldcache
//!
//! Reads the Linux dynamic linker cache (`/etc/ld.so.cache`) directly
//! rather than shelling out to `ldconfig -p`, so SONAME resolution can
//! run inside the confined helper without a subprocess.
//!
//! The file packs an old-format header (`ld.so-1.7.0`) immediately
//! followed, 4-byte aligned, by a new-format header
//! (`glibc-ld.so.cache1.1`) carrying richer per-entry `hwcap` data; we
//! read whichever format is present, preferring the new one when both
//! are.

use nvc_core::{NvcError, Result};
use std::ffi::CStr;
use std::path::Path;

const OLD_MAGIC: &[u8] = b"ld.so-1.7.0";
const NEW_MAGIC: &[u8] = b"glibc-ld.so.cache1.1";

/// Architecture bits packed into an old-format entry's `flags` (and
/// mirrored in `libc6,x86-64` style strings the new format doesn't
/// need to repeat). Values match glibc's `dl-cache.h` `FLAG_*` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchFlag {
    X8664Lib64,
    X8664,
    X86,
    Arm,
    AArch64,
    Ppc64le,
    Other(i32),
}

const FLAG_ELF_LIBC6: i32 = 0x0003;
const FLAG_X8664_LIB64: i32 = 0x0300 | FLAG_ELF_LIBC6;
const FLAG_X8664: i32 = 0x0800 | FLAG_ELF_LIBC6;
const FLAG_AARCH64_LIB64: i32 = 0x0900 | FLAG_ELF_LIBC6;
const FLAG_ARM_LIBHF: i32 = 0x0d00 | FLAG_ELF_LIBC6;
const FLAG_PPC64LE_LIB64: i32 = 0x0a00 | FLAG_ELF_LIBC6;

fn classify(flags: i32) -> ArchFlag {
    match flags {
        f if f == FLAG_X8664_LIB64 => ArchFlag::X8664Lib64,
        f if f == FLAG_X8664 => ArchFlag::X8664,
        f if f == FLAG_AARCH64_LIB64 => ArchFlag::AArch64,
        f if f == FLAG_ARM_LIBHF => ArchFlag::Arm,
        f if f == FLAG_PPC64LE_LIB64 => ArchFlag::Ppc64le,
        other if other & 0x0300 == 0 => ArchFlag::X86,
        other => ArchFlag::Other(other),
    }
}

/// One resolved cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub soname: String,
    pub flags: i32,
    pub arch: ArchFlag,
    pub hwcap: u64,
    pub resolved_path: String,
}

/// Parse `path` and return every entry the cache holds.
pub fn read_cache(path: &Path) -> Result<Vec<CacheEntry>> {
    let bytes = std::fs::read(path).map_err(|e| NvcError::io(path.display().to_string(), e))?;
    parse(&bytes)
}

fn parse(bytes: &[u8]) -> Result<Vec<CacheEntry>> {
    if bytes.len() < OLD_MAGIC.len() || &bytes[..OLD_MAGIC.len()] != OLD_MAGIC {
        return Err(NvcError::ConfigInvalid("ld.so.cache: missing old-format magic".into()));
    }

    let old_header_len = OLD_MAGIC.len() + 1; // trailing NUL
    let nlibs_off = align4(old_header_len);
    let nlibs = read_u32(bytes, nlibs_off)? as usize;
    let old_entries_off = nlibs_off + 4;
    let old_entry_size = 12; // flags:i32, key:u32, value:u32
    let old_entries_end = old_entries_off + nlibs * old_entry_size;

    if let Some(new_off) = find_new_header(bytes, old_entries_end) {
        return parse_new(bytes, new_off);
    }
    parse_old(bytes, old_entries_off, nlibs)
}

fn find_new_header(bytes: &[u8], search_from: usize) -> Option<usize> {
    let aligned = align4(search_from);
    let window = bytes.get(aligned..)?;
    window
        .windows(NEW_MAGIC.len())
        .position(|w| w == NEW_MAGIC)
        .map(|p| aligned + p)
}

fn parse_old(bytes: &[u8], entries_off: usize, nlibs: usize) -> Result<Vec<CacheEntry>> {
    let mut out = Vec::with_capacity(nlibs);
    for i in 0..nlibs {
        let base = entries_off + i * 12;
        let flags = read_u32(bytes, base)? as i32;
        let key = read_u32(bytes, base + 4)? as usize;
        let value = read_u32(bytes, base + 8)? as usize;
        out.push(CacheEntry {
            soname: read_cstr(bytes, key)?,
            flags,
            arch: classify(flags),
            hwcap: 0,
            resolved_path: read_cstr(bytes, value)?,
        });
    }
    Ok(out)
}

fn parse_new(bytes: &[u8], header_off: usize) -> Result<Vec<CacheEntry>> {
    let nlibs_off = header_off + NEW_MAGIC.len();
    let nlibs = read_u32(bytes, nlibs_off)? as usize;
    // header: magic(20) + nlibs(4) + len_strings(4) + unused[5](20)
    let entries_off = nlibs_off + 4 + 4 + 20;
    let entry_size = 4 + 4 + 4 + 4 + 8; // flags, key, value, osversion, hwcap

    let mut out = Vec::with_capacity(nlibs);
    for i in 0..nlibs {
        let base = entries_off + i * entry_size;
        let flags = read_u32(bytes, base)? as i32;
        let key = read_u32(bytes, base + 4)? as usize;
        let value = read_u32(bytes, base + 8)? as usize;
        let hwcap = read_u64(bytes, base + 16)?;
        out.push(CacheEntry {
            soname: read_cstr(bytes, key)?,
            flags,
            arch: classify(flags),
            hwcap,
            resolved_path: read_cstr(bytes, value)?,
        });
    }
    Ok(out)
}

fn align4(off: usize) -> usize {
    (off + 3) & !3
}

fn read_u32(bytes: &[u8], off: usize) -> Result<u32> {
    let slice = bytes
        .get(off..off + 4)
        .ok_or_else(|| NvcError::ConfigInvalid("ld.so.cache: truncated u32 field".into()))?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], off: usize) -> Result<u64> {
    let slice = bytes
        .get(off..off + 8)
        .ok_or_else(|| NvcError::ConfigInvalid("ld.so.cache: truncated u64 field".into()))?;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_cstr(bytes: &[u8], off: usize) -> Result<String> {
    let tail = bytes
        .get(off..)
        .ok_or_else(|| NvcError::ConfigInvalid("ld.so.cache: string offset out of range".into()))?;
    let cstr = CStr::from_bytes_until_nul(tail)
        .map_err(|_| NvcError::ConfigInvalid("ld.so.cache: unterminated string".into()))?;
    Ok(cstr.to_string_lossy().into_owned())
}

/// Find all entries matching `soname`, optionally filtered to `arch`.
/// The caller supplies `pick` to disambiguate when several remain.
pub fn resolve<'a>(entries: &'a [CacheEntry], soname: &str, arch: Option<ArchFlag>) -> Vec<&'a CacheEntry> {
    entries
        .iter()
        .filter(|e| e.soname == soname)
        .filter(|e| arch.map(|a| e.arch == a).unwrap_or(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_cstr(buf: &mut Vec<u8>, s: &str) -> u32 {
        let off = buf.len() as u32;
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
        off
    }

    #[test]
    fn parses_new_format_cache_after_old_header() {
        // old header with zero entries
        let mut bytes = Vec::new();
        bytes.extend_from_slice(OLD_MAGIC);
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&0u32.to_le_bytes()); // nlibs = 0

        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        let new_header_off = bytes.len();
        bytes.extend_from_slice(NEW_MAGIC);
        bytes.extend_from_slice(&1u32.to_le_bytes()); // nlibs = 1
        bytes.extend_from_slice(&0u32.to_le_bytes()); // len_strings (unused by reader)
        bytes.extend_from_slice(&[0u8; 20]); // unused[5]

        let entries_off = new_header_off + NEW_MAGIC.len() + 8 + 20;
        let strings_off = entries_off + 24; // one entry
        let key = strings_off as u32;
        bytes.resize(entries_off, 0);
        bytes.extend_from_slice(&0i32.to_le_bytes()); // flags = FLAG_X86
        bytes.extend_from_slice(&key.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // value placeholder, fixed below
        bytes.extend_from_slice(&0u32.to_le_bytes()); // osversion
        bytes.extend_from_slice(&0u64.to_le_bytes()); // hwcap

        let value = push_cstr(&mut bytes, "/lib/libfoo.so.1");
        // patch value offset now that string table position is known
        let value_field_off = entries_off + 8;
        bytes[value_field_off..value_field_off + 4].copy_from_slice(&value.to_le_bytes());
        push_cstr(&mut bytes, "libfoo.so.1");
        let key_offset_for_soname = bytes.len() as u32 - "libfoo.so.1\0".len() as u32;
        let key_field_off = entries_off + 4;
        bytes[key_field_off..key_field_off + 4].copy_from_slice(&key_offset_for_soname.to_le_bytes());

        let entries = parse(&bytes).expect("parse");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].soname, "libfoo.so.1");
        assert_eq!(entries[0].resolved_path, "/lib/libfoo.so.1");
    }

    #[test]
    fn missing_magic_is_rejected() {
        assert!(parse(b"not a cache file").is_err());
    }
}

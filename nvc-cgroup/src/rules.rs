//! Device-cgroup rule installer.

use nvc_core::{NvcError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevType {
    Char,
    Block,
}

impl DevType {
    fn letter(self) -> char {
        match self {
            DevType::Char => 'c',
            DevType::Block => 'b',
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceRule {
    pub allow: bool,
    pub dev_type: DevType,
    pub major: u32,
    pub minor: u32,
    pub read: bool,
    pub write: bool,
    pub mknod: bool,
}

impl DeviceRule {
    pub fn allow_rw(dev_type: DevType, major: u32, minor: u32) -> Self {
        DeviceRule {
            allow: true,
            dev_type,
            major,
            minor,
            read: true,
            write: true,
            mknod: false,
        }
    }

    fn access_string(&self) -> String {
        let mut s = String::new();
        if self.read {
            s.push('r');
        }
        if self.write {
            s.push('w');
        }
        if self.mknod {
            s.push('m');
        }
        s
    }
}

/// v1: append one `devices.allow` line per rule. The kernel driver
/// silently swallows some write errors, so `flush` and the write result
/// are both checked explicitly.
pub fn install_v1(cgroup_dir: &Path, rules: &[DeviceRule]) -> Result<()> {
    let allow_path = cgroup_dir.join("devices.allow");
    let mut file = OpenOptions::new()
        .append(true)
        .open(&allow_path)
        .map_err(|e| NvcError::CgroupIo(format!("open {}: {e}", allow_path.display())))?;

    for rule in rules {
        if !rule.allow {
            continue; // devices.allow only takes allow entries; deny rules use devices.deny
        }
        let line = format!(
            "{} {}:{} {}\n",
            rule.dev_type.letter(),
            rule.major,
            rule.minor,
            rule.access_string()
        );
        file.write_all(line.as_bytes())
            .map_err(|e| NvcError::CgroupIo(format!("write devices.allow: {e}")))?;
    }
    file.flush().map_err(|e| NvcError::CgroupIo(format!("flush devices.allow: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn v1_writes_one_allow_line_per_rule() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("devices.allow"), b"").unwrap();
        let rules = vec![
            DeviceRule::allow_rw(DevType::Char, 195, 0),
            DeviceRule::allow_rw(DevType::Char, 195, 255),
        ];
        install_v1(dir.path(), &rules).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("devices.allow")).unwrap();
        assert_eq!(contents, "c 195:0 rw\nc 195:255 rw\n");
    }
}

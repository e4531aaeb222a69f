//! Library version, mirroring `nvc_version()` / `NVC_VERSION` upstream.

/// Semantic version of this implementation of the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag, e.g. `"rc.2"`; empty for stable releases.
    pub tag: &'static str,
}

const MAJOR: u32 = 1;
const MINOR: u32 = 0;
const PATCH: u32 = 0;

/// Current build's version.
pub fn version() -> Version {
    Version {
        major: MAJOR,
        minor: MINOR,
        patch: PATCH,
        tag: "",
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tag.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, self.tag)
        }
    }
}

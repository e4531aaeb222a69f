//! # nvc-priv
//!
//! Privilege controller: five capability sets, per-phase
//! effective-set whitelists, and uid/gid dropping.
//!
//! Rather than adjusting capabilities via ad hoc side effects on the
//! calling thread, phase transitions are exposed as a scoped
//! [`PhaseGuard`]: raising the effective set returns a guard that
//! lowers it back to empty on drop, so every early-return path in a
//! caller restores the invariant for free.

use caps::{CapSet, Capability, CapsHashSet};
use nvc_core::{NvcError, Result};
use tracing::{debug, warn};

/// Phases of a single coordinator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    InitKmods,
    Container,
    Info,
    Mount,
    Ldcache,
    Shutdown,
}

/// The fixed permitted+bounding superset raised once at startup.
pub fn startup_permitted_set() -> CapsHashSet {
    use Capability::*;
    [
        CAP_CHOWN,
        CAP_DAC_OVERRIDE,
        CAP_DAC_READ_SEARCH,
        CAP_FOWNER,
        CAP_KILL,
        CAP_MKNOD,
        CAP_NET_ADMIN,
        CAP_SETGID,
        CAP_SETPCAP,
        CAP_SETUID,
        CAP_SYS_ADMIN,
        CAP_SYS_CHROOT,
        CAP_SYS_PTRACE,
    ]
    .into_iter()
    .collect()
}

/// The bounding-only additions (`SYS_MODULE`, plus `DAC_OVERRIDE` which
/// is also in the permitted set).
pub fn startup_bounding_only_set() -> CapsHashSet {
    use Capability::*;
    [CAP_DAC_OVERRIDE, CAP_SYS_MODULE].into_iter().collect()
}

/// The effective-set whitelist raised for each phase.
pub fn phase_whitelist(phase: Phase) -> CapsHashSet {
    use Capability::*;
    let caps: &[Capability] = match phase {
        Phase::Init => &[CAP_DAC_OVERRIDE, CAP_SYS_PTRACE],
        Phase::InitKmods => &[CAP_SYS_MODULE],
        Phase::Container => &[CAP_DAC_OVERRIDE, CAP_SYS_PTRACE, CAP_SYS_ADMIN],
        Phase::Info => &[CAP_DAC_OVERRIDE, CAP_DAC_READ_SEARCH],
        Phase::Mount => &[
            CAP_DAC_OVERRIDE,
            CAP_DAC_READ_SEARCH,
            CAP_FOWNER,
            CAP_CHOWN,
            CAP_MKNOD,
            CAP_SYS_ADMIN,
            CAP_SYS_CHROOT,
            CAP_SETGID,
            CAP_SETUID,
            CAP_NET_ADMIN,
        ],
        Phase::Ldcache => &[
            CAP_SYS_ADMIN,
            CAP_SYS_CHROOT,
            CAP_SETGID,
            CAP_SETUID,
            CAP_SETPCAP,
            CAP_KILL,
        ],
        Phase::Shutdown => &[],
    };
    caps.iter().copied().collect()
}

/// Set up the process's permitted and bounding sets to the fixed
/// startup superset, and clear the effective set. Must be called once,
/// before any phase is entered.
pub fn init_process_capabilities() -> Result<()> {
    let permitted = startup_permitted_set();
    let mut bounding = permitted.clone();
    bounding.extend(startup_bounding_only_set());

    caps::set(None, CapSet::Permitted, &permitted)
        .map_err(|e| NvcError::Capability(format!("set permitted: {e}")))?;
    for cap in caps::all() {
        if !bounding.contains(&cap) {
            // Best-effort: dropping a bounding cap we don't need can
            // fail under restrictive kernels; that's fine, it's already
            // absent from what we rely on.
            let _ = caps::drop(None, CapSet::Bounding, cap);
        }
    }
    caps::clear(None, CapSet::Effective)
        .map_err(|e| NvcError::Capability(format!("clear effective: {e}")))?;
    debug!("capability controller initialized");
    Ok(())
}

/// A raised effective-capability set for the duration of one phase.
/// Dropping it lowers the effective set back to empty.
pub struct PhaseGuard {
    phase: Phase,
}

impl PhaseGuard {
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        if let Err(e) = caps::clear(None, CapSet::Effective) {
            warn!("failed to lower effective capabilities after {:?}: {e}", self.phase);
        } else {
            debug!("lowered effective capabilities after {:?}", self.phase);
        }
    }
}

/// Raise the effective set to `phase`'s whitelist, returning a guard
/// that restores it to empty on drop.
pub fn enter_phase(phase: Phase) -> Result<PhaseGuard> {
    let whitelist = phase_whitelist(phase);
    caps::set(None, CapSet::Effective, &whitelist)
        .map_err(|e| NvcError::Capability(format!("raise effective for {phase:?}: {e}")))?;
    debug!("raised effective capabilities for {:?}", phase);
    Ok(PhaseGuard { phase })
}

/// Drop to an unprivileged uid/gid: `setresuid`/
/// `setresgid`, optional supplementary-group clear, and
/// `SECBIT_NO_SETUID_FIXUP` when dropping to non-zero uid so ambient
/// capabilities survive the uid change. An inability to drop is fatal
///; an inability to preserve ambient/
/// inheritable `DAC_OVERRIDE` afterwards is degraded to a warning.
pub fn drop_to_uid_gid(uid: u32, gid: u32, clear_supplementary_groups: bool) -> Result<()> {
    if uid != 0 {
        let rv = unsafe { libc::prctl(libc::PR_SET_SECUREBITS, SECBIT_NO_SETUID_FIXUP as libc::c_ulong) };
        if rv != 0 {
            warn!(
                "failed to set SECBIT_NO_SETUID_FIXUP: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    if clear_supplementary_groups {
        let rv = unsafe { libc::setgroups(0, std::ptr::null()) };
        if rv != 0 {
            return Err(NvcError::Capability(format!(
                "setgroups: {}",
                std::io::Error::last_os_error()
            )));
        }
    }

    let rv = unsafe { libc::setresgid(gid, gid, gid) };
    if rv != 0 {
        return Err(NvcError::Capability(format!(
            "setresgid({gid}): {}",
            std::io::Error::last_os_error()
        )));
    }
    let rv = unsafe { libc::setresuid(uid, uid, uid) };
    if rv != 0 {
        return Err(NvcError::Capability(format!(
            "setresuid({uid}): {}",
            std::io::Error::last_os_error()
        )));
    }

    if let Err(e) = caps::raise(None, CapSet::Ambient, Capability::CAP_DAC_OVERRIDE) {
        warn!("could not preserve ambient CAP_DAC_OVERRIDE after uid drop: {e}");
    }
    if let Err(e) = caps::raise(None, CapSet::Inheritable, Capability::CAP_DAC_OVERRIDE) {
        warn!("could not preserve inheritable CAP_DAC_OVERRIDE after uid drop: {e}");
    }

    debug!("dropped privileges to uid={uid} gid={gid}");
    Ok(())
}

// `libc` doesn't currently export this constant by name on all targets.
const SECBIT_NO_SETUID_FIXUP: i32 = 1 << 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_whitelists_are_subsets_of_the_startup_superset() {
        let superset = startup_permitted_set();
        for phase in [
            Phase::Init,
            Phase::InitKmods,
            Phase::Container,
            Phase::Info,
            Phase::Mount,
            Phase::Ldcache,
            Phase::Shutdown,
        ] {
            let whitelist = phase_whitelist(phase);
            let bounding = startup_bounding_only_set();
            for cap in whitelist {
                assert!(
                    superset.contains(&cap) || bounding.contains(&cap),
                    "{cap:?} in {phase:?} whitelist is not part of the startup superset"
                );
            }
        }
    }

    #[test]
    fn shutdown_phase_whitelist_is_empty() {
        assert!(phase_whitelist(Phase::Shutdown).is_empty());
    }
}

//! Capability adjustment and resource limiting for the confined child
//!, grounded in `adjust_capabilities`/
//! `limit_resources` of `nvc_ldcache.c`.

use caps::{CapSet, Capability};
use nvc_core::{NvcError, Result};
use tracing::warn;

/// Drop inheritable (and consequently ambient) capabilities, except
/// that when execution of a non-host binary is permitted we try to
/// keep `CAP_DAC_OVERRIDE` inheritable (some distros' `ldconfig` relies
/// on it). Always drops the entire bounding set.
pub fn adjust_capabilities(uid: u32, host_ldconfig: bool, secure_mode: bool) -> Result<()> {
    if secure_mode && !host_ldconfig {
        clear_inheritable()?;
        warn!("running in secure mode without host ldconfig, containers may require additional tuning");
    } else {
        let mut inheritable = caps::CapsHashSet::new();
        inheritable.insert(Capability::CAP_DAC_OVERRIDE);
        match caps::set(None, CapSet::Inheritable, &inheritable) {
            Ok(()) => {
                if uid != 0 {
                    let mut ambient = caps::CapsHashSet::new();
                    ambient.insert(Capability::CAP_DAC_OVERRIDE);
                    if let Err(e) = caps::set(None, CapSet::Ambient, &ambient) {
                        warn!("could not set ambient capabilities, containers may require additional tuning: {e}");
                    }
                }
            }
            Err(e) => {
                clear_inheritable()?;
                warn!("could not set inheritable capabilities, containers may require additional tuning: {e}");
            }
        }
    }

    for cap in caps::all() {
        let _ = caps::drop(None, CapSet::Bounding, cap);
    }
    Ok(())
}

fn clear_inheritable() -> Result<()> {
    caps::clear(None, CapSet::Inheritable).map_err(|e| NvcError::Capability(format!("clear inheritable: {e}")))
}

/// `RLIMIT_CPU=10s`, `RLIMIT_AS=2 GiB`, `RLIMIT_NOFILE=64`,
/// `RLIMIT_FSIZE=2 MiB`.
pub fn limit_resources() -> Result<()> {
    set_rlimit(libc::RLIMIT_CPU, 10, 10)?;
    set_rlimit(libc::RLIMIT_AS, 2 * 1024 * 1024 * 1024, 2 * 1024 * 1024 * 1024)?;
    set_rlimit(libc::RLIMIT_NOFILE, 64, 64)?;
    set_rlimit(libc::RLIMIT_FSIZE, 2 * 1024 * 1024, 2 * 1024 * 1024)?;
    Ok(())
}

fn set_rlimit(resource: libc::c_int, soft: u64, hard: u64) -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft,
        rlim_max: hard,
    };
    if unsafe { libc::setrlimit(resource as libc::__rlimit_resource_t, &limit) } != 0 {
        return Err(NvcError::io("setrlimit".into(), std::io::Error::last_os_error()));
    }
    Ok(())
}

//! # nvc
//!
//! Top-level coordinator: the single `init`/`shutdown` pair
//! every other component is sequenced behind. Grounded in `nvc.h`'s
//! public entry points and `nvc_context.c`.
//!
//! Data flows top-down: [`init`] builds a [`LibraryContext`]; [`info`]
//! calls component H (via the driver helper) for inventory; a caller
//! builds a [`ContainerDescriptor`] via [`container`]; [`select`] narrows
//! the inventory to a [`Selection`]; [`mount`] consumes inventory +
//! descriptor + selection; finally [`ldcache`] invokes the confined
//! ldconfig runner. [`shutdown`] tears the context back down.

pub mod container;
pub mod info;
pub mod ldcache;
pub mod mount;
pub mod select;

pub use nvc_core::{
    ContainerFlags, CudaCompatMode, Device, DeviceInfo, DeviceNode, DriverInfo, LibraryConfig,
    LibraryContext, MigInstance, NvcError, Result, Selection,
};
pub use nvc_container::{ContainerConfig, ContainerDescriptor};

use nvc_priv::Phase;
use tracing::info as log_info;

/// Bring the library up: raise the fixed capability superset
/// and construct the process-wide [`LibraryContext`], capturing the
/// calling process's own mount namespace fd.
///
/// Must be called exactly once, before any other operation in this
/// crate.
pub fn init(config: LibraryConfig) -> Result<LibraryContext> {
    nvc_priv::init_process_capabilities()?;
    let _guard = nvc_priv::enter_phase(Phase::Init)?;
    let ctx = LibraryContext::new(config).map_err(|e| NvcError::io("/proc/self/ns/mnt", e))?;
    log_info!("nvc context initialized, version {}", nvc_core::version());
    Ok(ctx)
}

/// Tear the library down. Consumes `ctx`, closing its captured mount
/// namespace fd via `Drop`. The `Phase::Shutdown` effective-capability
/// whitelist is empty: this is deliberately a no-op capable
/// of running with zero raised capabilities.
pub fn shutdown(ctx: LibraryContext) -> Result<()> {
    let _guard = nvc_priv::enter_phase(Phase::Shutdown)?;
    drop(ctx);
    log_info!("nvc context shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_shutdown_round_trips_cleanly() {
        let ctx = init(LibraryConfig::default()).expect("init");
        assert!(ctx.saved_mnt_ns() >= 0);
        shutdown(ctx).expect("shutdown");
    }
}

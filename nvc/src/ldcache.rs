//! ld.so cache refresh, wrapping component K
//! ([`nvc_ldconfig`]) with the `Phase::Ldcache` effective-capability
//! whitelist.

use nvc_container::ContainerDescriptor;
use nvc_core::{LibraryContext, Result};
use nvc_priv::Phase;

/// Refresh `container`'s `/etc/ld.so.cache` via the confined ldconfig
/// runner.
pub fn update(ctx: &LibraryContext, container: &ContainerDescriptor) -> Result<()> {
    let _guard = nvc_priv::enter_phase(Phase::Ldcache)?;
    nvc_ldconfig::ldcache_update(ctx, container)
}

//! Container descriptor construction,
//! wrapping component I ([`nvc_container`]) with the `Phase::Container`
//! effective-capability whitelist.

use nvc_container::{ContainerConfig, ContainerDescriptor};
use nvc_core::Result;
use nvc_priv::Phase;
use std::path::Path;

/// Build a [`ContainerDescriptor`] for `cfg`, raising and lowering the
/// container-phase capability set around the resolution work.
pub fn describe(proc_root: &Path, cfg: ContainerConfig, opts: Option<&str>) -> Result<ContainerDescriptor> {
    let _guard = nvc_priv::enter_phase(Phase::Container)?;
    ContainerDescriptor::new(proc_root, cfg, opts)
}

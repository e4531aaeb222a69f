//! # nvc-core
//!
//! Shared data model, error taxonomy, fixed path constants and the
//! process-wide Library Context for the GPU container injection runtime.
//!
//! This crate has no knowledge of mounts, cgroups, or RPC — it only
//! defines the types every other crate in the workspace builds on.

pub mod context;
pub mod error;
pub mod model;
pub mod options;
pub mod paths;
pub mod version;

pub use context::{LibraryConfig, LibraryContext};
pub use error::{NvcError, Result};
pub use model::{
    Brand, DevId, Device, DeviceInfo, DeviceNode, DriverInfo, MigInstance, MountRecord,
    NvcapsStyle, Selection,
};
pub use options::{ContainerFlags, CudaCompatMode, DriverOptions, LibraryOptions};
pub use version::{version, Version};

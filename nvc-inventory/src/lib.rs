//! # nvc-inventory
//!
//! Driver & device inventory: combines the ldcache reader,
//! ELF inspector, and driver helper RPCs into driver-file lists and
//! per-GPU metadata. Also hosts the requirement evaluator.

pub mod bins;
pub mod catalog;
pub mod devices;
pub mod firmware;
pub mod libs;
pub mod requirements;

pub use libs::LibCategory;

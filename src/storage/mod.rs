//! The container engine: a thin layer over HDF5 files.
//!
//! Groups track the creation order of their links and attributes so that members are listed in the
//! order they were declared. The access layer only talks to the engine through the handles exported
//! here.
mod container;
mod h5;
mod hyperslab;
mod node;

pub use container::Container;
pub use hyperslab::Region;
pub use node::{AttributeHandle, DatasetHandle, DatasetSpec, GroupHandle, ObjectKind};

/// Maximum extent of an axis that may grow without bound, `H5S_UNLIMITED`.
pub const UNLIMITED: u64 = u64::MAX;

//! Datasets and the per-dimension accessor chain used to index them.
mod accessor;
#[allow(clippy::module_inception)]
mod dataset;
mod text;

pub use accessor::*;
pub use dataset::*;

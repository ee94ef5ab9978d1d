//! # HITREE
//!
//! Typed tree access to hierarchical containers of groups, N-dimensional datasets and attributes.
//!
//! A tree of [groups](group::Group), [datasets](dataset::Dataset) and [attributes](attribute::Attribute)
//! is declared in Rust and then bound to a container file: created, or opened when the file exists.
//! Datasets hold primitives, variable-length text or fixed-layout [records](record::Record), and are
//! indexed one axis at a time through a chain of [accessors](dataset::Accessor) that share one
//! selection. Records are declared at runtime with a [`RecordType`](record::RecordType) or statically
//! from a plain struct with the [`compound!`] macro.
//!
//! A container written by another program can be opened without a declared schema through the
//! [reflector](reflect), and any tree can be walked generically through [`TreeNode`](tree::TreeNode).
//!
//! ## Usage
//!
//! ```
//! use hitree::prelude::*;
//!
//! hitree::compound! {
//!     pub struct Station {
//!         id: u32,
//!         position: [f32; 2],
//!     }
//! }
//!
//! let mut root = Group::root();
//! root.add(
//!     Dataset::compound::<Station>("stations", Shape::extendible(&[0], &[UNLIMITED], &[16]))
//!         .unwrap(),
//! )
//! .unwrap();
//! root.open_in_memory("usage").unwrap();
//!
//! let stations = root.dataset_mut("stations").unwrap();
//! stations
//!     .extend_once_and_write_compound(&Station { id: 7, position: [60.4, 5.3] })
//!     .unwrap();
//!
//! let s: Station = stations.index(0).unwrap().read_compound::<Station>().unwrap()[0].clone();
//! assert_eq!(s.id, 7);
//! ```
//!
//! Containers are single-threaded: a tree and its container are owned by one thread at a time.

#[macro_use]
extern crate anyhow;

pub mod attribute;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod group;
pub mod record;
pub mod reflect;
pub mod selection;
pub mod storage;
pub mod tree;
pub mod types;
pub mod walk;

pub use anyhow::Result;
pub use error::Error;

pub mod prelude {
    pub use crate::attribute::Attribute;
    pub use crate::dataset::{Accessor, Dataset, ElementType, Shape};
    pub use crate::error::Error;
    pub use crate::group::{Group, Member, OpenMode};
    pub use crate::record::{Compound, MemberType, Record, RecordType};
    pub use crate::reflect::reflect;
    pub use crate::storage::{Container, UNLIMITED};
    pub use crate::tree::TreeNode;
    pub use crate::types::{Primitive, PrimitiveKind, Value};
}

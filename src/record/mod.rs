//! Fixed-layout records: ordered named members that are primitives, nested records or fixed arrays of
//! either.
//!
//! A [`RecordType`] describes the layout, a [`Record`] holds the values of one element and, once bound
//! to a dataset, reads and writes its own bytes within the selected element. Plain Rust structs declare
//! record types statically with the [`compound!`](crate::compound) macro.
mod array;
mod compound;
mod value;

pub use array::{ElementMut, PrimitiveArray, RecordArray};
pub use compound::{Compound, Member};
pub use value::{Field, Record, Slot};

pub(crate) use value::{Binding, Link};

use crate::types::{CompoundType, Datatype, PrimitiveKind};

/// Layout of one record member.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberType {
    Primitive(PrimitiveKind),
    Record(RecordType),

    /// Fixed number of primitives or records.
    Array {
        element: Box<MemberType>,
        count: usize,
    },
}

impl MemberType {
    pub fn array(element: MemberType, count: usize) -> MemberType {
        MemberType::Array {
            element: Box::new(element),
            count,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            MemberType::Primitive(k) => k.size(),
            MemberType::Record(r) => r.total_size(),
            MemberType::Array { element, count } => element.size() * count,
        }
    }

    pub fn datatype(&self) -> Datatype {
        match self {
            MemberType::Primitive(k) => k.datatype(),
            MemberType::Record(r) => r.datatype(),
            MemberType::Array { element, count } => {
                Datatype::Array(Box::new(element.datatype()), vec![*count as u64])
            }
        }
    }

    fn validate(&self, name: &str) -> anyhow::Result<()> {
        match self {
            MemberType::Primitive(PrimitiveKind::Text) => {
                bail!("member {name}: text is not a fixed-width member type")
            }
            MemberType::Primitive(_) => Ok(()),
            MemberType::Record(r) => r.validate(),
            MemberType::Array { element, count } => {
                ensure!(*count > 0, "member {}: empty array", name);
                match element.as_ref() {
                    MemberType::Array { .. } => {
                        bail!("member {name}: arrays of arrays are not supported")
                    }
                    e => e.validate(name),
                }
            }
        }
    }
}

/// Ordered member layout of a record.
///
/// Member order is the stored order: the total size is the sum of the member sizes and each member's
/// offset is the sum of the sizes before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordType {
    members: Vec<(String, MemberType)>,
}

impl RecordType {
    pub fn new() -> RecordType {
        RecordType::default()
    }

    /// Append a member. Names must be unique.
    pub fn register_member(&mut self, name: &str, ty: MemberType) -> anyhow::Result<()> {
        ensure!(
            !self.members.iter().any(|(n, _)| n == name),
            "duplicate record member {}",
            name
        );
        ty.validate(name)?;

        self.members.push((name.to_string(), ty));
        Ok(())
    }

    /// Builder form of [`register_member`](RecordType::register_member).
    pub fn with(mut self, name: &str, ty: MemberType) -> anyhow::Result<RecordType> {
        self.register_member(name, ty)?;
        Ok(self)
    }

    /// Append without checks, the layout is checked by [`validate`](RecordType::validate) when the
    /// type is used.
    #[doc(hidden)]
    pub fn push_member(&mut self, name: &str, ty: MemberType) {
        self.members.push((name.to_string(), ty));
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.members.is_empty(), "record type without members");

        for (i, (name, ty)) in self.members.iter().enumerate() {
            ensure!(
                !self.members[..i].iter().any(|(n, _)| n == name),
                "duplicate record member {}",
                name
            );
            ty.validate(name)?;
        }

        Ok(())
    }

    pub fn members(&self) -> &[(String, MemberType)] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&MemberType> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.members.iter().map(|(_, t)| t.size()).sum()
    }

    /// Byte offset of a member.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for (n, t) in &self.members {
            if n == name {
                return Some(offset);
            }
            offset += t.size();
        }
        None
    }

    /// The stored compound type with this layout.
    pub fn datatype(&self) -> Datatype {
        Datatype::Compound(CompoundType::packed(
            self.members.iter().map(|(n, t)| (n.clone(), t.datatype())),
        ))
    }
}

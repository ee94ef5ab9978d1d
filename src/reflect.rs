//! Rebuild a tree from the types stored in a container, without a declared schema.
//!
//! The supported stored types are numeric primitives, text, compounds of those and rank 1 arrays of
//! primitives or compounds. Anything else fails with [`Error::UnsupportedSchema`] naming the object,
//! nothing is silently skipped.
use std::path::Path;

use anyhow::Context;

use crate::attribute::Attribute;
use crate::dataset::{Dataset, ElementType, Shape};
use crate::error::Error;
use crate::group::{Group, Member, OpenMode};
use crate::record::{MemberType, RecordType};
use crate::storage::{Container, DatasetHandle, GroupHandle, ObjectKind};
use crate::types::{CompoundType, Datatype, PrimitiveKind, TypeClass};

type Constructor = fn(&str, Shape) -> anyhow::Result<Dataset>;

/// Every stored numeric type that maps to a primitive kind, keyed by class, width and signedness.
const PRIMITIVES: &[(TypeClass, usize, bool, PrimitiveKind, Constructor)] = &[
    (TypeClass::Integer, 1, false, PrimitiveKind::U8, Dataset::primitive::<u8>),
    (TypeClass::Integer, 2, false, PrimitiveKind::U16, Dataset::primitive::<u16>),
    (TypeClass::Integer, 4, false, PrimitiveKind::U32, Dataset::primitive::<u32>),
    (TypeClass::Integer, 8, false, PrimitiveKind::U64, Dataset::primitive::<u64>),
    (TypeClass::Integer, 1, true, PrimitiveKind::I8, Dataset::primitive::<i8>),
    (TypeClass::Integer, 2, true, PrimitiveKind::I16, Dataset::primitive::<i16>),
    (TypeClass::Integer, 4, true, PrimitiveKind::I32, Dataset::primitive::<i32>),
    (TypeClass::Integer, 8, true, PrimitiveKind::I64, Dataset::primitive::<i64>),
    (TypeClass::Float, 4, true, PrimitiveKind::F32, Dataset::primitive::<f32>),
    (TypeClass::Float, 8, true, PrimitiveKind::F64, Dataset::primitive::<f64>),
];

fn lookup(ty: &Datatype) -> Option<(PrimitiveKind, Constructor)> {
    let (class, width, signed) = (ty.class(), ty.dsize(), ty.is_signed());
    PRIMITIVES
        .iter()
        .find(|(c, w, s, _, _)| *c == class && *w == width && *s == signed)
        .map(|(_, _, _, k, f)| (*k, *f))
}

fn unsupported(path: &str, reason: String) -> anyhow::Error {
    Error::UnsupportedSchema {
        path: path.to_string(),
        reason,
    }
    .into()
}

/// Record type of a stored compound. `path` names the object for errors.
///
/// The record type is packed even when the stored compound is padded, members are converted by name
/// on transfer.
fn record_type(path: &str, c: &CompoundType) -> anyhow::Result<RecordType> {
    let mut ty = RecordType::new();
    for f in &c.fields {
        let member_path = format!("{path}.{}", f.name);
        let m = member_type(&member_path, &f.ty)?;
        ty.register_member(&f.name, m)
            .with_context(|| format!("member {member_path}"))?;
    }

    Ok(ty)
}

fn member_type(path: &str, ty: &Datatype) -> anyhow::Result<MemberType> {
    match ty {
        Datatype::Compound(c) => Ok(MemberType::Record(record_type(path, c)?)),
        Datatype::Array(base, dims) => {
            let [count] = dims.as_slice() else {
                return Err(unsupported(
                    path,
                    format!("array of rank {} (only rank 1 arrays are supported)", dims.len()),
                ));
            };
            let element = match base.as_ref() {
                Datatype::Compound(c) => MemberType::Record(record_type(path, c)?),
                b => match lookup(b) {
                    Some((k, _)) => MemberType::Primitive(k),
                    None => return Err(unsupported(path, format!("array of {b}"))),
                },
            };
            Ok(MemberType::array(element, *count as usize))
        }
        t => match lookup(t) {
            Some((k, _)) => Ok(MemberType::Primitive(k)),
            None => Err(unsupported(path, format!("member of type {t}"))),
        },
    }
}

/// Element type of a stored dataset or attribute type.
fn element_type(path: &str, ty: &Datatype) -> anyhow::Result<ElementType> {
    match ty {
        Datatype::VarLenStr => Ok(ElementType::Primitive(PrimitiveKind::Text)),
        Datatype::Compound(c) => Ok(ElementType::Record(record_type(path, c)?)),
        t => match lookup(t) {
            Some((k, _)) => Ok(ElementType::Primitive(k)),
            None => Err(unsupported(path, format!("type {t}"))),
        },
    }
}

fn attributes(
    path: &str,
    names: Vec<String>,
    open: impl Fn(&str) -> anyhow::Result<Datatype>,
) -> anyhow::Result<Vec<Attribute>> {
    names
        .iter()
        .map(|n| {
            let at = format!("{path}@{n}");
            let e = element_type(&at, &open(n)?)?;
            Attribute::new(n, e)
        })
        .collect()
}

fn dataset(h: &DatasetHandle) -> anyhow::Result<Dataset> {
    let path = h.path();
    let dtype = h.dtype();
    let layout = Shape {
        dims: h.dims(),
        max_dims: h.max_dims(),
        chunk: h.chunk(),
        deflate: h.deflate(),
        fill: h.fill(),
    };

    let name = path.rsplit('/').next().unwrap_or(path);
    let mut ds = match &dtype {
        Datatype::VarLenStr => Dataset::text(name, layout)?,
        Datatype::Compound(c) => Dataset::records(name, &record_type(path, c)?, layout)?,
        t => match lookup(t) {
            Some((_, construct)) => construct(name, layout)?,
            None => return Err(unsupported(path, format!("dataset of {t}"))),
        },
    };

    for a in attributes(path, h.attribute_names()?, |n| Ok(h.open_attribute(n)?.dtype()))? {
        ds.add_attribute(a)?;
    }

    log::trace!("reflected dataset {} of {}", path, dtype);
    Ok(ds)
}

/// Members of the stored group `h`, in stored order.
fn members(h: &GroupHandle) -> anyhow::Result<Vec<Member>> {
    let stored = h.members()?;
    if let Some((name, _)) = stored.iter().find(|(_, k)| *k == ObjectKind::Other) {
        let path = format!("{}/{}", h.path().trim_end_matches('/'), name);
        return Err(unsupported(&path, "neither a group nor a dataset".into()));
    }

    let mut slots: Vec<Option<Member>> = Vec::with_capacity(stored.len());
    slots.resize_with(stored.len(), || None);

    // datasets of this group first, then its subgroups
    for (slot, (name, kind)) in slots.iter_mut().zip(&stored) {
        if *kind == ObjectKind::Dataset {
            let d = h.open_dataset(name)?;
            *slot = Some(dataset(&d)?.into());
        }
    }

    for (slot, (name, kind)) in slots.iter_mut().zip(&stored) {
        if *kind == ObjectKind::Group {
            let g = h.open_group(name)?;
            let mut child = Group::new(name)?;
            for m in members(&g)? {
                child.add(m)?;
            }
            *slot = Some(child.into());
        }
    }

    let mut members: Vec<Member> = slots.into_iter().flatten().collect();

    let path = h.path();
    for a in attributes(path, h.attribute_names()?, |n| Ok(h.open_attribute(n)?.dtype()))? {
        members.push(a.into());
    }

    Ok(members)
}

/// Build the unbound tree matching the contents of `c`.
pub fn reflect(c: &Container) -> anyhow::Result<Group> {
    let mut root = Group::root();
    for m in members(&c.root())? {
        root.add(m)?;
    }

    log::debug!(
        "reflected {} with {} top level members",
        c.filename(),
        root.members().len()
    );
    Ok(root)
}

impl Group {
    /// Open an existing container, reflect its schema and bind the reflected tree.
    pub fn open_reflected<P: AsRef<Path>>(path: P, mode: OpenMode) -> anyhow::Result<Group> {
        let read_only = match mode {
            OpenMode::ReadOnly => true,
            OpenMode::ReadWrite => false,
            m => bail!("a reflected tree opens an existing container, not {:?}", m),
        };

        let c = Container::open(path, read_only)?;
        let mut root = reflect(&c)?;
        root.attach(c, false)?;
        Ok(root)
    }
}

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use anyhow::Context;

use super::accessor::{Accessor, ElementType};
use crate::attribute::Attribute;
use crate::error::Error;
use crate::record::{Compound, Record, RecordType};
use crate::selection::IoFacility;
use crate::storage::{DatasetHandle, DatasetSpec, GroupHandle, UNLIMITED};
use crate::tree::TreeNode;
use crate::types::{Primitive, PrimitiveKind, Value};

/// Extents and storage layout of a dataset, fixed before the dataset is created in a container.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shape {
    pub dims: Vec<u64>,

    /// Maximum extents, [`UNLIMITED`] for axes without bound.
    pub max_dims: Vec<u64>,

    /// Chunk shape, required for extendible or compressed datasets.
    pub chunk: Option<Vec<u64>>,

    /// Deflate level `0..=9`.
    pub deflate: Option<u8>,

    /// Fill value bytes of one element.
    pub fill: Option<Vec<u8>>,
}

impl Shape {
    pub fn scalar() -> Shape {
        Shape::default()
    }

    pub fn fixed(dims: &[u64]) -> Shape {
        Shape {
            dims: dims.to_vec(),
            max_dims: dims.to_vec(),
            ..Shape::default()
        }
    }

    /// Chunked shape that can grow up to `max_dims`.
    pub fn extendible(dims: &[u64], max_dims: &[u64], chunk: &[u64]) -> Shape {
        Shape {
            dims: dims.to_vec(),
            max_dims: max_dims.to_vec(),
            chunk: Some(chunk.to_vec()),
            ..Shape::default()
        }
    }

    pub fn with_deflate(mut self, level: u8) -> Shape {
        self.deflate = Some(level);
        self
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    fn validate(&self, rank: usize) -> anyhow::Result<()> {
        ensure!(
            self.dims.len() == rank && self.max_dims.len() == rank,
            "shape {:?} / {:?} does not have rank {}",
            self.dims,
            self.max_dims,
            rank
        );
        if let Some(level) = self.deflate {
            ensure!(level <= 9, "deflate level {} out of range 0..=9", level);
        }
        Ok(())
    }
}

/// A named N-dimensional dataset of primitives, records or text.
///
/// The dataset owns the [`IoFacility`] and is itself the top accessor of its chain (it dereferences to
/// [`Accessor`]): `ds.index(1)?.index(2)?.get::<f32>()` reads one element of a rank 2 dataset.
#[derive(Debug)]
pub struct Dataset {
    name: String,
    layout: Shape,
    io: Rc<RefCell<IoFacility>>,
    top: Accessor,
    attrs: Vec<Attribute>,
}

impl Dataset {
    pub fn new(name: &str, element: ElementType, layout: Shape) -> anyhow::Result<Dataset> {
        ensure!(
            !name.is_empty() && !name.contains('/'),
            "invalid dataset name: {:?}",
            name
        );
        if let ElementType::Record(r) = &element {
            r.validate()
                .with_context(|| format!("record type of dataset {name}"))?;
        }
        layout.validate(layout.rank())?;

        let io = Rc::new(RefCell::new(IoFacility::new(
            element.datatype(),
            &layout.dims,
            &layout.max_dims,
        )));
        let top = Accessor::chain(0, layout.rank(), &element, Rc::downgrade(&io))?;

        Ok(Dataset {
            name: name.to_string(),
            layout,
            io,
            top,
            attrs: Vec::new(),
        })
    }

    /// Dataset of primitives of type `T`.
    pub fn primitive<T: Primitive>(name: &str, layout: Shape) -> anyhow::Result<Dataset> {
        Dataset::new(name, ElementType::Primitive(T::KIND), layout)
    }

    pub fn compound<C: Compound>(name: &str, layout: Shape) -> anyhow::Result<Dataset> {
        Dataset::new(name, ElementType::Record(C::record_type()), layout)
    }

    pub fn records(name: &str, ty: &RecordType, layout: Shape) -> anyhow::Result<Dataset> {
        Dataset::new(name, ElementType::Record(ty.clone()), layout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fix the first axis at `i`, see [`Accessor::index`].
    pub fn index(&mut self, i: u64) -> anyhow::Result<&mut Accessor> {
        self.top.index(i)
    }

    pub fn is_bound(&self) -> bool {
        self.io.borrow().is_bound()
    }

    /// Path in the container, when bound.
    pub fn path(&self) -> Option<String> {
        self.io.borrow().handle().map(|h| h.path().to_string())
    }

    /// Declared layout with the current extents.
    pub fn layout(&self) -> Shape {
        let io = self.io.borrow();
        Shape {
            dims: io.dims().to_vec(),
            max_dims: io.max_dims().to_vec(),
            ..self.layout.clone()
        }
    }

    fn check_unbound(&self, what: &str) -> anyhow::Result<()> {
        ensure!(
            !self.is_bound(),
            "cannot set {} of dataset {} after it is bound",
            what,
            self.name
        );
        Ok(())
    }

    /// Set extents and maximum extents. The rank cannot change.
    pub fn set_dims(&mut self, dims: &[u64], max_dims: &[u64]) -> anyhow::Result<()> {
        self.check_unbound("the extents")?;
        let layout = Shape {
            dims: dims.to_vec(),
            max_dims: max_dims.to_vec(),
            ..self.layout.clone()
        };
        layout.validate(self.layout.rank())?;

        self.io.borrow_mut().declare(dims, max_dims);
        self.layout = layout;
        Ok(())
    }

    pub fn set_chunk(&mut self, chunk: &[u64]) -> anyhow::Result<()> {
        self.check_unbound("the chunk shape")?;
        ensure!(
            chunk.len() == self.layout.rank(),
            "chunk shape {:?} does not have rank {}",
            chunk,
            self.layout.rank()
        );
        self.layout.chunk = Some(chunk.to_vec());
        Ok(())
    }

    pub fn set_deflate(&mut self, level: u8) -> anyhow::Result<()> {
        self.check_unbound("compression")?;
        ensure!(level <= 9, "deflate level {} out of range 0..=9", level);
        self.layout.deflate = Some(level);
        Ok(())
    }

    pub fn set_fill_value<T: Primitive>(&mut self, value: T) -> anyhow::Result<()> {
        self.check_unbound("the fill value")?;
        let ElementType::Primitive(k) = self.element() else {
            bail!("dataset {} holds records, use a record fill value", self.name);
        };
        let k = *k;
        ensure!(k != PrimitiveKind::Text, "text datasets have no fill value");

        let v = value.into_value().cast(k).ok_or_else(|| Error::KindMismatch {
            expected: k.to_string(),
            got: T::KIND.to_string(),
        })?;
        let mut b = vec![0u8; k.size()];
        v.encode(&mut b);
        self.layout.fill = Some(b);
        Ok(())
    }

    pub fn set_fill_record(&mut self, record: &Record) -> anyhow::Result<()> {
        self.check_unbound("the fill value")?;
        ensure!(
            matches!(self.element(), ElementType::Record(r) if r == record.record_type()),
            "fill record does not match the record type of dataset {}",
            self.name
        );
        self.layout.fill = Some(record.to_bytes());
        Ok(())
    }

    fn spec(&self) -> DatasetSpec {
        DatasetSpec {
            dtype: self.element().datatype(),
            dims: self.layout.dims.clone(),
            max_dims: self.layout.max_dims.clone(),
            chunk: self.layout.chunk.clone(),
            deflate: self.layout.deflate,
            fill: self.layout.fill.clone(),
        }
    }

    /// Create the dataset and its attributes in `group` and bind to it.
    pub(crate) fn create_in(&mut self, group: &GroupHandle) -> anyhow::Result<()> {
        let h = group.create_dataset(&self.name, &self.spec())?;
        for a in &mut self.attrs {
            a.create_on(&h)?;
        }
        self.bind(h);
        Ok(())
    }

    /// Open the dataset and its attributes in `group` and bind to it.
    pub(crate) fn open_in(&mut self, group: &GroupHandle) -> anyhow::Result<()> {
        let h = group.open_dataset(&self.name)?;
        ensure!(
            h.dims().len() == self.layout.rank(),
            "dataset {} has rank {}, declared with rank {}",
            h.path(),
            h.dims().len(),
            self.layout.rank()
        );

        for a in &mut self.attrs {
            a.open_on(&h)?;
        }

        self.layout.chunk = h.chunk();
        self.layout.deflate = h.deflate();
        self.layout.fill = h.fill();
        self.bind(h);
        Ok(())
    }

    fn bind(&mut self, h: DatasetHandle) {
        log::debug!("binding dataset {} ({:?})", h.path(), h.dims());
        self.io.borrow_mut().init(h);
        self.top.rebind();
    }

    /// Write back pending changes and release the handles, attributes first.
    pub(crate) fn close(&mut self) -> anyhow::Result<()> {
        let r = self.top.commit_pending();
        for a in &mut self.attrs {
            a.unbind();
        }
        self.io.borrow_mut().unbind();
        r
    }

    /// Grow `axis` by `n`.
    pub fn extend_dim(&mut self, axis: usize, n: u64) -> anyhow::Result<()> {
        self.io.borrow_mut().extend(axis, n)
    }

    /// Copy all of `other` into this dataset, growing it to the extents of `other` when needed.
    ///
    /// Refused without writing anything when a maximum extent of this dataset is smaller than the
    /// current extent of `other`, or when this dataset has more elements than `other`.
    pub fn assign_from(&mut self, other: &Dataset) -> anyhow::Result<()> {
        let src = other.dims();
        let max = self.max_dims();
        let dest = self.dims();

        ensure!(
            src.len() == dest.len(),
            "cannot assign dataset of rank {} to dataset of rank {}",
            src.len(),
            dest.len()
        );

        let fits = max.iter().zip(&src).all(|(m, s)| *m == UNLIMITED || m >= s);
        if !fits || self.total_elements() > other.total_elements() {
            log::warn!(
                "refusing to assign {:?} to {} with extents {:?} and maximum {:?}",
                src,
                self.name,
                dest,
                max
            );
            return Err(Error::ShapeMismatch { dest, source: src }.into());
        }

        let buf = other.read_raw()?;
        if dest != src {
            self.io.borrow_mut().resize(&src)?;
        }

        let mut io = self.io.borrow_mut();
        io.reset();
        io.write_as(&other.element().datatype(), &buf)
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> anyhow::Result<()> {
        self.check_unbound("attributes")?;
        ensure!(
            self.attrs.iter().all(|a| a.name() != attr.name()),
            "attribute {} already declared on dataset {}",
            attr.name(),
            self.name
        );
        self.attrs.push(attr);
        Ok(())
    }

    pub fn with_attribute(mut self, attr: Attribute) -> anyhow::Result<Dataset> {
        self.add_attribute(attr)?;
        Ok(self)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    pub fn attribute(&self, name: &str) -> anyhow::Result<&Attribute> {
        self.attrs
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::NotFound(format!("{}@{}", self.name, name)).into())
    }

    pub fn attribute_mut(&mut self, name: &str) -> anyhow::Result<&mut Attribute> {
        let ds = &self.name;
        self.attrs
            .iter_mut()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::NotFound(format!("{ds}@{name}")).into())
    }
}

impl Deref for Dataset {
    type Target = Accessor;

    fn deref(&self) -> &Accessor {
        &self.top
    }
}

impl DerefMut for Dataset {
    fn deref_mut(&mut self) -> &mut Accessor {
        &mut self.top
    }
}

impl TreeNode for Dataset {
    fn is_leaf(&self) -> Option<PrimitiveKind> {
        self.top.is_leaf()
    }

    fn read_leaf_value(&mut self) -> anyhow::Result<Option<Value>> {
        self.top.read_leaf_value()
    }

    fn can_index(&self) -> bool {
        self.top.can_index()
    }

    fn index(&mut self, i: usize) -> anyhow::Result<&mut dyn TreeNode> {
        TreeNode::index(&mut self.top, i)
    }

    fn indexable_size(&self) -> usize {
        self.top.indexable_size()
    }

    fn element_kind(&self) -> Option<PrimitiveKind> {
        self.top.element_kind()
    }

    fn bytes_below(&self) -> usize {
        self.top.bytes_below()
    }

    fn read_all_below(&mut self, out: &mut Vec<u8>) -> anyhow::Result<bool> {
        self.top.read_all_below(out)
    }

    fn memory_value(&self) -> Option<Value> {
        self.top.memory_value()
    }

    fn children_names(&self) -> Vec<String> {
        self.top.children_names()
    }

    fn child_by_name(&mut self, name: &str) -> Option<&mut dyn TreeNode> {
        self.top.child_by_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked() -> Shape {
        Shape::extendible(&[4], &[UNLIMITED], &[2])
    }

    #[test]
    fn deflate_levels() {
        assert!(Dataset::primitive::<u8>("d", chunked().with_deflate(10)).is_err());

        let mut d = Dataset::primitive::<u8>("d", chunked().with_deflate(9)).unwrap();
        assert_eq!(d.layout().deflate, Some(9));
        assert!(d.set_deflate(12).is_err());
        d.set_deflate(0).unwrap();
        assert_eq!(d.layout().deflate, Some(0));
    }
}
